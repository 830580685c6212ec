// Action handlers - one per ActionType, looked up through HandlerRegistry

mod delay;
mod entities;
mod notify;
mod segments;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::actions::{ActionType, ParamsError};
use super::context::ExecutionContext;
use crate::services::{MailError, Mailer, WebhookError, WebhookSender};
use crate::store::{CrmStore, StoreError};

pub use delay::DelayHandler;
pub use entities::{
    AssignToUserHandler, CreateActivityHandler, CreateReminderHandler, UpdateCompanyHandler, UpdateContactHandler,
};
pub use notify::{SendEmailHandler, WebhookHandler};
pub use segments::{AddToSegmentHandler, RemoveFromSegmentHandler};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("no {0} to act on: pass it in params or trigger on one")]
    MissingTarget(&'static str),
    #[error("unsupported entity type '{0}'")]
    UnsupportedEntity(String),
    #[error("no handler registered for {0}")]
    NoHandler(ActionType),
    #[error("email delivery failed: {0}")]
    Mail(#[from] MailError),
    #[error("webhook delivery failed: {0}")]
    Webhook(#[from] WebhookError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("execution canceled")]
    Canceled,
}

/// What a handler sees of the running execution
pub struct HandlerContext<'a> {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub action_id: Uuid,
    pub context: &'a ExecutionContext,
    pub cancel: &'a CancellationToken,
}

/// Executes one action kind. `params` have already been templated against
/// the execution context. The returned document becomes
/// `results.<actionId>` for later actions.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError>;
}

/// Collaborators the built-in handlers need
#[derive(Clone)]
pub struct HandlerDeps {
    pub crm: Arc<dyn CrmStore>,
    pub mailer: Arc<dyn Mailer>,
    pub webhooks: Arc<dyn WebhookSender>,
    pub max_delay_minutes: u64,
}

/// Kind -> handler table, built once at startup.
pub struct HandlerRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new(deps: HandlerDeps) -> Self {
        let handlers = ActionType::ALL
            .iter()
            .map(|kind| (*kind, builtin_handler(*kind, &deps)))
            .collect();
        Self { handlers }
    }

    pub fn get(&self, kind: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

// Exhaustive: adding an ActionType without a handler does not compile.
fn builtin_handler(kind: ActionType, deps: &HandlerDeps) -> Arc<dyn ActionHandler> {
    match kind {
        ActionType::UpdateContact => Arc::new(UpdateContactHandler::new(deps.crm.clone())),
        ActionType::UpdateCompany => Arc::new(UpdateCompanyHandler::new(deps.crm.clone())),
        ActionType::CreateActivity => Arc::new(CreateActivityHandler::new(deps.crm.clone())),
        ActionType::CreateReminder => Arc::new(CreateReminderHandler::new(deps.crm.clone())),
        ActionType::SendEmail => Arc::new(SendEmailHandler::new(deps.mailer.clone(), deps.crm.clone())),
        ActionType::AddToSegment => Arc::new(AddToSegmentHandler::new(deps.crm.clone())),
        ActionType::RemoveFromSegment => Arc::new(RemoveFromSegmentHandler::new(deps.crm.clone())),
        ActionType::AssignToUser => Arc::new(AssignToUserHandler::new(deps.crm.clone())),
        ActionType::Webhook => Arc::new(WebhookHandler::new(deps.webhooks.clone())),
        ActionType::Delay => Arc::new(DelayHandler::new(deps.max_delay_minutes)),
    }
}
