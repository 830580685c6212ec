// Engine harness and HTTP helpers shared by the unit and integration tests

use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
    Router,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::memory::{InMemoryCrmStore, InMemoryWorkflowStore, RecordingMailer, RecordingWebhooks};
use crate::events::{EventBus, EventEnvelope, EventType};
use crate::services::{Mailer, WebhookSender};
use crate::store::WorkflowStore;
use crate::workflows::{
    ActionLimits, ExecutionScheduler, HandlerDeps, HandlerRegistry, NewWorkflow, WorkflowDefinition,
    WorkflowEngine, WorkflowExecution, WorkflowExecutor,
};
use crate::{create_router, AppState};

pub const MAX_DELAY_MINUTES: u64 = 60;

pub struct TestHarness {
    pub tenant_id: Uuid,
    pub actor_id: Uuid,
    pub workflows: Arc<InMemoryWorkflowStore>,
    pub crm: Arc<InMemoryCrmStore>,
    pub mailer: Arc<RecordingMailer>,
    pub webhooks: Arc<RecordingWebhooks>,
    pub bus: Arc<EventBus>,
    pub engine: Arc<WorkflowEngine>,
}

impl TestHarness {
    /// Must be built inside a tokio runtime.
    pub fn new() -> Self {
        let mailer = Arc::new(RecordingMailer::default());
        let webhooks = Arc::new(RecordingWebhooks::default());
        Self::with_collaborators(mailer.clone(), webhooks.clone(), mailer, webhooks)
    }

    /// Harness whose handlers use the given mail and webhook collaborators.
    pub fn with_outbound(mailer: Arc<dyn Mailer>, webhooks: Arc<dyn WebhookSender>) -> Self {
        Self::with_collaborators(
            mailer,
            webhooks,
            Arc::new(RecordingMailer::default()),
            Arc::new(RecordingWebhooks::default()),
        )
    }

    fn with_collaborators(
        mailer: Arc<dyn Mailer>,
        webhooks: Arc<dyn WebhookSender>,
        recording_mailer: Arc<RecordingMailer>,
        recording_webhooks: Arc<RecordingWebhooks>,
    ) -> Self {
        let workflows = Arc::new(InMemoryWorkflowStore::new());
        let crm = Arc::new(InMemoryCrmStore::new());
        let store: Arc<dyn WorkflowStore> = workflows.clone();

        let handlers = HandlerRegistry::new(HandlerDeps {
            crm: crm.clone(),
            mailer,
            webhooks,
            max_delay_minutes: MAX_DELAY_MINUTES,
        });
        let executor = Arc::new(WorkflowExecutor::new(store.clone(), Arc::new(handlers)));
        let scheduler = Arc::new(ExecutionScheduler::new(store.clone(), executor));
        let engine = Arc::new(WorkflowEngine::new(
            store,
            scheduler,
            ActionLimits {
                max_delay_minutes: MAX_DELAY_MINUTES,
            },
        ));

        Self {
            tenant_id: Uuid::new_v4(),
            actor_id: Uuid::new_v4(),
            workflows,
            crm,
            mailer: recording_mailer,
            webhooks: recording_webhooks,
            bus: Arc::new(EventBus::default()),
            engine,
        }
    }

    pub fn router(&self) -> Router {
        create_router(Arc::new(AppState {
            engine: self.engine.clone(),
            bus: self.bus.clone(),
        }))
    }

    /// Create a workflow in the harness tenant from its JSON request body.
    pub async fn create_workflow(&self, body: Value) -> WorkflowDefinition {
        self.create_workflow_in(self.tenant_id, body).await
    }

    pub async fn create_workflow_in(&self, tenant_id: Uuid, body: Value) -> WorkflowDefinition {
        let request: NewWorkflow = serde_json::from_value(body).unwrap();
        self.engine
            .create_workflow(tenant_id, Some(self.actor_id), request)
            .await
            .unwrap()
    }

    pub fn envelope(&self, entity_type: &str, entity_id: Uuid) -> EventEnvelope {
        EventEnvelope::new(self.tenant_id, entity_type, entity_id).with_actor(self.actor_id)
    }

    /// Match the event, then wait for every scheduled execution to finish.
    pub async fn dispatch(&self, event_type: EventType, envelope: &EventEnvelope) -> Vec<WorkflowExecution> {
        let scheduled = self.engine.handle_event(event_type, envelope).await.unwrap();
        let mut finished = Vec::with_capacity(scheduled.len());
        for execution in scheduled {
            finished.push(self.wait_for(execution.id).await);
        }
        finished
    }

    /// Poll until the execution reaches a terminal status.
    pub async fn wait_for(&self, execution_id: Uuid) -> WorkflowExecution {
        self.wait_until(execution_id, |execution| execution.status.is_terminal())
            .await
    }

    pub async fn wait_until(
        &self,
        execution_id: Uuid,
        done: impl Fn(&WorkflowExecution) -> bool,
    ) -> WorkflowExecution {
        for _ in 0..500 {
            if let Some(execution) = self.workflows.get_execution(execution_id).await.unwrap() {
                if done(&execution) {
                    return execution;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution {} did not reach the expected state", execution_id);
    }

    /// Poll until `count` executions exist for the workflow and all are terminal.
    pub async fn wait_for_workflow(&self, workflow_id: Uuid, count: usize) -> Vec<WorkflowExecution> {
        for _ in 0..500 {
            let executions = self.workflows.executions_of(workflow_id);
            if executions.len() >= count && executions.iter().all(|e| e.status.is_terminal()) {
                return executions;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("workflow {} did not finish {} executions", workflow_id, count);
    }
}

// ============================================
// HTTP
// ============================================

pub fn request(method: &str, uri: &str, tenant_id: Option<Uuid>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(tenant_id) = tenant_id {
        builder = builder.header("X-Tenant-Id", tenant_id.to_string());
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}
