// Workflow Engine - event intake, trigger matching and the definition API

use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::actions::{ActionLimits, NewAction, WorkflowAction};
use super::context::ExecutionContext;
use super::definition::{
    validate_actions, validate_triggers, NewWorkflow, UpdateWorkflow, Workflow, WorkflowDefinition,
};
use super::execution::{ExecutionStatus, WorkflowExecution};
use super::scheduler::ExecutionScheduler;
use super::triggers::{NewTrigger, TriggerType, WorkflowTrigger};
use crate::events::{EventBus, EventEnvelope, EventType, SubscriptionId};
use crate::store::{StoreError, WorkflowStore};
use crate::validation::ValidationError;

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),
    #[error("workflow {0} is not active")]
    Inactive(Uuid),
    #[error("execution {id} already finished with status {status}")]
    AlreadyFinished { id: Uuid, status: ExecutionStatus },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Body of a manual run: the record the workflow should act on
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualRun {
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ManualRun {
    fn validate(&self) -> Result<(String, Uuid), ValidationError> {
        let mut errors = ValidationError::default();
        let entity_type = crate::validation::string::required(self.entity_type.as_deref(), "entityType", &mut errors);
        if self.entity_id.is_none() {
            errors.add("entityId", "entityId is required");
        }
        match (entity_type, self.entity_id) {
            (Some(entity_type), Some(entity_id)) if errors.is_empty() => Ok((entity_type, entity_id)),
            _ => Err(errors),
        }
    }
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    scheduler: Arc<ExecutionScheduler>,
    limits: ActionLimits,
    runtime: Handle,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl WorkflowEngine {
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn WorkflowStore>, scheduler: Arc<ExecutionScheduler>, limits: ActionLimits) -> Self {
        Self {
            store,
            scheduler,
            limits,
            runtime: Handle::current(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn scheduler(&self) -> &ExecutionScheduler {
        &self.scheduler
    }

    // ==================== Event intake ====================

    /// Register a listener for every event type some trigger type maps to.
    /// Each delivery is detached onto the runtime; the publisher never waits.
    pub fn start(self: &Arc<Self>, bus: &EventBus) {
        let mut ids = Vec::new();
        for event_type in EventType::ALL.iter().copied() {
            if TriggerType::for_event(event_type).is_none() {
                continue;
            }
            let engine = Arc::clone(self);
            let id = bus.subscribe(
                event_type,
                Arc::new(move |event_type: EventType, envelope: &EventEnvelope| {
                    let engine = engine.clone();
                    let envelope = envelope.clone();
                    let runtime = engine.runtime.clone();
                    runtime.spawn(async move {
                        if let Err(e) = engine.handle_event(event_type, &envelope).await {
                            error!(event = %event_type, tenant_id = %envelope.tenant_id, "Workflow matching failed: {}", e);
                        }
                    });
                }),
            );
            ids.push(id);
        }

        info!(listeners = ids.len(), "Workflow engine subscribed to domain events");
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.extend(ids);
        }
    }

    pub fn stop(&self, bus: &EventBus) {
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            for id in subscriptions.drain(..) {
                bus.unsubscribe(id);
            }
        }
    }

    /// Match an event against the tenant's active triggers and schedule one
    /// execution per matching trigger. Returns the scheduled executions.
    pub async fn handle_event(
        &self,
        event_type: EventType,
        envelope: &EventEnvelope,
    ) -> WorkflowResult<Vec<WorkflowExecution>> {
        let Some(trigger_type) = TriggerType::for_event(event_type) else {
            return Ok(Vec::new());
        };

        let triggers = self.store.find_active_triggers(envelope.tenant_id, trigger_type).await?;
        if triggers.is_empty() {
            return Ok(Vec::new());
        }

        let document = serde_json::to_value(envelope).unwrap_or(Value::Null);
        let mut scheduled = Vec::new();
        for trigger in triggers.iter().filter(|t| t.matches(&document)) {
            let context = ExecutionContext::new(envelope.clone());
            match self.scheduler.schedule(trigger.workflow_id, Some(trigger.id), context).await {
                Ok(execution) => {
                    debug!(
                        execution_id = %execution.id,
                        workflow_id = %trigger.workflow_id,
                        trigger_id = %trigger.id,
                        "Scheduled execution for {}",
                        event_type
                    );
                    scheduled.push(execution);
                }
                Err(e) => error!(
                    workflow_id = %trigger.workflow_id,
                    trigger_id = %trigger.id,
                    "Failed to schedule execution: {}",
                    e
                ),
            }
        }

        if !scheduled.is_empty() {
            info!(
                event = %event_type,
                tenant_id = %envelope.tenant_id,
                candidates = triggers.len(),
                scheduled = scheduled.len(),
                "Workflows triggered"
            );
        }
        Ok(scheduled)
    }

    // ==================== Manual runs & executions ====================

    /// Start an execution for an active workflow outside any trigger. Returns
    /// the PENDING execution; the run itself continues in the background.
    pub async fn trigger_manually(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        actor: Option<Uuid>,
        run: ManualRun,
    ) -> WorkflowResult<WorkflowExecution> {
        let (entity_type, entity_id) = run.validate()?;
        let workflow = self.require_workflow(tenant_id, workflow_id).await?;
        if !workflow.is_active {
            return Err(WorkflowError::Inactive(workflow_id));
        }

        let mut envelope = EventEnvelope::new(tenant_id, entity_type, entity_id);
        if let Some(actor) = actor {
            envelope = envelope.with_actor(actor);
        }
        if let Some(data) = run.data {
            envelope = envelope.with_data(data);
        }

        let execution = self
            .scheduler
            .schedule(workflow_id, None, ExecutionContext::new(envelope))
            .await?;
        info!(execution_id = %execution.id, workflow_id = %workflow_id, "Manual workflow run scheduled");
        Ok(execution)
    }

    pub async fn get_execution(&self, tenant_id: Uuid, execution_id: Uuid) -> WorkflowResult<WorkflowExecution> {
        self.store
            .get_execution(execution_id)
            .await?
            .filter(|execution| execution.tenant_id == tenant_id)
            .ok_or(WorkflowError::ExecutionNotFound(execution_id))
    }

    /// Most recent executions of a workflow, newest first.
    pub async fn history(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        limit: Option<i64>,
    ) -> WorkflowResult<Vec<WorkflowExecution>> {
        self.require_workflow(tenant_id, workflow_id).await?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.store.list_executions(tenant_id, workflow_id, limit).await?)
    }

    /// Mark a pending or running execution CANCELED and stop its run before
    /// the next action.
    pub async fn cancel(&self, tenant_id: Uuid, execution_id: Uuid) -> WorkflowResult<WorkflowExecution> {
        let execution = self.get_execution(tenant_id, execution_id).await?;
        if execution.status.is_terminal() {
            return Err(WorkflowError::AlreadyFinished {
                id: execution_id,
                status: execution.status,
            });
        }

        let canceled = self
            .store
            .finish_execution(execution_id, ExecutionStatus::Canceled, chrono::Utc::now())
            .await?;
        let signalled = self.scheduler.cancel(execution_id);
        let current = self.get_execution(tenant_id, execution_id).await?;
        if !canceled {
            return Err(WorkflowError::AlreadyFinished {
                id: execution_id,
                status: current.status,
            });
        }

        info!(execution_id = %execution_id, signalled, "Execution canceled");
        Ok(current)
    }

    // ==================== Definitions ====================

    pub async fn list_workflows(&self, tenant_id: Uuid) -> WorkflowResult<Vec<Workflow>> {
        Ok(self.store.list_workflows(tenant_id).await?)
    }

    pub async fn get_workflow(&self, tenant_id: Uuid, workflow_id: Uuid) -> WorkflowResult<WorkflowDefinition> {
        self.store
            .get_definition(tenant_id, workflow_id)
            .await?
            .ok_or(WorkflowError::WorkflowNotFound(workflow_id))
    }

    pub async fn create_workflow(
        &self,
        tenant_id: Uuid,
        created_by: Option<Uuid>,
        request: NewWorkflow,
    ) -> WorkflowResult<WorkflowDefinition> {
        let validated = request.validate(self.limits)?;
        let definition = self.store.create_workflow(tenant_id, created_by, validated).await?;
        info!(
            workflow_id = %definition.workflow.id,
            tenant_id = %tenant_id,
            triggers = definition.triggers.len(),
            actions = definition.actions.len(),
            "Workflow created"
        );
        Ok(definition)
    }

    pub async fn update_workflow(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        update: UpdateWorkflow,
    ) -> WorkflowResult<Workflow> {
        update.validate()?;
        self.store
            .update_workflow(tenant_id, workflow_id, update)
            .await?
            .ok_or(WorkflowError::WorkflowNotFound(workflow_id))
    }

    pub async fn delete_workflow(&self, tenant_id: Uuid, workflow_id: Uuid) -> WorkflowResult<()> {
        if !self.store.delete_workflow(tenant_id, workflow_id).await? {
            return Err(WorkflowError::WorkflowNotFound(workflow_id));
        }
        info!(workflow_id = %workflow_id, "Workflow deleted");
        Ok(())
    }

    pub async fn replace_triggers(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        triggers: Vec<NewTrigger>,
    ) -> WorkflowResult<Vec<WorkflowTrigger>> {
        let specs = validate_triggers(&triggers)?;
        self.store
            .replace_triggers(tenant_id, workflow_id, specs)
            .await
            .map_err(|e| not_found_as(e, workflow_id))
    }

    pub async fn replace_actions(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        actions: Vec<NewAction>,
    ) -> WorkflowResult<Vec<WorkflowAction>> {
        let specs = validate_actions(&actions, self.limits)?;
        self.store
            .replace_actions(tenant_id, workflow_id, specs)
            .await
            .map_err(|e| not_found_as(e, workflow_id))
    }

    pub async fn ping(&self) -> bool {
        self.store.ping().await
    }

    async fn require_workflow(&self, tenant_id: Uuid, workflow_id: Uuid) -> WorkflowResult<Workflow> {
        self.store
            .get_workflow(tenant_id, workflow_id)
            .await?
            .ok_or(WorkflowError::WorkflowNotFound(workflow_id))
    }
}

fn not_found_as(err: StoreError, workflow_id: Uuid) -> WorkflowError {
    match err {
        StoreError::NotFound(_) => WorkflowError::WorkflowNotFound(workflow_id),
        other => {
            warn!(workflow_id = %workflow_id, "Store error: {}", other);
            WorkflowError::Store(other)
        }
    }
}
