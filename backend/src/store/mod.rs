// Persistence seams for the workflow engine.
//
// The engine and the HTTP handlers only see these traits; `PgWorkflowStore`
// and `PgCrmStore` are the production implementations.

pub mod crm;
pub mod workflows;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use atrium_shared::{
    Activity, Company, CompanyPatch, Contact, ContactPatch, NewActivity, NewReminder, Reminder, Segment, User,
};

use crate::workflows::{
    ActionSpec, ExecutionStatus, LogEntry, NewExecution, TriggerSpec, TriggerType, UpdateWorkflow,
    ValidatedWorkflow, Workflow, WorkflowAction, WorkflowDefinition, WorkflowExecution, WorkflowTrigger,
};
use crate::workflows::context::ExecutionContext;

pub use crm::PgCrmStore;
pub use workflows::PgWorkflowStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A stored document could not be decoded into its domain type.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Workflow definitions and executions
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert the workflow, its triggers and its actions atomically.
    async fn create_workflow(
        &self,
        tenant_id: Uuid,
        created_by: Option<Uuid>,
        workflow: ValidatedWorkflow,
    ) -> StoreResult<WorkflowDefinition>;

    async fn list_workflows(&self, tenant_id: Uuid) -> StoreResult<Vec<Workflow>>;

    async fn get_workflow(&self, tenant_id: Uuid, workflow_id: Uuid) -> StoreResult<Option<Workflow>>;

    async fn get_definition(&self, tenant_id: Uuid, workflow_id: Uuid) -> StoreResult<Option<WorkflowDefinition>>;

    async fn update_workflow(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        update: UpdateWorkflow,
    ) -> StoreResult<Option<Workflow>>;

    /// Delete executions, actions and triggers, then the workflow itself.
    /// Returns false when the workflow does not exist in the tenant.
    async fn delete_workflow(&self, tenant_id: Uuid, workflow_id: Uuid) -> StoreResult<bool>;

    async fn replace_triggers(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        triggers: Vec<TriggerSpec>,
    ) -> StoreResult<Vec<WorkflowTrigger>>;

    async fn replace_actions(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        actions: Vec<ActionSpec>,
    ) -> StoreResult<Vec<WorkflowAction>>;

    /// Triggers of `trigger_type` whose workflow is active and in the tenant.
    async fn find_active_triggers(&self, tenant_id: Uuid, trigger_type: TriggerType)
    -> StoreResult<Vec<WorkflowTrigger>>;

    /// Actions ordered by `order`, ties by insertion order.
    async fn list_actions(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowAction>>;

    async fn create_execution(&self, execution: NewExecution) -> StoreResult<WorkflowExecution>;

    async fn get_execution(&self, execution_id: Uuid) -> StoreResult<Option<WorkflowExecution>>;

    async fn list_executions(&self, tenant_id: Uuid, workflow_id: Uuid, limit: i64)
    -> StoreResult<Vec<WorkflowExecution>>;

    /// `PENDING -> RUNNING`, stamping `startedAt` and clearing the log.
    /// Returns false when the execution is no longer pending.
    async fn start_execution(&self, execution_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Append one step and persist the context it produced.
    async fn append_step(&self, execution_id: Uuid, entry: &LogEntry, context: &ExecutionContext) -> StoreResult<()>;

    /// Move a non-terminal execution to `status`, stamping `completedAt`.
    /// Returns false when the execution was already terminal.
    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn ping(&self) -> bool;
}

/// CRM entities touched by workflow actions
#[async_trait]
pub trait CrmStore: Send + Sync {
    async fn get_contact(&self, tenant_id: Uuid, contact_id: Uuid) -> StoreResult<Option<Contact>>;

    async fn update_contact(&self, tenant_id: Uuid, contact_id: Uuid, patch: &ContactPatch)
    -> StoreResult<Option<Contact>>;

    async fn get_company(&self, tenant_id: Uuid, company_id: Uuid) -> StoreResult<Option<Company>>;

    async fn update_company(&self, tenant_id: Uuid, company_id: Uuid, patch: &CompanyPatch)
    -> StoreResult<Option<Company>>;

    async fn create_activity(&self, activity: NewActivity) -> StoreResult<Activity>;

    async fn create_reminder(&self, reminder: NewReminder) -> StoreResult<Reminder>;

    /// Reminders past due that have not been announced yet, across tenants.
    async fn due_reminders(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Reminder>>;

    /// Stamp `due_announced_at`. Returns false when already announced.
    async fn mark_reminder_announced(&self, reminder_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn get_segment(&self, tenant_id: Uuid, segment_id: Uuid) -> StoreResult<Option<Segment>>;

    /// Mark the contact a manual member, inserting the row when missing.
    /// Returns true only for a fresh insert.
    async fn add_segment_member(&self, segment_id: Uuid, contact_id: Uuid) -> StoreResult<bool>;

    /// Returns false when the contact was not a member.
    async fn remove_segment_member(&self, segment_id: Uuid, contact_id: Uuid) -> StoreResult<bool>;

    /// Add `delta` to the cached member count, clamped at zero.
    async fn adjust_segment_count(&self, segment_id: Uuid, delta: i32) -> StoreResult<i32>;

    async fn get_user(&self, tenant_id: Uuid, user_id: Uuid) -> StoreResult<Option<User>>;
}
