use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{StoreError, StoreResult, WorkflowStore};
use crate::workflows::context::ExecutionContext;
use crate::workflows::{
    ActionSpec, ActionType, Condition, ExecutionStatus, LogEntry, NewExecution, TriggerSpec, TriggerType,
    UpdateWorkflow, ValidatedWorkflow, Workflow, WorkflowAction, WorkflowDefinition, WorkflowExecution,
    WorkflowTrigger,
};

/// PostgreSQL-backed workflow store.
#[derive(Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    description: Option<String>,
    is_active: bool,
    created_by_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<WorkflowRow> for Workflow {
    fn from(row: WorkflowRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            created_by_id: row.created_by_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TriggerRow {
    id: Uuid,
    workflow_id: Uuid,
    trigger_type: String,
    conditions: Option<Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TriggerRow> for WorkflowTrigger {
    type Error = StoreError;

    fn try_from(row: TriggerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            trigger_type: row.trigger_type.parse::<TriggerType>().map_err(StoreError::Corrupt)?,
            conditions: decode_condition(row.conditions, row.id)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ActionRow {
    id: Uuid,
    workflow_id: Uuid,
    action_type: String,
    action_order: i32,
    params: Value,
    execute_condition: Option<Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActionRow> for WorkflowAction {
    type Error = StoreError;

    fn try_from(row: ActionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            workflow_id: row.workflow_id,
            action_type: row.action_type.parse::<ActionType>().map_err(StoreError::Corrupt)?,
            order: row.action_order,
            params: row.params,
            execute_condition: decode_condition(row.execute_condition, row.id)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: Uuid,
    tenant_id: Uuid,
    workflow_id: Uuid,
    trigger_id: Option<Uuid>,
    entity_type: String,
    entity_id: Uuid,
    status: String,
    context: Value,
    log: Value,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for WorkflowExecution {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str, err: serde_json::Error| {
            StoreError::Corrupt(format!("execution {} {}: {}", row.id, what, err))
        };
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            workflow_id: row.workflow_id,
            trigger_id: row.trigger_id,
            entity_type: row.entity_type.clone(),
            entity_id: row.entity_id,
            status: row.status.parse::<ExecutionStatus>().map_err(StoreError::Corrupt)?,
            context: serde_json::from_value(row.context.clone()).map_err(|e| corrupt("context", e))?,
            log: serde_json::from_value(row.log.clone()).map_err(|e| corrupt("log", e))?,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        })
    }
}

fn decode_condition(raw: Option<Value>, owner: Uuid) -> StoreResult<Option<Condition>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("condition on {}: {}", owner, e))),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

const WORKFLOW_COLUMNS: &str = "id, tenant_id, name, description, is_active, created_by_id, created_at, updated_at";
const TRIGGER_COLUMNS: &str = "id, workflow_id, trigger_type, conditions, created_at";
const ACTION_COLUMNS: &str =
    "id, workflow_id, action_type, action_order, params, execute_condition, created_at";
const EXECUTION_COLUMNS: &str = "id, tenant_id, workflow_id, trigger_id, entity_type, entity_id, status, \
     context, log, started_at, completed_at, created_at";

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

async fn lock_workflow(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    workflow_id: Uuid,
) -> StoreResult<()> {
    let found: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM workflows WHERE id = $1 AND tenant_id = $2 FOR UPDATE")
            .bind(workflow_id)
            .bind(tenant_id)
            .fetch_optional(&mut **tx)
            .await?;
    found
        .map(|_| ())
        .ok_or_else(|| StoreError::NotFound(format!("Workflow {}", workflow_id)))
}

async fn insert_triggers(
    tx: &mut Transaction<'_, Postgres>,
    workflow_id: Uuid,
    triggers: Vec<TriggerSpec>,
    now: DateTime<Utc>,
) -> StoreResult<Vec<WorkflowTrigger>> {
    let mut inserted = Vec::with_capacity(triggers.len());
    for spec in triggers {
        let trigger = WorkflowTrigger {
            id: Uuid::new_v4(),
            workflow_id,
            trigger_type: spec.trigger_type,
            conditions: spec.conditions,
            created_at: now,
        };
        let conditions = trigger.conditions.as_ref().map(encode).transpose()?;

        sqlx::query(
            "INSERT INTO workflow_triggers (id, workflow_id, trigger_type, conditions, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(trigger.id)
        .bind(workflow_id)
        .bind(trigger.trigger_type.as_str())
        .bind(conditions)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        inserted.push(trigger);
    }
    Ok(inserted)
}

async fn insert_actions(
    tx: &mut Transaction<'_, Postgres>,
    workflow_id: Uuid,
    actions: Vec<ActionSpec>,
    now: DateTime<Utc>,
) -> StoreResult<Vec<WorkflowAction>> {
    let mut inserted = Vec::with_capacity(actions.len());
    // Rows are inserted in submission order so `seq` breaks order ties.
    for spec in actions {
        let action = WorkflowAction {
            id: Uuid::new_v4(),
            workflow_id,
            action_type: spec.action_type,
            order: spec.order,
            params: spec.params,
            execute_condition: spec.execute_condition,
            created_at: now,
        };
        let execute_condition = action.execute_condition.as_ref().map(encode).transpose()?;

        sqlx::query(
            "INSERT INTO workflow_actions \
             (id, workflow_id, action_type, action_order, params, execute_condition, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(action.id)
        .bind(workflow_id)
        .bind(action.action_type.as_str())
        .bind(action.order)
        .bind(&action.params)
        .bind(execute_condition)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        inserted.push(action);
    }
    inserted.sort_by_key(|a| a.order);
    Ok(inserted)
}

async fn touch_workflow(tx: &mut Transaction<'_, Postgres>, workflow_id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
    sqlx::query("UPDATE workflows SET updated_at = $2 WHERE id = $1")
        .bind(workflow_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// WorkflowStore
// ---------------------------------------------------------------------------

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn create_workflow(
        &self,
        tenant_id: Uuid,
        created_by: Option<Uuid>,
        workflow: ValidatedWorkflow,
    ) -> StoreResult<WorkflowDefinition> {
        let now = Utc::now();
        let record = Workflow {
            id: Uuid::new_v4(),
            tenant_id,
            name: workflow.name,
            description: workflow.description,
            is_active: workflow.is_active,
            created_by_id: created_by,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO workflows (id, tenant_id, name, description, is_active, created_by_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(tenant_id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(record.is_active)
        .bind(created_by)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let triggers = insert_triggers(&mut tx, record.id, workflow.triggers, now).await?;
        let actions = insert_actions(&mut tx, record.id, workflow.actions, now).await?;

        tx.commit().await?;

        Ok(WorkflowDefinition {
            workflow: record,
            triggers,
            actions,
        })
    }

    async fn list_workflows(&self, tenant_id: Uuid) -> StoreResult<Vec<Workflow>> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE tenant_id = $1 ORDER BY created_at DESC",
            WORKFLOW_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Workflow::from).collect())
    }

    async fn get_workflow(&self, tenant_id: Uuid, workflow_id: Uuid) -> StoreResult<Option<Workflow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE id = $1 AND tenant_id = $2",
            WORKFLOW_COLUMNS
        ))
        .bind(workflow_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Workflow::from))
    }

    async fn get_definition(&self, tenant_id: Uuid, workflow_id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        let Some(workflow) = self.get_workflow(tenant_id, workflow_id).await? else {
            return Ok(None);
        };

        let triggers = sqlx::query_as::<_, TriggerRow>(&format!(
            "SELECT {} FROM workflow_triggers WHERE workflow_id = $1 ORDER BY created_at, id",
            TRIGGER_COLUMNS
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(WorkflowTrigger::try_from)
        .collect::<StoreResult<Vec<_>>>()?;

        let actions = self.list_actions(workflow_id).await?;

        Ok(Some(WorkflowDefinition {
            workflow,
            triggers,
            actions,
        }))
    }

    async fn update_workflow(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        update: UpdateWorkflow,
    ) -> StoreResult<Option<Workflow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "UPDATE workflows SET \
                 name = COALESCE($3, name), \
                 description = COALESCE($4, description), \
                 is_active = COALESCE($5, is_active), \
                 updated_at = NOW() \
             WHERE id = $1 AND tenant_id = $2 \
             RETURNING {}",
            WORKFLOW_COLUMNS
        ))
        .bind(workflow_id)
        .bind(tenant_id)
        .bind(update.name)
        .bind(update.description)
        .bind(update.is_active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Workflow::from))
    }

    async fn delete_workflow(&self, tenant_id: Uuid, workflow_id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        match lock_workflow(&mut tx, tenant_id, workflow_id).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        }

        for table in ["workflow_executions", "workflow_actions", "workflow_triggers"] {
            sqlx::query(&format!("DELETE FROM {} WHERE workflow_id = $1", table))
                .bind(workflow_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn replace_triggers(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        triggers: Vec<TriggerSpec>,
    ) -> StoreResult<Vec<WorkflowTrigger>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        lock_workflow(&mut tx, tenant_id, workflow_id).await?;

        sqlx::query("DELETE FROM workflow_triggers WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;
        let inserted = insert_triggers(&mut tx, workflow_id, triggers, now).await?;
        touch_workflow(&mut tx, workflow_id, now).await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn replace_actions(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        actions: Vec<ActionSpec>,
    ) -> StoreResult<Vec<WorkflowAction>> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        lock_workflow(&mut tx, tenant_id, workflow_id).await?;

        sqlx::query("DELETE FROM workflow_actions WHERE workflow_id = $1")
            .bind(workflow_id)
            .execute(&mut *tx)
            .await?;
        let inserted = insert_actions(&mut tx, workflow_id, actions, now).await?;
        touch_workflow(&mut tx, workflow_id, now).await?;

        tx.commit().await?;
        Ok(inserted)
    }

    async fn find_active_triggers(
        &self,
        tenant_id: Uuid,
        trigger_type: TriggerType,
    ) -> StoreResult<Vec<WorkflowTrigger>> {
        let rows = sqlx::query_as::<_, TriggerRow>(
            "SELECT t.id, t.workflow_id, t.trigger_type, t.conditions, t.created_at \
             FROM workflow_triggers t \
             JOIN workflows w ON w.id = t.workflow_id \
             WHERE t.trigger_type = $1 AND w.tenant_id = $2 AND w.is_active = TRUE \
             ORDER BY w.created_at, t.created_at",
        )
        .bind(trigger_type.as_str())
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        // A trigger that no longer decodes must not block the others.
        Ok(rows
            .into_iter()
            .filter_map(|row| match WorkflowTrigger::try_from(row) {
                Ok(trigger) => Some(trigger),
                Err(err) => {
                    tracing::warn!(error = %err, "Skipping undecodable workflow trigger");
                    None
                }
            })
            .collect())
    }

    async fn list_actions(&self, workflow_id: Uuid) -> StoreResult<Vec<WorkflowAction>> {
        sqlx::query_as::<_, ActionRow>(&format!(
            "SELECT {} FROM workflow_actions WHERE workflow_id = $1 ORDER BY action_order, seq",
            ACTION_COLUMNS
        ))
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(WorkflowAction::try_from)
        .collect()
    }

    async fn create_execution(&self, execution: NewExecution) -> StoreResult<WorkflowExecution> {
        let execution = execution.into_execution(Uuid::new_v4(), Utc::now());

        sqlx::query(
            "INSERT INTO workflow_executions \
             (id, tenant_id, workflow_id, trigger_id, entity_type, entity_id, status, context, log, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, '[]'::jsonb, $9)",
        )
        .bind(execution.id)
        .bind(execution.tenant_id)
        .bind(execution.workflow_id)
        .bind(execution.trigger_id)
        .bind(&execution.entity_type)
        .bind(execution.entity_id)
        .bind(execution.status.as_str())
        .bind(encode(&execution.context)?)
        .bind(execution.created_at)
        .execute(&self.pool)
        .await?;

        Ok(execution)
    }

    async fn get_execution(&self, execution_id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM workflow_executions WHERE id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?
        .map(WorkflowExecution::try_from)
        .transpose()
    }

    async fn list_executions(
        &self,
        tenant_id: Uuid,
        workflow_id: Uuid,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowExecution>> {
        sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {} FROM workflow_executions \
             WHERE workflow_id = $1 AND tenant_id = $2 \
             ORDER BY created_at DESC LIMIT $3",
            EXECUTION_COLUMNS
        ))
        .bind(workflow_id)
        .bind(tenant_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(WorkflowExecution::try_from)
        .collect()
    }

    async fn start_execution(&self, execution_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE workflow_executions \
             SET status = 'RUNNING', started_at = $2, log = '[]'::jsonb \
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(execution_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn append_step(&self, execution_id: Uuid, entry: &LogEntry, context: &ExecutionContext) -> StoreResult<()> {
        sqlx::query(
            "UPDATE workflow_executions \
             SET log = log || jsonb_build_array($2::jsonb), context = $3 \
             WHERE id = $1",
        )
        .bind(execution_id)
        .bind(encode(entry)?)
        .bind(encode(context)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE workflow_executions \
             SET status = $2, completed_at = $3 \
             WHERE id = $1 AND status IN ('PENDING', 'RUNNING')",
        )
        .bind(execution_id)
        .bind(status.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn ping(&self) -> bool {
        crate::database::health_check(&self.pool).await
    }
}
