// Workflow Executor - runs one execution's action chain

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::actions::WorkflowAction;
use super::context::ExecutionContext;
use super::execution::{ExecutionStatus, LogEntry, WorkflowExecution};
use super::handlers::{ActionError, HandlerContext, HandlerRegistry};
use crate::store::{StoreResult, WorkflowStore};

const CONDITION_NOT_MET: &str = "Condition not met";

/// What a single action produced
enum StepOutcome {
    Done,
    Failed,
    Canceled,
}

pub struct WorkflowExecutor {
    store: Arc<dyn WorkflowStore>,
    handlers: Arc<HandlerRegistry>,
}

impl WorkflowExecutor {
    pub fn new(store: Arc<dyn WorkflowStore>, handlers: Arc<HandlerRegistry>) -> Self {
        Self { store, handlers }
    }

    /// Run an execution to a terminal status. Never panics or propagates:
    /// errors are logged and, where the row still exists, reflected in its
    /// status. Returns the status the run ended with, or `None` when it did
    /// not run at all.
    pub async fn run(&self, execution_id: Uuid, cancel: CancellationToken) -> Option<ExecutionStatus> {
        match self.try_run(execution_id, &cancel).await {
            Ok(status) => status,
            Err(e) => {
                error!(execution_id = %execution_id, "Workflow execution aborted: {}", e);
                self.finish(execution_id, ExecutionStatus::Failed).await;
                Some(ExecutionStatus::Failed)
            }
        }
    }

    async fn try_run(&self, execution_id: Uuid, cancel: &CancellationToken) -> StoreResult<Option<ExecutionStatus>> {
        let Some(execution) = self.store.get_execution(execution_id).await? else {
            error!(execution_id = %execution_id, "Execution not found");
            return Ok(None);
        };

        let Some(workflow) = self.store.get_workflow(execution.tenant_id, execution.workflow_id).await? else {
            error!(
                execution_id = %execution_id,
                workflow_id = %execution.workflow_id,
                "Workflow for execution no longer exists"
            );
            self.finish(execution_id, ExecutionStatus::Failed).await;
            return Ok(Some(ExecutionStatus::Failed));
        };
        let actions = self.store.list_actions(workflow.id).await?;

        if !self.store.start_execution(execution_id, Utc::now()).await? {
            // Canceled before it got a chance to start.
            debug!(execution_id = %execution_id, "Execution is no longer pending; skipping");
            return Ok(None);
        }

        info!(
            execution_id = %execution_id,
            workflow_id = %workflow.id,
            actions = actions.len(),
            "Running workflow '{}'",
            workflow.name
        );
        let started = Instant::now();
        let status = self.run_actions(&execution, actions, cancel).await?;

        if status != ExecutionStatus::Canceled {
            self.finish(execution_id, status).await;
        }
        info!(
            execution_id = %execution_id,
            status = %status,
            duration_ms = started.elapsed().as_millis() as u64,
            "Workflow execution finished"
        );
        Ok(Some(status))
    }

    async fn run_actions(
        &self,
        execution: &WorkflowExecution,
        actions: Vec<WorkflowAction>,
        cancel: &CancellationToken,
    ) -> StoreResult<ExecutionStatus> {
        let mut context = execution.context.clone();
        context.clear_results();

        for action in &actions {
            if cancel.is_cancelled() {
                return Ok(ExecutionStatus::Canceled);
            }
            match self.run_action(execution, action, &mut context, cancel).await? {
                StepOutcome::Done => {}
                StepOutcome::Failed => return Ok(ExecutionStatus::Failed),
                StepOutcome::Canceled => return Ok(ExecutionStatus::Canceled),
            }
        }
        Ok(ExecutionStatus::Completed)
    }

    async fn run_action(
        &self,
        execution: &WorkflowExecution,
        action: &WorkflowAction,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> StoreResult<StepOutcome> {
        if let Some(condition) = &action.execute_condition {
            if !condition.evaluate(&context.to_json()) {
                debug!(execution_id = %execution.id, action_id = %action.id, "Action skipped");
                let entry = LogEntry::skipped(action, CONDITION_NOT_MET);
                self.store.append_step(execution.id, &entry, context).await?;
                return Ok(StepOutcome::Done);
            }
        }

        let params = context.render(&action.params);
        let result = match self.handlers.get(action.action_type) {
            Some(handler) => {
                let ctx = HandlerContext {
                    execution_id: execution.id,
                    workflow_id: execution.workflow_id,
                    action_id: action.id,
                    context,
                    cancel,
                };
                handler.execute(&params, &ctx).await
            }
            None => Err(ActionError::NoHandler(action.action_type)),
        };

        match result {
            // A committed side effect is always logged, even when a cancel
            // landed while the handler ran; the cancel then stops the chain.
            Ok(value) => {
                context.record_result(action.id, value.clone());
                let entry = LogEntry::success(action, value);
                self.store.append_step(execution.id, &entry, context).await?;
                if cancel.is_cancelled() {
                    info!(execution_id = %execution.id, action_id = %action.id, "Execution canceled");
                    return Ok(StepOutcome::Canceled);
                }
                Ok(StepOutcome::Done)
            }
            Err(_) if cancel.is_cancelled() => {
                info!(execution_id = %execution.id, action_id = %action.id, "Execution canceled");
                Ok(StepOutcome::Canceled)
            }
            Err(ActionError::Canceled) => Ok(StepOutcome::Canceled),
            Err(e) => {
                warn!(
                    execution_id = %execution.id,
                    action_id = %action.id,
                    action_type = %action.action_type,
                    "Action failed: {}",
                    e
                );
                let entry = LogEntry::failed(action, e.to_string());
                self.store.append_step(execution.id, &entry, context).await?;
                Ok(StepOutcome::Failed)
            }
        }
    }

    async fn finish(&self, execution_id: Uuid, status: ExecutionStatus) {
        if let Err(e) = self.store.finish_execution(execution_id, status, Utc::now()).await {
            error!(execution_id = %execution_id, "Failed to mark execution {}: {}", status, e);
        }
    }
}
