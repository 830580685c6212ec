// Execution Scheduler - persists PENDING executions and detaches their runs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use super::context::ExecutionContext;
use super::execution::{NewExecution, WorkflowExecution};
use super::executor::WorkflowExecutor;
use crate::store::{StoreResult, WorkflowStore};

/// Hands executions to background tasks. Callers get the persisted row back
/// immediately and never a handle to await.
pub struct ExecutionScheduler {
    store: Arc<dyn WorkflowStore>,
    executor: Arc<WorkflowExecutor>,
    runtime: Handle,
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl ExecutionScheduler {
    /// Must be called from within a tokio runtime; runs are spawned onto it.
    pub fn new(store: Arc<dyn WorkflowStore>, executor: Arc<WorkflowExecutor>) -> Self {
        Self {
            store,
            executor,
            runtime: Handle::current(),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist a PENDING execution and spawn its run.
    pub async fn schedule(
        &self,
        workflow_id: Uuid,
        trigger_id: Option<Uuid>,
        context: ExecutionContext,
    ) -> StoreResult<WorkflowExecution> {
        let execution = self
            .store
            .create_execution(NewExecution::new(workflow_id, trigger_id, context))
            .await?;
        self.dispatch(execution.id);
        Ok(execution)
    }

    fn dispatch(&self, execution_id: Uuid) {
        let cancel = CancellationToken::new();
        if let Ok(mut running) = self.running.lock() {
            running.insert(execution_id, cancel.clone());
        }

        let executor = self.executor.clone();
        let running = self.running.clone();
        self.runtime.spawn(async move {
            let status = executor.run(execution_id, cancel).await;
            debug!(execution_id = %execution_id, ?status, "Execution task exited");
            match running.lock() {
                Ok(mut running) => {
                    running.remove(&execution_id);
                }
                Err(_) => error!(execution_id = %execution_id, "Run registry lock poisoned"),
            }
        });
    }

    /// Signal a running execution to stop. Returns false when no run for
    /// it is in flight in this process.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        match self.running.lock() {
            Ok(running) => match running.get(&execution_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.running.lock().map(|running| running.len()).unwrap_or(0)
    }
}
