// Workflow Automation Engine
//
// Tenant-scoped trigger/condition/action rules. Domain events published on
// the bus are matched against active triggers; each match becomes a
// persisted execution whose ordered action chain runs in the background.

pub mod actions;
pub mod conditions;
pub mod context;
pub mod definition;
pub mod engine;
pub mod execution;
pub mod executor;
pub mod handlers;
pub mod scheduler;
pub mod triggers;

pub use actions::{ActionLimits, ActionSpec, ActionType, NewAction, WorkflowAction};
pub use conditions::Condition;
pub use context::ExecutionContext;
pub use definition::{NewWorkflow, UpdateWorkflow, ValidatedWorkflow, Workflow, WorkflowDefinition};
pub use engine::{ManualRun, WorkflowEngine, WorkflowError};
pub use execution::{ExecutionStatus, LogEntry, NewExecution, StepStatus, WorkflowExecution};
pub use executor::WorkflowExecutor;
pub use handlers::{HandlerDeps, HandlerRegistry};
pub use scheduler::ExecutionScheduler;
pub use triggers::{NewTrigger, TriggerSpec, TriggerType, WorkflowTrigger};
