// Workflow executions and their append-only step log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::actions::{ActionType, WorkflowAction};
use super::context::ExecutionContext;

/// Lifecycle: `PENDING -> RUNNING -> {COMPLETED, FAILED}`, and `CANCELED`
/// from either non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(format!("unknown execution status '{}'", other)),
        }
    }
}

/// Outcome of one attempted action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// The action's `order`
    pub step: i32,
    pub action_id: Uuid,
    pub action_type: ActionType,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    fn new(action: &WorkflowAction, status: StepStatus) -> Self {
        Self {
            step: action.order,
            action_id: action.id,
            action_type: action.action_type,
            status,
            result: None,
            error: None,
            reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn success(action: &WorkflowAction, result: Value) -> Self {
        Self {
            result: Some(result),
            ..Self::new(action, StepStatus::Success)
        }
    }

    pub fn failed(action: &WorkflowAction, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(action, StepStatus::Failed)
        }
    }

    pub fn skipped(action: &WorkflowAction, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(action, StepStatus::Skipped)
        }
    }
}

/// One runtime instance of a workflow's action chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub workflow_id: Uuid,
    /// `None` for manually started executions
    pub trigger_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub status: ExecutionStatus,
    pub context: ExecutionContext,
    pub log: Vec<LogEntry>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Execution row as first persisted, before any action runs
#[derive(Debug, Clone, PartialEq)]
pub struct NewExecution {
    pub workflow_id: Uuid,
    pub trigger_id: Option<Uuid>,
    pub context: ExecutionContext,
}

impl NewExecution {
    pub fn new(workflow_id: Uuid, trigger_id: Option<Uuid>, context: ExecutionContext) -> Self {
        Self {
            workflow_id,
            trigger_id,
            context,
        }
    }

    /// Materialize the `PENDING` row this request describes.
    pub fn into_execution(self, id: Uuid, created_at: DateTime<Utc>) -> WorkflowExecution {
        WorkflowExecution {
            id,
            tenant_id: self.context.tenant_id(),
            workflow_id: self.workflow_id,
            trigger_id: self.trigger_id,
            entity_type: self.context.entity_type().to_string(),
            entity_id: self.context.entity_id(),
            status: ExecutionStatus::Pending,
            context: self.context,
            log: Vec::new(),
            started_at: None,
            completed_at: None,
            created_at,
        }
    }
}
