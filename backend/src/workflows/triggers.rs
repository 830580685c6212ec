// Workflow Triggers - which domain events start a workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::conditions::Condition;
use crate::events::EventType;
use crate::validation::ValidationError;

/// Types of events that can trigger workflows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    ContactCreated,
    ContactUpdated,
    ContactStatusChanged,
    CompanyCreated,
    CompanyUpdated,
    CompanyStatusChanged,
    ActivityCreated,
    ActivityCompleted,
    ReminderDue,
    SegmentMembershipChanged,
}

impl TriggerType {
    pub const ALL: [TriggerType; 10] = [
        TriggerType::ContactCreated,
        TriggerType::ContactUpdated,
        TriggerType::ContactStatusChanged,
        TriggerType::CompanyCreated,
        TriggerType::CompanyUpdated,
        TriggerType::CompanyStatusChanged,
        TriggerType::ActivityCreated,
        TriggerType::ActivityCompleted,
        TriggerType::ReminderDue,
        TriggerType::SegmentMembershipChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContactCreated => "CONTACT_CREATED",
            Self::ContactUpdated => "CONTACT_UPDATED",
            Self::ContactStatusChanged => "CONTACT_STATUS_CHANGED",
            Self::CompanyCreated => "COMPANY_CREATED",
            Self::CompanyUpdated => "COMPANY_UPDATED",
            Self::CompanyStatusChanged => "COMPANY_STATUS_CHANGED",
            Self::ActivityCreated => "ACTIVITY_CREATED",
            Self::ActivityCompleted => "ACTIVITY_COMPLETED",
            Self::ReminderDue => "REMINDER_DUE",
            Self::SegmentMembershipChanged => "SEGMENT_MEMBERSHIP_CHANGED",
        }
    }

    /// The trigger type an event dispatches to. Deletions start no workflows.
    pub fn for_event(event_type: EventType) -> Option<TriggerType> {
        match event_type {
            EventType::ContactCreated => Some(Self::ContactCreated),
            EventType::ContactUpdated => Some(Self::ContactUpdated),
            EventType::ContactStatusChanged => Some(Self::ContactStatusChanged),
            EventType::CompanyCreated => Some(Self::CompanyCreated),
            EventType::CompanyUpdated => Some(Self::CompanyUpdated),
            EventType::CompanyStatusChanged => Some(Self::CompanyStatusChanged),
            EventType::ActivityCreated => Some(Self::ActivityCreated),
            EventType::ActivityCompleted => Some(Self::ActivityCompleted),
            EventType::ReminderDue => Some(Self::ReminderDue),
            EventType::SegmentContactAdded | EventType::SegmentContactRemoved => {
                Some(Self::SegmentMembershipChanged)
            }
            EventType::ContactDeleted | EventType::CompanyDeleted => None,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown trigger type '{}'", s))
    }
}

/// A persisted trigger belonging to one workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTrigger {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_type: TriggerType,
    pub conditions: Option<Condition>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowTrigger {
    /// True when the trigger has no condition or its condition holds for the
    /// serialized event envelope.
    pub fn matches(&self, envelope: &serde_json::Value) -> bool {
        self.conditions
            .as_ref()
            .map_or(true, |condition| condition.evaluate(envelope))
    }
}

/// Trigger as submitted by an API caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrigger {
    pub trigger_type: String,
    #[serde(default)]
    pub conditions: Option<serde_json::Value>,
}

/// A validated trigger ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSpec {
    pub trigger_type: TriggerType,
    pub conditions: Option<Condition>,
}

impl NewTrigger {
    pub fn validate(&self) -> Result<TriggerSpec, ValidationError> {
        let mut errors = ValidationError::default();

        let trigger_type = match self.trigger_type.parse::<TriggerType>() {
            Ok(t) => Some(t),
            Err(message) => {
                errors.add("triggerType", message);
                None
            }
        };

        let conditions = match &self.conditions {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => match serde_json::from_value::<Condition>(raw.clone()) {
                Ok(condition) => Some(condition),
                Err(err) => {
                    errors.add("conditions", format!("conditions is not a valid condition: {}", err));
                    None
                }
            },
        };

        match trigger_type {
            Some(trigger_type) if errors.is_empty() => Ok(TriggerSpec { trigger_type, conditions }),
            _ => Err(errors),
        }
    }
}
