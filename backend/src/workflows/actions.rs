// Workflow Actions - the ten built-in action kinds and their parameters

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::conditions::Condition;
use super::context::contains_placeholder;
use crate::validation::{self, ValidationError};

/// Types of actions that workflows can execute
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    UpdateContact,
    UpdateCompany,
    CreateActivity,
    CreateReminder,
    SendEmail,
    AddToSegment,
    RemoveFromSegment,
    AssignToUser,
    Webhook,
    Delay,
}

impl ActionType {
    pub const ALL: [ActionType; 10] = [
        ActionType::UpdateContact,
        ActionType::UpdateCompany,
        ActionType::CreateActivity,
        ActionType::CreateReminder,
        ActionType::SendEmail,
        ActionType::AddToSegment,
        ActionType::RemoveFromSegment,
        ActionType::AssignToUser,
        ActionType::Webhook,
        ActionType::Delay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpdateContact => "UPDATE_CONTACT",
            Self::UpdateCompany => "UPDATE_COMPANY",
            Self::CreateActivity => "CREATE_ACTIVITY",
            Self::CreateReminder => "CREATE_REMINDER",
            Self::SendEmail => "SEND_EMAIL",
            Self::AddToSegment => "ADD_TO_SEGMENT",
            Self::RemoveFromSegment => "REMOVE_FROM_SEGMENT",
            Self::AssignToUser => "ASSIGN_TO_USER",
            Self::Webhook => "WEBHOOK",
            Self::Delay => "DELAY",
        }
    }

    /// Parameter keys that must be present and non-empty.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::UpdateContact | Self::UpdateCompany => &[],
            Self::CreateActivity => &["type"],
            Self::CreateReminder => &["title", "dueDate"],
            Self::SendEmail => &["to", "subject", "body"],
            Self::AddToSegment | Self::RemoveFromSegment => &["segmentId"],
            Self::AssignToUser => &["userId"],
            Self::Webhook => &["url"],
            Self::Delay => &["delayInMinutes"],
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown action type '{}'", s))
    }
}

// ===== Typed parameters =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContactParams {
    pub contact_id: Option<Uuid>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status_id: Option<Uuid>,
    pub assigned_to_id: Option<Uuid>,
}

/// Only the fields listed here can be written; other keys are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCompanyParams {
    pub company_id: Option<Uuid>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub status_id: Option<Uuid>,
    pub assigned_to_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivityParams {
    #[serde(rename = "type")]
    pub activity_type: String,
    pub subject: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "date_param::optional")]
    pub due_date: Option<DateTime<Utc>>,
    pub contact_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReminderParams {
    pub title: String,
    pub description: Option<String>,
    #[serde(deserialize_with = "date_param::required")]
    pub due_date: DateTime<Utc>,
    pub assigned_to_id: Option<Uuid>,
    pub contact_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailParams {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub track_as_activity: bool,
}

/// Dates in params are RFC 3339 timestamps or plain `YYYY-MM-DD` days,
/// the latter read as midnight UTC.
mod date_param {
    use chrono::{DateTime, NaiveDate, Utc};
    use serde::{de::Error, Deserialize, Deserializer};

    fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
            return Some(at.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .map(|at| at.and_utc())
    }

    pub fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(raw.trim()).ok_or_else(|| D::Error::custom(format!("invalid date '{}'", raw)))
    }

    pub fn optional<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(raw.trim())
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid date '{}'", raw))),
        }
    }
}

/// Shared by ADD_TO_SEGMENT and REMOVE_FROM_SEGMENT
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentParams {
    pub segment_id: Uuid,
    pub contact_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignToUserParams {
    pub user_id: Uuid,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookParams {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Extra caller-defined document sent alongside the envelope
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayParams {
    pub delay_in_minutes: f64,
}

/// Parameters parsed for a specific action kind
#[derive(Debug, Clone, PartialEq)]
pub enum ActionParams {
    UpdateContact(UpdateContactParams),
    UpdateCompany(UpdateCompanyParams),
    CreateActivity(CreateActivityParams),
    CreateReminder(CreateReminderParams),
    SendEmail(SendEmailParams),
    AddToSegment(SegmentParams),
    RemoveFromSegment(SegmentParams),
    AssignToUser(AssignToUserParams),
    Webhook(WebhookParams),
    Delay(DelayParams),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamsError {
    #[error("params must be a JSON object")]
    NotAnObject,
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid params: {0}")]
    Invalid(String),
}

fn decode<T: DeserializeOwned>(params: &Value) -> Result<T, ParamsError> {
    serde_json::from_value(params.clone()).map_err(|e| ParamsError::Invalid(e.to_string()))
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Check `kind`'s required keys, then decode `params` into `T`.
pub fn parse_params<T: DeserializeOwned>(kind: ActionType, params: &Value) -> Result<T, ParamsError> {
    let object = params.as_object().ok_or(ParamsError::NotAnObject)?;
    for key in kind.required_params() {
        if object.get(*key).map_or(true, is_blank) {
            return Err(ParamsError::Missing(*key));
        }
    }
    decode(params)
}

impl DelayParams {
    pub fn duration(&self) -> Result<Duration, ParamsError> {
        if !self.delay_in_minutes.is_finite() || self.delay_in_minutes < 0.0 {
            return Err(ParamsError::Invalid(
                "delayInMinutes must be a non-negative number".to_string(),
            ));
        }
        Duration::try_from_secs_f64(self.delay_in_minutes * 60.0)
            .map_err(|_| ParamsError::Invalid("delayInMinutes is out of range".to_string()))
    }
}

impl ActionParams {
    pub fn parse(kind: ActionType, params: &Value) -> Result<Self, ParamsError> {
        Ok(match kind {
            ActionType::UpdateContact => Self::UpdateContact(parse_params(kind, params)?),
            ActionType::UpdateCompany => Self::UpdateCompany(parse_params(kind, params)?),
            ActionType::CreateActivity => Self::CreateActivity(parse_params(kind, params)?),
            ActionType::CreateReminder => Self::CreateReminder(parse_params(kind, params)?),
            ActionType::SendEmail => Self::SendEmail(parse_params(kind, params)?),
            ActionType::AddToSegment => Self::AddToSegment(parse_params(kind, params)?),
            ActionType::RemoveFromSegment => Self::RemoveFromSegment(parse_params(kind, params)?),
            ActionType::AssignToUser => Self::AssignToUser(parse_params(kind, params)?),
            ActionType::Webhook => Self::Webhook(parse_params(kind, params)?),
            ActionType::Delay => {
                let delay: DelayParams = parse_params(kind, params)?;
                delay.duration()?;
                Self::Delay(delay)
            }
        })
    }
}

/// Limits applied when validating action definitions
#[derive(Debug, Clone, Copy)]
pub struct ActionLimits {
    pub max_delay_minutes: u64,
}

/// Validate `params` for `kind` at definition time.
///
/// Values holding `{{...}}` placeholders are only resolved when the action
/// runs, so for templated params only the presence of required keys is
/// checked here.
pub fn validate_params(kind: ActionType, params: &Value, limits: ActionLimits) -> Result<(), ValidationError> {
    let mut errors = ValidationError::default();
    let Some(object) = params.as_object() else {
        return Err(ValidationError::single("params", ParamsError::NotAnObject.to_string()));
    };

    for key in kind.required_params() {
        if object.get(*key).map_or(true, is_blank) {
            errors.add(*key, format!("{} is required", key));
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    if contains_placeholder(params) {
        return Ok(());
    }

    match ActionParams::parse(kind, params) {
        Ok(ActionParams::Delay(delay)) if delay.delay_in_minutes > limits.max_delay_minutes as f64 => {
            errors.add(
                "delayInMinutes",
                format!("delayInMinutes must not exceed {}", limits.max_delay_minutes),
            );
        }
        Ok(ActionParams::Webhook(webhook)) => validation::url::http(&webhook.url, "url", &mut errors),
        Ok(ActionParams::SendEmail(email)) => validation::email::address(&email.to, "to", &mut errors),
        Ok(_) => {}
        Err(err) => errors.add("params", err.to_string()),
    }

    errors.into_result(())
}

// ===== Persisted action =====

/// A persisted action belonging to one workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAction {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub action_type: ActionType,
    pub order: i32,
    pub params: Value,
    pub execute_condition: Option<Condition>,
    pub created_at: DateTime<Utc>,
}

/// Action as submitted by an API caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAction {
    pub action_type: String,
    /// Defaults to the action's position in the submitted list
    #[serde(default)]
    pub order: Option<i32>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub execute_condition: Option<Value>,
}

/// A validated action ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSpec {
    pub action_type: ActionType,
    pub order: i32,
    pub params: Value,
    pub execute_condition: Option<Condition>,
}

impl NewAction {
    pub fn validate(&self, position: usize, limits: ActionLimits) -> Result<ActionSpec, ValidationError> {
        let mut errors = ValidationError::default();

        let action_type = match self.action_type.parse::<ActionType>() {
            Ok(t) => Some(t),
            Err(message) => {
                errors.add("actionType", message);
                None
            }
        };

        let params = match &self.params {
            Some(params) if !params.is_null() => Some(params.clone()),
            _ => {
                errors.add("params", "params is required");
                None
            }
        };

        if let (Some(kind), Some(params)) = (action_type, &params) {
            if let Err(err) = validate_params(kind, params, limits) {
                errors.merge_prefixed("params", err);
            }
        }

        let execute_condition = match &self.execute_condition {
            None | Some(Value::Null) => None,
            Some(raw) => match serde_json::from_value::<Condition>(raw.clone()) {
                Ok(condition) => Some(condition),
                Err(err) => {
                    errors.add("executeCondition", format!("executeCondition is not a valid condition: {}", err));
                    None
                }
            },
        };

        match (action_type, params) {
            (Some(action_type), Some(params)) if errors.is_empty() => Ok(ActionSpec {
                action_type,
                order: self.order.unwrap_or(position as i32),
                params,
                execute_condition,
            }),
            _ => Err(errors),
        }
    }
}
