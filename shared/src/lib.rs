use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ===== CRM records =====

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub company_id: Option<Uuid>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status_id: Option<Uuid>,
    pub assigned_to_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub status_id: Option<Uuid>,
    pub assigned_to_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub activity_type: String,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub contact_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub created_by_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub contact_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub assigned_to_id: Option<Uuid>,
    pub created_by_id: Option<Uuid>,
    /// Set once a `reminder.due` event has been published for this reminder.
    pub due_announced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Cached membership count, maintained by membership mutations.
    pub contact_count: i32,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactSegment {
    pub contact_id: Uuid,
    pub segment_id: Uuid,
    pub is_manual: bool,
    pub added_at: DateTime<Utc>,
}

// ===== Write models =====

/// Partial update of a contact. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContactPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status_id: Option<Uuid>,
    pub assigned_to_id: Option<Uuid>,
}

impl ContactPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.status_id.is_none()
            && self.assigned_to_id.is_none()
    }
}

/// Partial update of a company. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompanyPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub status_id: Option<Uuid>,
    pub assigned_to_id: Option<Uuid>,
}

impl CompanyPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.website.is_none()
            && self.industry.is_none()
            && self.status_id.is_none()
            && self.assigned_to_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    pub tenant_id: Uuid,
    pub activity_type: String,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub contact_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub created_by_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewReminder {
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub contact_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub assigned_to_id: Option<Uuid>,
    pub created_by_id: Option<Uuid>,
}

// ===== Domain events =====

/// Domain events published by CRM mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "contact.created")]
    ContactCreated,
    #[serde(rename = "contact.updated")]
    ContactUpdated,
    #[serde(rename = "contact.status_changed")]
    ContactStatusChanged,
    #[serde(rename = "contact.deleted")]
    ContactDeleted,
    #[serde(rename = "company.created")]
    CompanyCreated,
    #[serde(rename = "company.updated")]
    CompanyUpdated,
    #[serde(rename = "company.status_changed")]
    CompanyStatusChanged,
    #[serde(rename = "company.deleted")]
    CompanyDeleted,
    #[serde(rename = "activity.created")]
    ActivityCreated,
    #[serde(rename = "activity.completed")]
    ActivityCompleted,
    #[serde(rename = "reminder.due")]
    ReminderDue,
    #[serde(rename = "segment.contact_added")]
    SegmentContactAdded,
    #[serde(rename = "segment.contact_removed")]
    SegmentContactRemoved,
}

impl EventType {
    pub const ALL: [EventType; 13] = [
        EventType::ContactCreated,
        EventType::ContactUpdated,
        EventType::ContactStatusChanged,
        EventType::ContactDeleted,
        EventType::CompanyCreated,
        EventType::CompanyUpdated,
        EventType::CompanyStatusChanged,
        EventType::CompanyDeleted,
        EventType::ActivityCreated,
        EventType::ActivityCompleted,
        EventType::ReminderDue,
        EventType::SegmentContactAdded,
        EventType::SegmentContactRemoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContactCreated => "contact.created",
            Self::ContactUpdated => "contact.updated",
            Self::ContactStatusChanged => "contact.status_changed",
            Self::ContactDeleted => "contact.deleted",
            Self::CompanyCreated => "company.created",
            Self::CompanyUpdated => "company.updated",
            Self::CompanyStatusChanged => "company.status_changed",
            Self::CompanyDeleted => "company.deleted",
            Self::ActivityCreated => "activity.created",
            Self::ActivityCompleted => "activity.completed",
            Self::ReminderDue => "reminder.due",
            Self::SegmentContactAdded => "segment.contact_added",
            Self::SegmentContactRemoved => "segment.contact_removed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type '{}'", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Standard payload carried by every domain event.
///
/// Serialized in camelCase so that condition paths such as `data.statusId`
/// or `previousData.email` address it directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub tenant_id: Uuid,
    pub entity_id: Uuid,
    /// Entity tag, e.g. `"contact"` or `"company"`.
    pub entity_type: String,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_data: Option<serde_json::Value>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl EventEnvelope {
    pub fn new(tenant_id: Uuid, entity_type: impl Into<String>, entity_id: Uuid) -> Self {
        Self {
            tenant_id,
            entity_id,
            entity_type: entity_type.into(),
            user_id: None,
            timestamp: Utc::now(),
            data: empty_object(),
            previous_data: None,
        }
    }

    pub fn with_actor(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_previous(mut self, previous: serde_json::Value) -> Self {
        self.previous_data = Some(previous);
        self
    }

    /// Build the envelope for a freshly created contact.
    pub fn contact_created(contact: &Contact, actor: Option<Uuid>) -> Self {
        let mut envelope = Self::new(contact.tenant_id, "contact", contact.id).with_data(to_json(contact));
        envelope.user_id = actor;
        envelope
    }

    /// Build the envelope for a contact whose status moved from `previous`.
    pub fn contact_status_changed(previous: &Contact, current: &Contact, actor: Option<Uuid>) -> Self {
        let mut envelope = Self::new(current.tenant_id, "contact", current.id)
            .with_data(to_json(current))
            .with_previous(to_json(previous));
        envelope.user_id = actor;
        envelope
    }

    /// Build the envelope for a freshly created company.
    pub fn company_created(company: &Company, actor: Option<Uuid>) -> Self {
        let mut envelope = Self::new(company.tenant_id, "company", company.id).with_data(to_json(company));
        envelope.user_id = actor;
        envelope
    }

    /// Build the envelope announcing that a reminder is due.
    pub fn reminder_due(reminder: &Reminder) -> Self {
        let mut envelope = Self::new(reminder.tenant_id, "reminder", reminder.id).with_data(to_json(reminder));
        envelope.user_id = reminder.assigned_to_id.or(reminder.created_by_id);
        envelope
    }
}

fn to_json<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|_| empty_object())
}
