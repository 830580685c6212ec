// Execution context - the triggering envelope plus results accumulated by actions

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use uuid::Uuid;

use super::conditions::resolve_path;
use crate::events::EventEnvelope;

/// Entities that belong to a contact or company and carry its id in `data`
const DEPENDENT_ENTITIES: [&str; 2] = ["reminder", "activity"];

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").ok());

/// Runtime context of one execution, persisted on the execution row.
///
/// Serializes as the envelope's fields plus a `results` object keyed by
/// action id, which is also the document conditions and templates address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    #[serde(default)]
    results: BTreeMap<Uuid, Value>,
}

impl ExecutionContext {
    pub fn new(envelope: EventEnvelope) -> Self {
        Self {
            envelope,
            results: BTreeMap::new(),
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.envelope.tenant_id
    }

    pub fn entity_type(&self) -> &str {
        &self.envelope.entity_type
    }

    pub fn entity_id(&self) -> Uuid {
        self.envelope.entity_id
    }

    pub fn actor(&self) -> Option<Uuid> {
        self.envelope.user_id
    }

    /// The triggering entity id when it is of `entity_type`. A reminder or
    /// activity stands in for the record it belongs to, read from
    /// `data.<entityType>Id`.
    pub fn entity_of(&self, entity_type: &str) -> Option<Uuid> {
        if self.envelope.entity_type == entity_type {
            return Some(self.envelope.entity_id);
        }
        if !DEPENDENT_ENTITIES.contains(&self.envelope.entity_type.as_str()) {
            return None;
        }
        let key = format!("{}Id", entity_type);
        self.envelope.data.get(key.as_str())?.as_str()?.parse().ok()
    }

    pub fn results(&self) -> &BTreeMap<Uuid, Value> {
        &self.results
    }

    /// Record an action's result. Results are write-once per action id.
    pub fn record_result(&mut self, action_id: Uuid, result: Value) {
        self.results.entry(action_id).or_insert(result);
    }

    pub fn clear_results(&mut self) {
        self.results.clear();
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Resolve `{{path}}` placeholders in every string inside `params`.
    pub fn render(&self, params: &Value) -> Value {
        render_value(params, &self.to_json())
    }
}

/// True when any string inside `value` holds a `{{...}}` placeholder.
pub fn contains_placeholder(value: &Value) -> bool {
    match value {
        Value::String(s) => PLACEHOLDER.as_ref().is_some_and(|re| re.is_match(s)),
        Value::Array(items) => items.iter().any(contains_placeholder),
        Value::Object(map) => map.values().any(contains_placeholder),
        _ => false,
    }
}

fn render_value(value: &Value, document: &Value) -> Value {
    match value {
        Value::String(s) => render_string(s, document),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, document)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, document)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// A string that is exactly one placeholder takes the referenced value with
/// its JSON type; otherwise placeholders are spliced in as text. Paths that
/// do not resolve are left untouched.
fn render_string(template: &str, document: &Value) -> Value {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return Value::String(template.to_string());
    };

    if let Some(caps) = re.captures(template) {
        if caps.get(0).is_some_and(|m| m.as_str() == template) {
            if let Some(found) = resolve_path(document, &caps[1]) {
                return found.clone();
            }
        }
    }

    let rendered = re.replace_all(template, |caps: &Captures| match resolve_path(document, &caps[1]) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
        None => caps[0].to_string(),
    });
    Value::String(rendered.into_owned())
}
