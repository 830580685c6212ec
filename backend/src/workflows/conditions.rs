// Workflow Conditions - shared grammar for trigger refinement and action gating

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A condition attached to a trigger (`conditions`) or an action
/// (`executeCondition`).
///
/// Three JSON shapes are accepted:
/// - `{"field": "data.priority", "operator": "equals", "value": "high"}`
/// - `{"logic": "AND", "conditions": [...]}`
/// - `{"statusId": "S1", "industry": "Retail"}` where each key is a path
///   under `data` and must equal its value.
///
/// The shape is picked by key: `field`/`operator` mean a field condition and
/// `logic`/`conditions` mean a group, and either must then be well formed.
/// Only maps with none of those keys are flat matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Condition {
    Field(FieldCondition),
    Group(ConditionGroup),
    Match(Map<String, Value>),
}

/// Compare the value at a dotted path in the context against `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

/// Group of conditions with AND/OR logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    pub logic: Logic,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Logic {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// Condition operators. Unknown names deserialize to `Unsupported` and
/// always evaluate to false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Unsupported(String),
}

impl ConditionOperator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "notEquals",
            Self::Contains => "contains",
            Self::GreaterThan => "greaterThan",
            Self::LessThan => "lessThan",
            Self::Unsupported(name) => name,
        }
    }
}

impl From<String> for ConditionOperator {
    fn from(name: String) -> Self {
        match name.as_str() {
            "equals" | "eq" => Self::Equals,
            "notEquals" | "not_equals" | "ne" => Self::NotEquals,
            "contains" => Self::Contains,
            "greaterThan" | "greater_than" | "gt" => Self::GreaterThan,
            "lessThan" | "less_than" | "lt" => Self::LessThan,
            _ => Self::Unsupported(name),
        }
    }
}

impl From<ConditionOperator> for String {
    fn from(operator: ConditionOperator) -> Self {
        operator.as_str().to_string()
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        if map.contains_key("logic") || map.contains_key("conditions") {
            ConditionGroup::deserialize(Value::Object(map))
                .map(Self::Group)
                .map_err(|e| de::Error::custom(format!("invalid condition group: {}", e)))
        } else if map.contains_key("field") || map.contains_key("operator") {
            FieldCondition::deserialize(Value::Object(map))
                .map(Self::Field)
                .map_err(|e| de::Error::custom(format!("invalid field condition: {}", e)))
        } else {
            Ok(Self::Match(map))
        }
    }
}

impl Condition {
    pub fn field(field: &str, operator: ConditionOperator, value: Value) -> Self {
        Self::Field(FieldCondition {
            field: field.to_string(),
            operator,
            value,
        })
    }

    pub fn equals(field: &str, value: Value) -> Self {
        Self::field(field, ConditionOperator::Equals, value)
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Self::Group(ConditionGroup {
            logic: Logic::And,
            conditions,
        })
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self::Group(ConditionGroup {
            logic: Logic::Or,
            conditions,
        })
    }

    /// Evaluate against a context document (the serialized envelope, plus
    /// `results` when gating actions). Never fails: anything that cannot be
    /// resolved or compared is false.
    pub fn evaluate(&self, context: &Value) -> bool {
        match self {
            Self::Field(condition) => condition.evaluate(context),
            Self::Group(group) => match group.logic {
                Logic::And => group.conditions.iter().all(|c| c.evaluate(context)),
                Logic::Or => group.conditions.iter().any(|c| c.evaluate(context)),
            },
            Self::Match(expected) => {
                let Some(data) = context.get("data") else {
                    return expected.is_empty();
                };
                expected.iter().all(|(path, value)| {
                    resolve_path(data, path).is_some_and(|actual| values_equal(actual, value))
                })
            }
        }
    }
}

impl FieldCondition {
    pub fn evaluate(&self, context: &Value) -> bool {
        let Some(actual) = resolve_path(context, &self.field) else {
            return false;
        };

        match &self.operator {
            ConditionOperator::Equals => values_equal(actual, &self.value),
            ConditionOperator::NotEquals => !values_equal(actual, &self.value),
            ConditionOperator::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|item| values_equal(item, needle)),
                _ => false,
            },
            ConditionOperator::GreaterThan => compare(actual, &self.value) == Some(Ordering::Greater),
            ConditionOperator::LessThan => compare(actual, &self.value) == Some(Ordering::Less),
            ConditionOperator::Unsupported(name) => {
                tracing::debug!(operator = %name, field = %self.field, "Unsupported condition operator");
                false
            }
        }
    }
}

/// Walk a dotted path (`data.company.name`, `results.<id>.reminderId`).
/// Array elements are addressed by numeric segments.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// JSON equality, except numbers compare by value (`5` equals `5.0`).
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Numbers compare numerically, strings lexicographically, anything else is
/// incomparable.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
