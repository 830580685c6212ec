//! Definition validation for workflows
//!
//! Collects field-level messages so a caller sees every problem with a
//! workflow definition at once instead of the first one.

use std::collections::HashMap;
use std::fmt;

/// Field-keyed validation failures. Field names are paths into the request
/// body, e.g. `actions[1].params.segmentId`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationError {
    details: HashMap<String, Vec<String>>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::default();
        err.add(field, message);
        err
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.details
            .entry(field.into())
            .or_insert_with(Vec::new)
            .push(message.into());
    }

    /// Merge another error's details, prefixing each field with `prefix`.
    /// A field already named `prefix` is kept as is.
    pub fn merge_prefixed(&mut self, prefix: &str, other: ValidationError) {
        for (field, messages) in other.details {
            let key = if prefix.is_empty() || field == prefix {
                field
            } else {
                format!("{}.{}", prefix, field)
            };
            self.details.entry(key).or_insert_with(Vec::new).extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.details.is_empty()
    }

    pub fn details(&self) -> &HashMap<String, Vec<String>> {
        &self.details
    }

    pub fn into_details(self) -> HashMap<String, Vec<String>> {
        self.details
    }

    /// `Ok(value)` when nothing was recorded, otherwise `Err(self)`.
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationError> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<_> = self.details.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        let parts: Vec<String> = fields
            .into_iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
            .collect();
        write!(f, "validation failed: {}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// String validation helpers
pub mod string {
    use super::ValidationError;

    /// Validate required non-empty string, recording the failure on `errors`.
    pub fn required(value: Option<&str>, field: &str, errors: &mut ValidationError) -> Option<String> {
        match value {
            Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(_) => {
                errors.add(field, format!("{} cannot be empty", field));
                None
            }
            None => {
                errors.add(field, format!("{} is required", field));
                None
            }
        }
    }

    /// Validate optional string with max length
    pub fn max_length(value: Option<&str>, field: &str, max: usize, errors: &mut ValidationError) {
        if let Some(s) = value {
            if s.len() > max {
                errors.add(field, format!("{} must be {} characters or less", field, max));
            }
        }
    }
}

/// Email validation
pub mod email {
    use regex::Regex;
    use std::sync::LazyLock;

    use super::ValidationError;

    // One local part, one `@`, and a dotted domain with no empty labels.
    static ADDRESS: LazyLock<Option<Regex>> = LazyLock::new(|| {
        Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$").ok()
    });

    pub fn is_address(value: &str) -> bool {
        let trimmed = value.trim();
        match ADDRESS.as_ref() {
            Some(re) => re.is_match(trimmed),
            None => false,
        }
    }

    /// Validate a single email address, recording the failure on `errors`.
    pub fn address(value: &str, field: &str, errors: &mut ValidationError) {
        if !is_address(value) {
            errors.add(field, format!("{} must be an email address", field));
        }
    }
}

/// URL validation
pub mod url {
    use super::ValidationError;

    /// Accepts absolute http(s) URLs.
    pub fn http(value: &str, field: &str, errors: &mut ValidationError) {
        let trimmed = value.trim();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            errors.add(field, format!("{} must be an http or https URL", field));
        }
    }
}
