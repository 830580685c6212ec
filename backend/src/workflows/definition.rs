// Workflow definitions: a named set of triggers and an ordered action chain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::actions::{ActionLimits, ActionSpec, NewAction, WorkflowAction};
use super::triggers::{NewTrigger, TriggerSpec, WorkflowTrigger};
use crate::validation::{self, ValidationError};

const MAX_NAME_LENGTH: usize = 255;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_by_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A workflow with its triggers and its actions in execution order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    #[serde(flatten)]
    pub workflow: Workflow,
    pub triggers: Vec<WorkflowTrigger>,
    pub actions: Vec<WorkflowAction>,
}

/// Create request: the workflow together with its triggers and actions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkflow {
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub triggers: Vec<NewTrigger>,
    #[serde(default)]
    pub actions: Vec<NewAction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub triggers: Vec<TriggerSpec>,
    pub actions: Vec<ActionSpec>,
}

/// Update request for workflow metadata. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkflow {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl NewWorkflow {
    pub fn validate(&self, limits: ActionLimits) -> Result<ValidatedWorkflow, ValidationError> {
        let mut errors = ValidationError::default();

        let name = validation::string::required(self.name.as_deref(), "name", &mut errors);
        validation::string::max_length(self.name.as_deref(), "name", MAX_NAME_LENGTH, &mut errors);

        let triggers = validate_triggers(&self.triggers).map_err(|e| errors.merge_prefixed("", e)).ok();
        let actions = validate_actions(&self.actions, limits)
            .map_err(|e| errors.merge_prefixed("", e))
            .ok();

        match (name, triggers, actions) {
            (Some(name), Some(triggers), Some(actions)) if errors.is_empty() => Ok(ValidatedWorkflow {
                name,
                description: self.description.clone(),
                is_active: self.is_active.unwrap_or(true),
                triggers,
                actions,
            }),
            _ => Err(errors),
        }
    }
}

impl UpdateWorkflow {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = ValidationError::default();
        if self.name.is_some() {
            validation::string::required(self.name.as_deref(), "name", &mut errors);
            validation::string::max_length(self.name.as_deref(), "name", MAX_NAME_LENGTH, &mut errors);
        }
        errors.into_result(())
    }
}

/// Validate a full trigger set; at least one trigger is required.
pub fn validate_triggers(triggers: &[NewTrigger]) -> Result<Vec<TriggerSpec>, ValidationError> {
    let mut errors = ValidationError::default();
    if triggers.is_empty() {
        errors.add("triggers", "at least one trigger is required");
    }

    let mut specs = Vec::with_capacity(triggers.len());
    for (index, trigger) in triggers.iter().enumerate() {
        match trigger.validate() {
            Ok(spec) => specs.push(spec),
            Err(err) => errors.merge_prefixed(&format!("triggers[{}]", index), err),
        }
    }

    errors.into_result(specs)
}

/// Validate a full action list; at least one action is required.
pub fn validate_actions(actions: &[NewAction], limits: ActionLimits) -> Result<Vec<ActionSpec>, ValidationError> {
    let mut errors = ValidationError::default();
    if actions.is_empty() {
        errors.add("actions", "at least one action is required");
    }

    let mut specs = Vec::with_capacity(actions.len());
    for (index, action) in actions.iter().enumerate() {
        match action.validate(index, limits) {
            Ok(spec) => specs.push(spec),
            Err(err) => errors.merge_prefixed(&format!("actions[{}]", index), err),
        }
    }

    errors.into_result(specs)
}
