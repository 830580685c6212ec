// Handlers that create or patch CRM records

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use atrium_shared::{CompanyPatch, ContactPatch, NewActivity, NewReminder};

use super::{ActionError, ActionHandler, HandlerContext};
use crate::store::CrmStore;
use crate::workflows::actions::{
    parse_params, ActionType, AssignToUserParams, CreateActivityParams, CreateReminderParams,
    UpdateCompanyParams, UpdateContactParams,
};

fn changed_fields(pairs: &[(&str, bool)]) -> Vec<String> {
    pairs
        .iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| name.to_string())
        .collect()
}

// ===== UPDATE_CONTACT =====

pub struct UpdateContactHandler {
    crm: Arc<dyn CrmStore>,
}

impl UpdateContactHandler {
    pub fn new(crm: Arc<dyn CrmStore>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl ActionHandler for UpdateContactHandler {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError> {
        let p: UpdateContactParams = parse_params(ActionType::UpdateContact, params)?;
        let contact_id = p
            .contact_id
            .or_else(|| ctx.context.entity_of("contact"))
            .ok_or(ActionError::MissingTarget("contact"))?;
        let tenant_id = ctx.context.tenant_id();

        let patch = ContactPatch {
            name: p.name,
            email: p.email,
            phone: p.phone,
            status_id: p.status_id,
            assigned_to_id: p.assigned_to_id,
        };
        let fields = changed_fields(&[
            ("name", patch.name.is_some()),
            ("email", patch.email.is_some()),
            ("phone", patch.phone.is_some()),
            ("statusId", patch.status_id.is_some()),
            ("assignedToId", patch.assigned_to_id.is_some()),
        ]);

        let contact = if patch.is_empty() {
            self.crm.get_contact(tenant_id, contact_id).await?
        } else {
            self.crm.update_contact(tenant_id, contact_id, &patch).await?
        };
        let contact = contact.ok_or_else(|| ActionError::NotFound(format!("Contact {}", contact_id)))?;

        Ok(json!({
            "contactId": contact.id,
            "updatedFields": fields,
        }))
    }
}

// ===== UPDATE_COMPANY =====

pub struct UpdateCompanyHandler {
    crm: Arc<dyn CrmStore>,
}

impl UpdateCompanyHandler {
    pub fn new(crm: Arc<dyn CrmStore>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl ActionHandler for UpdateCompanyHandler {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError> {
        let p: UpdateCompanyParams = parse_params(ActionType::UpdateCompany, params)?;
        let company_id = p
            .company_id
            .or_else(|| ctx.context.entity_of("company"))
            .ok_or(ActionError::MissingTarget("company"))?;
        let tenant_id = ctx.context.tenant_id();

        let patch = CompanyPatch {
            name: p.name,
            email: p.email,
            phone: p.phone,
            website: p.website,
            industry: p.industry,
            status_id: p.status_id,
            assigned_to_id: p.assigned_to_id,
        };
        let fields = changed_fields(&[
            ("name", patch.name.is_some()),
            ("email", patch.email.is_some()),
            ("phone", patch.phone.is_some()),
            ("website", patch.website.is_some()),
            ("industry", patch.industry.is_some()),
            ("statusId", patch.status_id.is_some()),
            ("assignedToId", patch.assigned_to_id.is_some()),
        ]);

        let company = if patch.is_empty() {
            self.crm.get_company(tenant_id, company_id).await?
        } else {
            self.crm.update_company(tenant_id, company_id, &patch).await?
        };
        let company = company.ok_or_else(|| ActionError::NotFound(format!("Company {}", company_id)))?;

        Ok(json!({
            "companyId": company.id,
            "updatedFields": fields,
        }))
    }
}

// ===== CREATE_ACTIVITY =====

pub struct CreateActivityHandler {
    crm: Arc<dyn CrmStore>,
}

impl CreateActivityHandler {
    pub fn new(crm: Arc<dyn CrmStore>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl ActionHandler for CreateActivityHandler {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError> {
        let p: CreateActivityParams = parse_params(ActionType::CreateActivity, params)?;

        let activity = self
            .crm
            .create_activity(NewActivity {
                tenant_id: ctx.context.tenant_id(),
                activity_type: p.activity_type,
                subject: p.subject,
                description: p.description,
                contact_id: p.contact_id.or_else(|| ctx.context.entity_of("contact")),
                company_id: p.company_id.or_else(|| ctx.context.entity_of("company")),
                created_by_id: ctx.context.actor(),
                due_date: p.due_date,
            })
            .await?;

        Ok(json!({
            "activityId": activity.id,
            "type": activity.activity_type,
        }))
    }
}

// ===== CREATE_REMINDER =====

pub struct CreateReminderHandler {
    crm: Arc<dyn CrmStore>,
}

impl CreateReminderHandler {
    pub fn new(crm: Arc<dyn CrmStore>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl ActionHandler for CreateReminderHandler {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError> {
        let p: CreateReminderParams = parse_params(ActionType::CreateReminder, params)?;
        let actor = ctx.context.actor();

        let reminder = self
            .crm
            .create_reminder(NewReminder {
                tenant_id: ctx.context.tenant_id(),
                title: p.title,
                description: p.description,
                due_date: p.due_date,
                contact_id: p.contact_id.or_else(|| ctx.context.entity_of("contact")),
                company_id: p.company_id.or_else(|| ctx.context.entity_of("company")),
                assigned_to_id: p.assigned_to_id.or(actor),
                created_by_id: actor,
            })
            .await?;

        Ok(json!({
            "reminderId": reminder.id,
            "dueDate": reminder.due_date,
            "assignedToId": reminder.assigned_to_id,
        }))
    }
}

// ===== ASSIGN_TO_USER =====

pub struct AssignToUserHandler {
    crm: Arc<dyn CrmStore>,
}

impl AssignToUserHandler {
    pub fn new(crm: Arc<dyn CrmStore>) -> Self {
        Self { crm }
    }

    fn target(p: &AssignToUserParams, ctx: &HandlerContext<'_>) -> Result<(String, Uuid), ActionError> {
        let entity_type = p
            .entity_type
            .clone()
            .unwrap_or_else(|| ctx.context.entity_type().to_string());
        let entity_id = p
            .entity_id
            .or_else(|| ctx.context.entity_of(&entity_type))
            .ok_or(ActionError::MissingTarget("entity"))?;
        Ok((entity_type, entity_id))
    }
}

#[async_trait]
impl ActionHandler for AssignToUserHandler {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError> {
        let p: AssignToUserParams = parse_params(ActionType::AssignToUser, params)?;
        let tenant_id = ctx.context.tenant_id();

        let user = self
            .crm
            .get_user(tenant_id, p.user_id)
            .await?
            .ok_or_else(|| ActionError::NotFound(format!("User {}", p.user_id)))?;

        let (entity_type, entity_id) = Self::target(&p, ctx)?;
        match entity_type.as_str() {
            "contact" => {
                let patch = ContactPatch {
                    assigned_to_id: Some(user.id),
                    ..Default::default()
                };
                self.crm
                    .update_contact(tenant_id, entity_id, &patch)
                    .await?
                    .ok_or_else(|| ActionError::NotFound(format!("Contact {}", entity_id)))?;
            }
            "company" => {
                let patch = CompanyPatch {
                    assigned_to_id: Some(user.id),
                    ..Default::default()
                };
                self.crm
                    .update_company(tenant_id, entity_id, &patch)
                    .await?
                    .ok_or_else(|| ActionError::NotFound(format!("Company {}", entity_id)))?;
            }
            other => return Err(ActionError::UnsupportedEntity(other.to_string())),
        }

        Ok(json!({
            "entityType": entity_type,
            "entityId": entity_id,
            "assignedToId": user.id,
        }))
    }
}
