// Outbound handlers: SEND_EMAIL and WEBHOOK

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use atrium_shared::NewActivity;

use super::{ActionError, ActionHandler, HandlerContext};
use crate::services::{Mailer, OutgoingEmail, WebhookRequest, WebhookSender};
use crate::store::CrmStore;
use crate::workflows::actions::{parse_params, ActionType, SendEmailParams, WebhookParams};

pub struct SendEmailHandler {
    mailer: Arc<dyn Mailer>,
    crm: Arc<dyn CrmStore>,
}

impl SendEmailHandler {
    pub fn new(mailer: Arc<dyn Mailer>, crm: Arc<dyn CrmStore>) -> Self {
        Self { mailer, crm }
    }
}

#[async_trait]
impl ActionHandler for SendEmailHandler {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError> {
        let p: SendEmailParams = parse_params(ActionType::SendEmail, params)?;

        self.mailer
            .send(&OutgoingEmail {
                to: p.to.clone(),
                to_name: p.to_name.clone(),
                subject: p.subject.clone(),
                html_body: p.body.clone(),
            })
            .await?;
        tracing::debug!(execution_id = %ctx.execution_id, to = %p.to, "Workflow email sent");

        let activity_id = if p.track_as_activity {
            let activity = self
                .crm
                .create_activity(NewActivity {
                    tenant_id: ctx.context.tenant_id(),
                    activity_type: "EMAIL".to_string(),
                    subject: Some(p.subject.clone()),
                    description: Some(p.body.clone()),
                    contact_id: ctx.context.entity_of("contact"),
                    company_id: ctx.context.entity_of("company"),
                    created_by_id: ctx.context.actor(),
                    due_date: None,
                })
                .await?;
            Some(activity.id)
        } else {
            None
        };

        Ok(json!({
            "to": p.to,
            "subject": p.subject,
            "activityId": activity_id,
        }))
    }
}

pub struct WebhookHandler {
    sender: Arc<dyn WebhookSender>,
}

impl WebhookHandler {
    pub fn new(sender: Arc<dyn WebhookSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ActionHandler for WebhookHandler {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError> {
        let p: WebhookParams = parse_params(ActionType::Webhook, params)?;

        let body = json!({
            "workflowId": ctx.workflow_id,
            "executionId": ctx.execution_id,
            "actionId": ctx.action_id,
            "timestamp": Utc::now(),
            "event": ctx.context.envelope,
            "results": ctx.context.results(),
            "payload": p.payload,
        });
        let status = self
            .sender
            .post(&WebhookRequest {
                url: p.url.clone(),
                headers: p.headers,
                body,
            })
            .await?;

        Ok(json!({ "url": p.url, "status": status }))
    }
}
