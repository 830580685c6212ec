// Action handlers driven through the engine against in-memory collaborators

use chrono::Utc;
use mockall::predicate::function;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use atrium_shared::ContactSegment;

use crate::events::{EventEnvelope, EventType};
use crate::services::email::MockMailer;
use crate::services::{HttpWebhookSender, MailError};
use crate::tests::fixtures;
use crate::tests::helpers::TestHarness;
use crate::tests::memory::{RecordingMailer, RecordingWebhooks};
use crate::workflows::{ExecutionStatus, StepStatus};

// ============================================
// Contacts & companies
// ============================================

#[tokio::test]
async fn test_update_contact_defaults_to_triggering_contact() {
    let h = TestHarness::new();
    h.create_workflow(json!({
        "name": "Normalize",
        "triggers": [{"triggerType": "CONTACT_CREATED"}],
        "actions": [{"actionType": "UPDATE_CONTACT", "params": {"phone": "+1 555 0100", "unknownField": 1}}]
    }))
    .await;

    let contact = fixtures::contact(h.tenant_id);
    h.crm.insert_contact(contact.clone());
    let execution = &h
        .dispatch(EventType::ContactCreated, &EventEnvelope::contact_created(&contact, None))
        .await[0];

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let stored = h.crm.contact(contact.id).unwrap();
    assert_eq!(stored.phone.as_deref(), Some("+1 555 0100"));
    assert_eq!(stored.name, contact.name);
    assert_eq!(execution.log[0].result.as_ref().unwrap()["contactId"], json!(contact.id));
}

#[tokio::test]
async fn test_update_contact_from_company_event_needs_a_target() {
    let h = TestHarness::new();
    h.create_workflow(json!({
        "name": "Wrong entity",
        "triggers": [{"triggerType": "COMPANY_CREATED"}],
        "actions": [{"actionType": "UPDATE_CONTACT", "params": {"name": "Nobody"}}]
    }))
    .await;

    let company = fixtures::company(h.tenant_id);
    h.crm.insert_company(company.clone());
    let execution = &h
        .dispatch(EventType::CompanyCreated, &EventEnvelope::company_created(&company, None))
        .await[0];

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.log[0].error.as_deref().unwrap_or_default().contains("contact"));
}

#[tokio::test]
async fn test_update_company_cannot_reach_another_tenant() {
    let h = TestHarness::new();
    let foreign = fixtures::company(Uuid::new_v4());
    h.crm.insert_company(foreign.clone());
    h.create_workflow(json!({
        "name": "Reach across",
        "triggers": [{"triggerType": "CONTACT_CREATED"}],
        "actions": [{"actionType": "UPDATE_COMPANY", "params": {"companyId": foreign.id, "industry": "Hacked"}}]
    }))
    .await;

    let execution = &h
        .dispatch(EventType::ContactCreated, &h.envelope("contact", Uuid::new_v4()))
        .await[0];

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(h.crm.company(foreign.id).unwrap().industry, foreign.industry);
}

#[tokio::test]
async fn test_assign_to_user() {
    let h = TestHarness::new();
    let owner = fixtures::user(h.tenant_id);
    h.crm.insert_user(owner.clone());
    h.create_workflow(json!({
        "name": "Route",
        "triggers": [{"triggerType": "COMPANY_CREATED"}],
        "actions": [{"actionType": "ASSIGN_TO_USER", "params": {"userId": owner.id}}]
    }))
    .await;

    let company = fixtures::company(h.tenant_id);
    h.crm.insert_company(company.clone());
    let execution = &h
        .dispatch(EventType::CompanyCreated, &EventEnvelope::company_created(&company, None))
        .await[0];

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(h.crm.company(company.id).unwrap().assigned_to_id, Some(owner.id));
}

#[tokio::test]
async fn test_assign_rejects_unsupported_entity() {
    let h = TestHarness::new();
    let owner = fixtures::user(h.tenant_id);
    h.crm.insert_user(owner.clone());
    h.create_workflow(json!({
        "name": "Assign reminder",
        "triggers": [{"triggerType": "REMINDER_DUE"}],
        "actions": [{"actionType": "ASSIGN_TO_USER", "params": {"userId": owner.id}}]
    }))
    .await;

    let execution = &h
        .dispatch(EventType::ReminderDue, &h.envelope("reminder", Uuid::new_v4()))
        .await[0];

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.log[0].error.as_deref().unwrap_or_default().contains("reminder"));
}

// ============================================
// Segments
// ============================================

#[tokio::test]
async fn test_add_to_segment_is_idempotent() {
    let h = TestHarness::new();
    let segment = fixtures::segment(h.tenant_id);
    h.crm.insert_segment(segment.clone());
    h.create_workflow(json!({
        "name": "Tag",
        "triggers": [{"triggerType": "CONTACT_UPDATED"}],
        "actions": [{"actionType": "ADD_TO_SEGMENT", "params": {"segmentId": segment.id}}]
    }))
    .await;

    let contact = fixtures::contact(h.tenant_id);
    h.crm.insert_contact(contact.clone());
    let envelope = h.envelope("contact", contact.id);

    let first = &h.dispatch(EventType::ContactUpdated, &envelope).await[0];
    let second = &h.dispatch(EventType::ContactUpdated, &envelope).await[0];

    assert_eq!(first.log[0].result.as_ref().unwrap()["added"], json!(true));
    assert_eq!(second.status, ExecutionStatus::Completed);
    let repeat = second.log[0].result.as_ref().unwrap();
    assert_eq!(repeat["added"], json!(false));
    assert_eq!(repeat["message"], "Contact already in segment");

    assert!(h.crm.is_member(segment.id, contact.id));
    assert_eq!(h.crm.segment(segment.id).unwrap().contact_count, 1);
}

#[tokio::test]
async fn test_add_to_segment_marks_automatic_membership_manual() {
    let h = TestHarness::new();
    let mut segment = fixtures::segment(h.tenant_id);
    segment.contact_count = 1;
    h.crm.insert_segment(segment.clone());

    let contact = fixtures::contact(h.tenant_id);
    h.crm.insert_contact(contact.clone());
    h.crm.insert_membership(ContactSegment {
        contact_id: contact.id,
        segment_id: segment.id,
        is_manual: false,
        added_at: Utc::now(),
    });

    h.create_workflow(json!({
        "name": "Pin",
        "triggers": [{"triggerType": "CONTACT_UPDATED"}],
        "actions": [{"actionType": "ADD_TO_SEGMENT", "params": {"segmentId": segment.id}}]
    }))
    .await;
    let execution = &h
        .dispatch(EventType::ContactUpdated, &h.envelope("contact", contact.id))
        .await[0];

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.log[0].result.as_ref().unwrap()["added"], json!(false));
    assert!(h.crm.membership(segment.id, contact.id).unwrap().is_manual);
    assert_eq!(h.crm.segment(segment.id).unwrap().contact_count, 1);
}

#[tokio::test]
async fn test_remove_non_member_succeeds_without_change() {
    let h = TestHarness::new();
    let mut segment = fixtures::segment(h.tenant_id);
    segment.contact_count = 4;
    h.crm.insert_segment(segment.clone());
    h.create_workflow(json!({
        "name": "Untag",
        "triggers": [{"triggerType": "CONTACT_UPDATED"}],
        "actions": [{"actionType": "REMOVE_FROM_SEGMENT", "params": {"segmentId": segment.id}}]
    }))
    .await;

    let contact = fixtures::contact(h.tenant_id);
    h.crm.insert_contact(contact.clone());
    let execution = &h
        .dispatch(EventType::ContactUpdated, &h.envelope("contact", contact.id))
        .await[0];

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let result = execution.log[0].result.as_ref().unwrap();
    assert_eq!(result["removed"], json!(false));
    assert_eq!(result["message"], "Contact not in segment");
    assert_eq!(h.crm.segment(segment.id).unwrap().contact_count, 4);
}

#[tokio::test]
async fn test_segment_of_another_tenant_is_not_found() {
    let h = TestHarness::new();
    let segment = fixtures::segment(Uuid::new_v4());
    h.crm.insert_segment(segment.clone());
    h.create_workflow(json!({
        "name": "Foreign segment",
        "triggers": [{"triggerType": "CONTACT_UPDATED"}],
        "actions": [{"actionType": "ADD_TO_SEGMENT", "params": {"segmentId": segment.id}}]
    }))
    .await;

    let contact = fixtures::contact(h.tenant_id);
    h.crm.insert_contact(contact.clone());
    let execution = &h
        .dispatch(EventType::ContactUpdated, &h.envelope("contact", contact.id))
        .await[0];

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(!h.crm.is_member(segment.id, contact.id));
}

// ============================================
// Email
// ============================================

#[tokio::test]
async fn test_send_email_renders_template_and_tracks_activity() {
    let mut mailer = MockMailer::new();
    mailer
        .expect_send()
        .with(function(|email: &crate::services::OutgoingEmail| {
            email.to == "ada@example.com" && email.subject == "Welcome Ada"
        }))
        .times(1)
        .returning(|_| Ok(()));

    let h = TestHarness::with_outbound(Arc::new(mailer), Arc::new(RecordingWebhooks::default()));
    h.create_workflow(json!({
        "name": "Welcome mail",
        "triggers": [{"triggerType": "CONTACT_CREATED"}],
        "actions": [{
            "actionType": "SEND_EMAIL",
            "params": {
                "to": "{{data.email}}",
                "subject": "Welcome {{data.name}}",
                "body": "<p>Hello</p>",
                "trackAsActivity": true
            }
        }]
    }))
    .await;

    let contact_id = Uuid::new_v4();
    let envelope = h
        .envelope("contact", contact_id)
        .with_data(json!({"name": "Ada", "email": "ada@example.com"}));
    let execution = &h.dispatch(EventType::ContactCreated, &envelope).await[0];

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let activities = h.crm.activities();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].activity_type, "EMAIL");
    assert_eq!(activities[0].contact_id, Some(contact_id));
    assert_eq!(
        execution.log[0].result.as_ref().unwrap()["activityId"],
        json!(activities[0].id)
    );
}

#[tokio::test]
async fn test_mail_failure_fails_the_execution() {
    let mut mailer = MockMailer::new();
    mailer.expect_send().returning(|_| Err(MailError::NotConfigured));

    let h = TestHarness::with_outbound(Arc::new(mailer), Arc::new(RecordingWebhooks::default()));
    h.create_workflow(json!({
        "name": "Mail then note",
        "triggers": [{"triggerType": "CONTACT_CREATED"}],
        "actions": [
            {"actionType": "SEND_EMAIL", "order": 0, "params": {"to": "a@example.com", "subject": "Hi", "body": "Hi"}},
            {"actionType": "CREATE_ACTIVITY", "order": 1, "params": {"type": "NOTE"}}
        ]
    }))
    .await;

    let execution = &h
        .dispatch(EventType::ContactCreated, &h.envelope("contact", Uuid::new_v4()))
        .await[0];

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.log.len(), 1);
    assert!(execution.log[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("SMTP is not configured"));
    assert!(h.crm.activities().is_empty());
}

// ============================================
// Webhooks
// ============================================

#[tokio::test]
async fn test_webhook_body_carries_event_and_results() {
    let h = TestHarness::new();
    let workflow = h
        .create_workflow(json!({
            "name": "Notify",
            "triggers": [{"triggerType": "CONTACT_CREATED"}],
            "actions": [
                {"actionType": "CREATE_ACTIVITY", "order": 0, "params": {"type": "NOTE"}},
                {
                    "actionType": "WEBHOOK",
                    "order": 1,
                    "params": {
                        "url": "https://hooks.example.com/crm",
                        "headers": {"X-Signature": "abc"},
                        "payload": {"source": "{{entityType}}"}
                    }
                }
            ]
        }))
        .await;

    let contact_id = Uuid::new_v4();
    let execution = &h
        .dispatch(EventType::ContactCreated, &h.envelope("contact", contact_id))
        .await[0];
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let requests = h.webhooks.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.url, "https://hooks.example.com/crm");
    assert_eq!(request.headers.get("X-Signature").map(String::as_str), Some("abc"));

    let body = &request.body;
    assert_eq!(body["workflowId"], json!(workflow.workflow.id));
    assert_eq!(body["executionId"], json!(execution.id));
    assert_eq!(body["actionId"], json!(workflow.actions[1].id));
    assert_eq!(body["event"]["entityId"], json!(contact_id));
    assert_eq!(body["payload"]["source"], "contact");
    let note = workflow.actions[0].id.to_string();
    assert_eq!(
        body["results"][note.as_str()]["activityId"],
        json!(h.crm.activities()[0].id)
    );

    assert_eq!(execution.log[1].result.as_ref().unwrap()["status"], json!(200));
}

#[tokio::test]
async fn test_webhook_error_status_fails_the_step() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let sender = HttpWebhookSender::new(Duration::from_secs(5)).unwrap();
    let h = TestHarness::with_outbound(Arc::new(RecordingMailer::default()), Arc::new(sender));
    h.create_workflow(json!({
        "name": "Unreachable",
        "triggers": [{"triggerType": "CONTACT_CREATED"}],
        "actions": [{"actionType": "WEBHOOK", "params": {"url": format!("{}/hook", server.uri())}}]
    }))
    .await;

    let execution = &h
        .dispatch(EventType::ContactCreated, &h.envelope("contact", Uuid::new_v4()))
        .await[0];

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.log[0].status, StepStatus::Failed);
    assert!(execution.log[0].error.as_deref().unwrap_or_default().contains("503"));
}
