// Engine scenarios: trigger matching, the action chain and its log

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::events::{EventEnvelope, EventType};
use crate::services::{WebhookError, WebhookRequest, WebhookSender};
use crate::tests::fixtures;
use crate::tests::helpers::TestHarness;
use crate::tests::memory::RecordingMailer;
use crate::workflows::{ExecutionStatus, ManualRun, StepStatus, UpdateWorkflow, WorkflowError};

// ============================================
// Acceptance scenarios
// ============================================

#[tokio::test]
async fn test_contact_created_creates_reminder() {
    let h = TestHarness::new();
    let workflow = h
        .create_workflow(json!({
            "name": "New contact follow-up",
            "triggers": [{"triggerType": "CONTACT_CREATED"}],
            "actions": [{
                "actionType": "CREATE_REMINDER",
                "params": {"title": "Follow up", "dueDate": "2025-01-10"}
            }]
        }))
        .await;

    let contact = fixtures::contact(h.tenant_id);
    h.crm.insert_contact(contact.clone());
    let envelope = EventEnvelope::contact_created(&contact, Some(h.actor_id));

    let executions = h.dispatch(EventType::ContactCreated, &envelope).await;

    assert_eq!(executions.len(), 1);
    let execution = &executions[0];
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.workflow_id, workflow.workflow.id);
    assert_eq!(execution.trigger_id, Some(workflow.triggers[0].id));
    assert!(execution.completed_at >= execution.started_at);

    let reminders = h.crm.reminders();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].title, "Follow up");
    assert_eq!(reminders[0].contact_id, Some(contact.id));
    assert_eq!(reminders[0].assigned_to_id, Some(h.actor_id));
}

#[tokio::test]
async fn test_status_condition_mismatch_creates_no_execution() {
    let h = TestHarness::new();
    let workflow = h
        .create_workflow(json!({
            "name": "Qualified",
            "triggers": [{"triggerType": "CONTACT_STATUS_CHANGED", "conditions": {"statusId": "S1"}}],
            "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE"}}]
        }))
        .await;

    let envelope = h
        .envelope("contact", Uuid::new_v4())
        .with_data(json!({"statusId": "S2"}))
        .with_previous(json!({"statusId": "S0"}));
    let executions = h.dispatch(EventType::ContactStatusChanged, &envelope).await;

    assert!(executions.is_empty());
    assert!(h.workflows.executions_of(workflow.workflow.id).is_empty());

    let matching = h.envelope("contact", Uuid::new_v4()).with_data(json!({"statusId": "S1"}));
    assert_eq!(h.dispatch(EventType::ContactStatusChanged, &matching).await.len(), 1);
}

#[tokio::test]
async fn test_status_change_of_stored_contact_matches_new_status() {
    let h = TestHarness::new();
    let qualified = Uuid::new_v4();
    let workflow = h
        .create_workflow(json!({
            "name": "Qualified lead",
            "triggers": [{
                "triggerType": "CONTACT_STATUS_CHANGED",
                "conditions": {"logic": "AND", "conditions": [
                    {"field": "data.statusId", "operator": "equals", "value": qualified},
                    {"field": "previousData.statusId", "operator": "notEquals", "value": qualified}
                ]}
            }],
            "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE", "subject": "Qualified"}}]
        }))
        .await;

    let previous = fixtures::contact(h.tenant_id);
    let current = atrium_shared::Contact {
        status_id: Some(qualified),
        ..previous.clone()
    };
    h.crm.insert_contact(current.clone());

    let envelope = EventEnvelope::contact_status_changed(&previous, &current, Some(h.actor_id));
    let executions = h.dispatch(EventType::ContactStatusChanged, &envelope).await;

    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].workflow_id, workflow.workflow.id);
    assert_eq!(executions[0].status, ExecutionStatus::Completed);
    let activities = h.crm.activities();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].contact_id, Some(current.id));

    // Re-announcing the same status does not match.
    let unchanged = EventEnvelope::contact_status_changed(&current, &current, Some(h.actor_id));
    assert!(h.dispatch(EventType::ContactStatusChanged, &unchanged).await.is_empty());
}

#[tokio::test]
async fn test_failing_action_stops_the_chain() {
    let h = TestHarness::new();
    h.create_workflow(json!({
        "name": "Broken",
        "triggers": [{"triggerType": "CONTACT_CREATED"}],
        "actions": [
            {"actionType": "UPDATE_CONTACT", "order": 0, "params": {"contactId": Uuid::new_v4(), "name": "X"}},
            {"actionType": "CREATE_ACTIVITY", "order": 1, "params": {"type": "CALL"}}
        ]
    }))
    .await;

    let contact = fixtures::contact(h.tenant_id);
    h.crm.insert_contact(contact.clone());
    let executions = h
        .dispatch(EventType::ContactCreated, &EventEnvelope::contact_created(&contact, None))
        .await;

    let execution = &executions[0];
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.log.len(), 1);
    assert_eq!(execution.log[0].step, 0);
    assert_eq!(execution.log[0].status, StepStatus::Failed);
    assert!(execution.log[0].error.as_deref().unwrap_or_default().contains("not found"));
    assert!(execution.completed_at.is_some());
    assert!(h.crm.activities().is_empty());
}

#[tokio::test]
async fn test_false_execute_condition_skips_action() {
    let h = TestHarness::new();
    h.create_workflow(json!({
        "name": "Escalate high priority",
        "triggers": [{"triggerType": "CONTACT_CREATED"}],
        "actions": [
            {
                "actionType": "CREATE_ACTIVITY",
                "order": 0,
                "params": {"type": "TASK", "subject": "Escalate"},
                "executeCondition": {"field": "data.priority", "operator": "equals", "value": "HIGH"}
            },
            {"actionType": "CREATE_ACTIVITY", "order": 1, "params": {"type": "NOTE"}}
        ]
    }))
    .await;

    let envelope = h
        .envelope("contact", Uuid::new_v4())
        .with_data(json!({"priority": "LOW"}));
    let executions = h.dispatch(EventType::ContactCreated, &envelope).await;

    let execution = &executions[0];
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.log.len(), 2);
    assert_eq!(execution.log[0].status, StepStatus::Skipped);
    assert_eq!(execution.log[0].reason.as_deref(), Some("Condition not met"));
    assert_eq!(execution.log[1].status, StepStatus::Success);

    let activities = h.crm.activities();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].activity_type, "NOTE");
}

#[tokio::test]
async fn test_one_event_fans_out_to_independent_executions() {
    let h = TestHarness::new();
    let ok = h
        .create_workflow(json!({
            "name": "Welcome",
            "triggers": [{"triggerType": "COMPANY_CREATED"}],
            "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE", "subject": "Welcome"}}]
        }))
        .await;
    let broken = h
        .create_workflow(json!({
            "name": "Assign to ghost",
            "triggers": [{"triggerType": "COMPANY_CREATED"}],
            "actions": [{"actionType": "ASSIGN_TO_USER", "params": {"userId": Uuid::new_v4()}}]
        }))
        .await;

    let company = fixtures::company(h.tenant_id);
    h.crm.insert_company(company.clone());
    let executions = h
        .dispatch(EventType::CompanyCreated, &EventEnvelope::company_created(&company, None))
        .await;
    assert_eq!(executions.len(), 2);

    let ok_run = &h.workflows.executions_of(ok.workflow.id)[0];
    let broken_run = &h.workflows.executions_of(broken.workflow.id)[0];
    assert_eq!(ok_run.status, ExecutionStatus::Completed);
    assert_eq!(broken_run.status, ExecutionStatus::Failed);
    assert_eq!(h.crm.activities()[0].company_id, Some(company.id));
}

// ============================================
// Properties
// ============================================

#[tokio::test]
async fn test_inactive_workflow_never_runs() {
    let h = TestHarness::new();
    h.create_workflow(json!({
        "name": "Paused",
        "isActive": false,
        "triggers": [{"triggerType": "CONTACT_CREATED"}],
        "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE"}}]
    }))
    .await;

    let executions = h
        .dispatch(EventType::ContactCreated, &h.envelope("contact", Uuid::new_v4()))
        .await;
    assert!(executions.is_empty());
    assert_eq!(h.workflows.execution_count(), 0);
}

#[tokio::test]
async fn test_deactivated_workflow_stops_matching() {
    let h = TestHarness::new();
    let workflow = h
        .create_workflow(json!({
            "name": "Toggle",
            "triggers": [{"triggerType": "CONTACT_CREATED"}],
            "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE"}}]
        }))
        .await;

    h.engine
        .update_workflow(
            h.tenant_id,
            workflow.workflow.id,
            UpdateWorkflow {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let executions = h
        .dispatch(EventType::ContactCreated, &h.envelope("contact", Uuid::new_v4()))
        .await;
    assert!(executions.is_empty());
}

#[tokio::test]
async fn test_events_never_cross_tenants() {
    let h = TestHarness::new();
    let other_tenant = Uuid::new_v4();
    h.create_workflow_in(
        other_tenant,
        json!({
            "name": "Other tenant",
            "triggers": [{"triggerType": "CONTACT_CREATED"}],
            "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE"}}]
        }),
    )
    .await;

    let executions = h
        .dispatch(EventType::ContactCreated, &h.envelope("contact", Uuid::new_v4()))
        .await;
    assert!(executions.is_empty());
}

#[tokio::test]
async fn test_log_follows_action_order() {
    let h = TestHarness::new();
    h.create_workflow(json!({
        "name": "Out of order",
        "triggers": [{"triggerType": "CONTACT_UPDATED"}],
        "actions": [
            {"actionType": "CREATE_ACTIVITY", "order": 30, "params": {"type": "C"}},
            {"actionType": "CREATE_ACTIVITY", "order": 10, "params": {"type": "A"}},
            {
                "actionType": "CREATE_ACTIVITY",
                "order": 20,
                "params": {"type": "B"},
                "executeCondition": {"field": "data.vip", "operator": "equals", "value": true}
            }
        ]
    }))
    .await;

    let executions = h
        .dispatch(EventType::ContactUpdated, &h.envelope("contact", Uuid::new_v4()))
        .await;
    let steps: Vec<i32> = executions[0].log.iter().map(|entry| entry.step).collect();
    assert_eq!(steps, vec![10, 20, 30]);
    assert_eq!(executions[0].log[1].status, StepStatus::Skipped);

    let kinds: Vec<String> = h.crm.activities().into_iter().map(|a| a.activity_type).collect();
    assert_eq!(kinds, vec!["A".to_string(), "C".to_string()]);
}

#[tokio::test]
async fn test_results_flow_into_later_actions() {
    let h = TestHarness::new();
    h.create_workflow(json!({
        "name": "Chained",
        "triggers": [{"triggerType": "CONTACT_CREATED"}],
        "actions": [
            {"actionType": "CREATE_REMINDER", "order": 0, "params": {"title": "Call {{data.name}}", "dueDate": "2026-03-01"}},
            {"actionType": "CREATE_ACTIVITY", "order": 1, "params": {"type": "NOTE", "description": "after {{results}}"}}
        ]
    }))
    .await;

    let envelope = h.envelope("contact", Uuid::new_v4()).with_data(json!({"name": "Ada"}));
    let execution = &h.dispatch(EventType::ContactCreated, &envelope).await[0];
    assert_eq!(execution.status, ExecutionStatus::Completed);

    let reminder = &h.crm.reminders()[0];
    assert_eq!(reminder.title, "Call Ada");

    let first_action = execution.log[0].action_id;
    assert_eq!(execution.context.results()[&first_action]["reminderId"], json!(reminder.id));
    assert_eq!(execution.log[0].result, Some(execution.context.results()[&first_action].clone()));

    let description = h.crm.activities()[0].description.clone().unwrap_or_default();
    assert!(description.starts_with("after "));
    assert!(description.contains(&reminder.id.to_string()));
}

#[tokio::test]
async fn test_manual_run_has_no_trigger() {
    let h = TestHarness::new();
    let workflow = h
        .create_workflow(json!({
            "name": "Manual",
            "triggers": [{"triggerType": "CONTACT_CREATED"}],
            "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE"}}]
        }))
        .await;

    let contact = fixtures::contact(h.tenant_id);
    let run = ManualRun {
        entity_type: Some("contact".to_string()),
        entity_id: Some(contact.id),
        data: Some(json!({"source": "button"})),
    };
    let scheduled = h
        .engine
        .trigger_manually(h.tenant_id, workflow.workflow.id, Some(h.actor_id), run)
        .await
        .unwrap();
    assert_eq!(scheduled.status, ExecutionStatus::Pending);

    let execution = h.wait_for(scheduled.id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.trigger_id, None);
    assert_eq!(execution.entity_id, contact.id);
    assert_eq!(h.crm.activities()[0].created_by_id, Some(h.actor_id));
}

#[tokio::test]
async fn test_manual_run_of_inactive_workflow_conflicts() {
    let h = TestHarness::new();
    let workflow = h
        .create_workflow(json!({
            "name": "Off",
            "isActive": false,
            "triggers": [{"triggerType": "CONTACT_CREATED"}],
            "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE"}}]
        }))
        .await;

    let run = ManualRun {
        entity_type: Some("contact".to_string()),
        entity_id: Some(Uuid::new_v4()),
        data: None,
    };
    let err = h
        .engine
        .trigger_manually(h.tenant_id, workflow.workflow.id, None, run)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Inactive(id) if id == workflow.workflow.id));
}

#[tokio::test]
async fn test_cancel_interrupts_delay() {
    let h = TestHarness::new();
    let workflow = h
        .create_workflow(json!({
            "name": "Slow",
            "triggers": [{"triggerType": "CONTACT_CREATED"}],
            "actions": [
                {"actionType": "DELAY", "order": 0, "params": {"delayInMinutes": 30}},
                {"actionType": "CREATE_ACTIVITY", "order": 1, "params": {"type": "NOTE"}}
            ]
        }))
        .await;

    let run = ManualRun {
        entity_type: Some("contact".to_string()),
        entity_id: Some(Uuid::new_v4()),
        data: None,
    };
    let scheduled = h
        .engine
        .trigger_manually(h.tenant_id, workflow.workflow.id, None, run)
        .await
        .unwrap();
    h.wait_until(scheduled.id, |e| e.status == ExecutionStatus::Running).await;

    let canceled = h.engine.cancel(h.tenant_id, scheduled.id).await.unwrap();
    assert_eq!(canceled.status, ExecutionStatus::Canceled);

    let execution = h.wait_for(scheduled.id).await;
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    assert!(execution.log.is_empty());
    assert!(execution.completed_at.is_some());

    // Give the interrupted task a chance to (wrongly) continue.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(h.crm.activities().is_empty());

    let err = h.engine.cancel(h.tenant_id, scheduled.id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyFinished { status: ExecutionStatus::Canceled, .. }));
}

/// Holds every delivery until released, so a cancel can land mid-request
#[derive(Default)]
struct GatedWebhooks {
    started: Notify,
    release: Notify,
    delivered: AtomicUsize,
}

#[async_trait]
impl WebhookSender for GatedWebhooks {
    async fn post(&self, _request: &WebhookRequest) -> Result<u16, WebhookError> {
        self.started.notify_one();
        self.release.notified().await;
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(200)
    }
}

#[tokio::test]
async fn test_cancel_during_webhook_still_logs_the_delivery() {
    let webhooks = Arc::new(GatedWebhooks::default());
    let h = TestHarness::with_outbound(Arc::new(RecordingMailer::default()), webhooks.clone());
    let workflow = h
        .create_workflow(json!({
            "name": "Notify then note",
            "triggers": [{"triggerType": "CONTACT_CREATED"}],
            "actions": [
                {"actionType": "WEBHOOK", "order": 0, "params": {"url": "https://hooks.example.com/in"}},
                {"actionType": "CREATE_ACTIVITY", "order": 1, "params": {"type": "NOTE"}}
            ]
        }))
        .await;
    let webhook_action = workflow.actions[0].id;

    let run = ManualRun {
        entity_type: Some("contact".to_string()),
        entity_id: Some(Uuid::new_v4()),
        data: None,
    };
    let scheduled = h
        .engine
        .trigger_manually(h.tenant_id, workflow.workflow.id, None, run)
        .await
        .unwrap();
    webhooks.started.notified().await;

    let canceled = h.engine.cancel(h.tenant_id, scheduled.id).await.unwrap();
    assert_eq!(canceled.status, ExecutionStatus::Canceled);
    webhooks.release.notify_one();

    let execution = h.wait_until(scheduled.id, |e| e.log.len() == 1).await;
    assert_eq!(webhooks.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    assert_eq!(execution.log[0].action_id, webhook_action);
    assert_eq!(execution.log[0].status, StepStatus::Success);
    assert_eq!(execution.log[0].result.as_ref().unwrap()["status"], json!(200));
    assert_eq!(execution.context.results()[&webhook_action]["status"], json!(200));

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(h.crm.activities().is_empty());
    let execution = h.wait_for(scheduled.id).await;
    assert_eq!(execution.log.len(), 1);
}

#[tokio::test]
async fn test_execution_lookup_is_tenant_scoped() {
    let h = TestHarness::new();
    h.create_workflow(json!({
        "name": "Scoped",
        "triggers": [{"triggerType": "CONTACT_CREATED"}],
        "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE"}}]
    }))
    .await;
    let executions = h
        .dispatch(EventType::ContactCreated, &h.envelope("contact", Uuid::new_v4()))
        .await;

    let err = h.engine.get_execution(Uuid::new_v4(), executions[0].id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::ExecutionNotFound(_)));
}

#[tokio::test]
async fn test_bus_publish_reaches_engine() {
    let h = TestHarness::new();
    h.engine.start(&h.bus);
    let workflow = h
        .create_workflow(json!({
            "name": "Via bus",
            "triggers": [{"triggerType": "SEGMENT_MEMBERSHIP_CHANGED"}],
            "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE"}}]
        }))
        .await;

    h.bus
        .publish(EventType::SegmentContactAdded, &h.envelope("contact", Uuid::new_v4()));
    h.bus
        .publish(EventType::ContactDeleted, &h.envelope("contact", Uuid::new_v4()));

    let executions = h.wait_for_workflow(workflow.workflow.id, 1).await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Completed);

    h.engine.stop(&h.bus);
    assert_eq!(h.bus.listener_count(EventType::ContactCreated), 0);
}

#[tokio::test]
async fn test_history_is_newest_first_and_clamped() {
    let h = TestHarness::new();
    let workflow = h
        .create_workflow(json!({
            "name": "Busy",
            "triggers": [{"triggerType": "CONTACT_CREATED"}],
            "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE"}}]
        }))
        .await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let executions = h
            .dispatch(EventType::ContactCreated, &h.envelope("contact", Uuid::new_v4()))
            .await;
        ids.push(executions[0].id);
    }

    let history = h.engine.history(h.tenant_id, workflow.workflow.id, Some(2)).await.unwrap();
    assert_eq!(history.iter().map(|e| e.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

    let all = h.engine.history(h.tenant_id, workflow.workflow.id, Some(0)).await.unwrap();
    assert_eq!(all.len(), 1);

    let missing = h.engine.history(h.tenant_id, Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(missing, WorkflowError::WorkflowNotFound(_)));
}

#[tokio::test]
async fn test_delete_removes_executions() {
    let h = TestHarness::new();
    let workflow = h
        .create_workflow(json!({
            "name": "Short lived",
            "triggers": [{"triggerType": "CONTACT_CREATED"}],
            "actions": [{"actionType": "CREATE_ACTIVITY", "params": {"type": "NOTE"}}]
        }))
        .await;
    h.dispatch(EventType::ContactCreated, &h.envelope("contact", Uuid::new_v4()))
        .await;

    h.engine.delete_workflow(h.tenant_id, workflow.workflow.id).await.unwrap();
    assert_eq!(h.workflows.execution_count(), 0);
    let again = h.engine.delete_workflow(h.tenant_id, workflow.workflow.id).await.unwrap_err();
    assert!(matches!(again, WorkflowError::WorkflowNotFound(_)));
}

#[tokio::test]
async fn test_invalid_definition_is_rejected() {
    let h = TestHarness::new();
    let request = serde_json::from_value(json!({
        "name": "",
        "triggers": [{"triggerType": "CONTACT_EXPLODED"}],
        "actions": [{"actionType": "DELAY", "params": {"delayInMinutes": 999999}}]
    }))
    .unwrap();

    let err = h.engine.create_workflow(h.tenant_id, None, request).await.unwrap_err();
    let WorkflowError::Validation(errors) = err else {
        panic!("expected validation error");
    };
    assert!(errors.details().contains_key("name"));
    assert!(errors.details().contains_key("triggers[0].triggerType"));
    assert!(errors.details().contains_key("actions[0].params.delayInMinutes"));
    assert!(h.engine.list_workflows(h.tenant_id).await.unwrap().is_empty());
}
