use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::events::{EventEnvelope, EventType};
use crate::middleware::TenantContext;
use crate::AppState;

/// A domain event reported by CRM code running in another process
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEvent {
    pub event_type: String,
    pub envelope: IngestEnvelope,
}

/// Envelope as posted; tenant comes from the request, never the body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestEnvelope {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub previous_data: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAccepted {
    pub event_type: EventType,
    pub entity_id: Uuid,
}

pub fn event_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(publish_event))
}

async fn publish_event(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(payload): Json<IngestEvent>,
) -> ApiResult<(StatusCode, Json<EventAccepted>)> {
    let event_type: EventType = payload
        .event_type
        .parse()
        .map_err(|_| ApiError::validation_single("eventType", format!("unknown event type '{}'", payload.event_type)))?;

    let body = payload.envelope;
    if body.entity_type.trim().is_empty() {
        return Err(ApiError::validation_single("envelope.entityType", "entityType is required"));
    }

    let mut envelope = EventEnvelope::new(tenant.tenant_id, body.entity_type, body.entity_id);
    if let Some(actor) = body.user_id.or(tenant.user_id) {
        envelope = envelope.with_actor(actor);
    }
    if let Some(data) = body.data {
        envelope = envelope.with_data(data);
    }
    if let Some(previous) = body.previous_data {
        envelope = envelope.with_previous(previous);
    }

    state.bus.publish(event_type, &envelope);
    tracing::debug!(event = %event_type, entity_id = %envelope.entity_id, "Domain event ingested");

    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted {
            event_type,
            entity_id: envelope.entity_id,
        }),
    ))
}
