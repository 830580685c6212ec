use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

pub mod events;
pub mod executions;
pub mod workflows;

pub use events::event_routes;
pub use executions::execution_routes;
pub use workflows::workflow_routes;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub in_flight_executions: usize,
    pub timestamp: String,
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(health))
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = state.engine.ping().await;
    let status = if database_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(HealthResponse {
            status: if database_ok { "ok" } else { "degraded" },
            database: if database_ok { "up" } else { "down" },
            in_flight_executions: state.engine.scheduler().in_flight(),
            timestamp: Utc::now().to_rfc3339(),
        }),
    )
}
