use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::TenantContext;
use crate::workflows::WorkflowExecution;
use crate::AppState;

pub fn execution_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_execution))
        .route("/:id/cancel", post(cancel_execution))
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowExecution>> {
    Ok(Json(state.engine.get_execution(tenant.tenant_id, id).await?))
}

async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowExecution>> {
    Ok(Json(state.engine.cancel(tenant.tenant_id, id).await?))
}
