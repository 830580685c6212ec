use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::middleware::TenantContext;
use crate::workflows::{
    ManualRun, NewAction, NewTrigger, NewWorkflow, UpdateWorkflow, Workflow, WorkflowAction, WorkflowDefinition,
    WorkflowExecution, WorkflowTrigger,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ReplaceTriggers {
    #[serde(default)]
    pub triggers: Vec<NewTrigger>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceActions {
    #[serde(default)]
    pub actions: Vec<NewAction>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAccepted {
    pub execution_id: Uuid,
}

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route("/:id", get(get_workflow).put(update_workflow).delete(delete_workflow))
        .route("/:id/triggers", put(replace_triggers))
        .route("/:id/actions", put(replace_actions))
        .route("/:id/execute", post(execute_workflow))
        .route("/:id/executions", get(list_executions))
}

async fn list_workflows(State(state): State<Arc<AppState>>, tenant: TenantContext) -> ApiResult<Json<Vec<Workflow>>> {
    Ok(Json(state.engine.list_workflows(tenant.tenant_id).await?))
}

async fn create_workflow(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(payload): Json<NewWorkflow>,
) -> ApiResult<(StatusCode, Json<WorkflowDefinition>)> {
    let definition = state
        .engine
        .create_workflow(tenant.tenant_id, tenant.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

async fn get_workflow(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowDefinition>> {
    Ok(Json(state.engine.get_workflow(tenant.tenant_id, id).await?))
}

async fn update_workflow(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateWorkflow>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.engine.update_workflow(tenant.tenant_id, id, payload).await?))
}

async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.delete_workflow(tenant.tenant_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn replace_triggers(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReplaceTriggers>,
) -> ApiResult<Json<Vec<WorkflowTrigger>>> {
    Ok(Json(
        state.engine.replace_triggers(tenant.tenant_id, id, payload.triggers).await?,
    ))
}

async fn replace_actions(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReplaceActions>,
) -> ApiResult<Json<Vec<WorkflowAction>>> {
    Ok(Json(
        state.engine.replace_actions(tenant.tenant_id, id, payload.actions).await?,
    ))
}

/// Manual run. Answers 202 as soon as the execution is persisted; the
/// outcome is read back from `GET /executions/:id`.
async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManualRun>,
) -> ApiResult<(StatusCode, Json<ExecutionAccepted>)> {
    let execution = state
        .engine
        .trigger_manually(tenant.tenant_id, id, tenant.user_id, payload)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ExecutionAccepted {
            execution_id: execution.id,
        }),
    ))
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<WorkflowExecution>>> {
    Ok(Json(state.engine.history(tenant.tenant_id, id, params.limit).await?))
}
