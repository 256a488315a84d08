//! REST handlers for instances and their power actions.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use cumulus_orchestrator::{CreateInstance, PowerAction};
use serde::Deserialize;
use serde_json::json;

use crate::ApiState;
use crate::handlers::ListFilter;
use crate::response::{JsonBody, created, deleted, failure, reply};

#[derive(Debug, Deserialize)]
pub struct AutoStartRequest {
    pub enabled: bool,
}

/// GET /api/v1/instances?project_id=
pub async fn list_instances(State(state): State<ApiState>, Query(filter): Query<ListFilter>) -> impl IntoResponse {
    reply(state.plane.instances.list(filter.project_id.as_deref()))
}

/// GET /api/v1/projects/:id/instances
pub async fn list_project_instances(State(state): State<ApiState>, Path(project_id): Path<String>) -> impl IntoResponse {
    if let Err(e) = state.plane.projects.get(&project_id) {
        return failure(&e);
    }
    reply(state.plane.instances.list(Some(&project_id)))
}

/// POST /api/v1/projects/:id/instances
pub async fn create_instance(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
    JsonBody(req): JsonBody<CreateInstance>,
) -> impl IntoResponse {
    created(state.plane.instances.create(&project_id, req).await)
}

/// GET /api/v1/instances/:id
pub async fn get_instance(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.instances.get(&id))
}

/// DELETE /api/v1/instances/:id
pub async fn delete_instance(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.plane.instances.delete(&id).await)
}

/// POST /api/v1/instances/:id/power/:action
pub async fn power_instance(
    State(state): State<ApiState>,
    Path((id, action)): Path<(String, String)>,
) -> impl IntoResponse {
    let action: PowerAction = match action.parse() {
        Ok(action) => action,
        Err(e) => return failure(&e),
    };
    reply(state.plane.instances.power(&id, action).await)
}

/// PUT /api/v1/instances/:id/autostart
pub async fn set_auto_start(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<AutoStartRequest>,
) -> impl IntoResponse {
    let result = state.plane.instances.set_auto_start(&id, req.enabled).await;
    reply(result.map(|()| json!({ "enabled": req.enabled })))
}

/// GET /api/v1/instances/:id/state
pub async fn instance_state(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.instances.state(&id).await.map(|s| json!({ "state": s })))
}

/// GET /api/v1/instances/:id/console
pub async fn instance_console(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.instances.remote_console_url(&id).await.map(|url| json!({ "url": url })))
}

/// GET /api/v1/instances/:id/running
pub async fn instance_running(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.instances.is_running(&id).await.map(|running| json!({ "running": running })))
}
