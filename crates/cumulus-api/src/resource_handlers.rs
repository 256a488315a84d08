//! REST handlers for multi-zone and highly-available resources.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use cumulus_orchestrator::{CreateHighlyAvailable, CreateMultiZone};

use crate::ApiState;
use crate::handlers::ListFilter;
use crate::response::{JsonBody, created, deleted, reply};

/// POST /api/v1/projects/:id/multi-zone
pub async fn create_multi_zone(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
    JsonBody(req): JsonBody<CreateMultiZone>,
) -> impl IntoResponse {
    created(state.plane.coordinator.create_multi_zone(&project_id, req).await)
}

/// POST /api/v1/projects/:id/highly-available
pub async fn create_highly_available(
    State(state): State<ApiState>,
    Path(project_id): Path<String>,
    JsonBody(req): JsonBody<CreateHighlyAvailable>,
) -> impl IntoResponse {
    created(state.plane.coordinator.create_highly_available(&project_id, req).await)
}

/// GET /api/v1/resources?project_id=&kind=
pub async fn list_resources(State(state): State<ApiState>, Query(filter): Query<ListFilter>) -> impl IntoResponse {
    reply(state.plane.coordinator.list(filter.project_id.as_deref(), filter.kind))
}

/// GET /api/v1/resources/:id
pub async fn get_resource(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.coordinator.get(&id))
}

/// DELETE /api/v1/resources/:id
pub async fn delete_resource(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.plane.coordinator.delete(&id).await)
}

/// DELETE /api/v1/resources/:id/members/:instance_id
pub async fn remove_member(
    State(state): State<ApiState>,
    Path((id, instance_id)): Path<(String, String)>,
) -> impl IntoResponse {
    reply(state.plane.coordinator.remove_member(&id, &instance_id).await)
}
