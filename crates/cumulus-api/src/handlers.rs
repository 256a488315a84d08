//! REST handlers for the topology and for projects.
//!
//! Each handler calls one control-plane service and maps its result
//! through [`crate::response`].

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use cumulus_orchestrator::{
    CreateHost, CreateProject, CreateRegion, CreateStoragePool, CreateSubnet, CreateZone, UpdateHostPricing,
};
use cumulus_state::{CoordinatedKind, ProjectQuotas};
use serde::Deserialize;

use crate::ApiState;
use crate::response::{JsonBody, created, deleted, reply};

/// Optional filters of the list endpoints. Each endpoint reads the ones
/// that apply to it.
#[derive(Debug, Default, Deserialize)]
pub struct ListFilter {
    pub region_id: Option<String>,
    pub zone_id: Option<String>,
    pub subnet_id: Option<String>,
    pub project_id: Option<String>,
    pub kind: Option<CoordinatedKind>,
}

// ── Regions ────────────────────────────────────────────────────

/// GET /api/v1/regions
pub async fn list_regions(State(state): State<ApiState>) -> impl IntoResponse {
    reply(state.plane.topology.list_regions())
}

/// POST /api/v1/regions
pub async fn create_region(State(state): State<ApiState>, JsonBody(req): JsonBody<CreateRegion>) -> impl IntoResponse {
    created(state.plane.topology.create_region(req))
}

/// GET /api/v1/regions/:id
pub async fn get_region(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.topology.get_region(&id))
}

/// DELETE /api/v1/regions/:id
pub async fn delete_region(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.plane.topology.delete_region(&id))
}

// ── Zones ──────────────────────────────────────────────────────

/// GET /api/v1/zones?region_id=
pub async fn list_zones(State(state): State<ApiState>, Query(filter): Query<ListFilter>) -> impl IntoResponse {
    reply(state.plane.topology.list_zones(filter.region_id.as_deref()))
}

/// POST /api/v1/zones
pub async fn create_zone(State(state): State<ApiState>, JsonBody(req): JsonBody<CreateZone>) -> impl IntoResponse {
    created(state.plane.topology.create_zone(req))
}

/// GET /api/v1/zones/:id
pub async fn get_zone(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.topology.get_zone(&id))
}

/// DELETE /api/v1/zones/:id
pub async fn delete_zone(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.plane.topology.delete_zone(&id))
}

// ── Hosts ──────────────────────────────────────────────────────

/// GET /api/v1/hosts?zone_id=
pub async fn list_hosts(State(state): State<ApiState>, Query(filter): Query<ListFilter>) -> impl IntoResponse {
    reply(state.plane.topology.list_hosts(filter.zone_id.as_deref()))
}

/// POST /api/v1/hosts
pub async fn create_host(State(state): State<ApiState>, JsonBody(req): JsonBody<CreateHost>) -> impl IntoResponse {
    created(state.plane.topology.create_host(req))
}

/// GET /api/v1/hosts/:id
pub async fn get_host(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.topology.get_host(&id))
}

/// PUT /api/v1/hosts/:id/pricing
pub async fn update_host_pricing(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    JsonBody(req): JsonBody<UpdateHostPricing>,
) -> impl IntoResponse {
    reply(state.plane.topology.update_host_pricing(&id, req))
}

/// DELETE /api/v1/hosts/:id
pub async fn delete_host(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.plane.topology.delete_host(&id))
}

// ── Storage pools ──────────────────────────────────────────────

/// GET /api/v1/storage-pools?region_id=
pub async fn list_storage_pools(State(state): State<ApiState>, Query(filter): Query<ListFilter>) -> impl IntoResponse {
    reply(state.plane.topology.list_storage_pools(filter.region_id.as_deref()))
}

/// POST /api/v1/storage-pools
pub async fn create_storage_pool(
    State(state): State<ApiState>,
    JsonBody(req): JsonBody<CreateStoragePool>,
) -> impl IntoResponse {
    created(state.plane.topology.create_storage_pool(req))
}

/// GET /api/v1/storage-pools/:id
pub async fn get_storage_pool(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.topology.get_storage_pool(&id))
}

/// DELETE /api/v1/storage-pools/:id
pub async fn delete_storage_pool(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.plane.topology.delete_storage_pool(&id))
}

// ── Subnets and adapters ───────────────────────────────────────

/// GET /api/v1/subnets?region_id=
pub async fn list_subnets(State(state): State<ApiState>, Query(filter): Query<ListFilter>) -> impl IntoResponse {
    reply(state.plane.topology.list_subnets(filter.region_id.as_deref()))
}

/// POST /api/v1/subnets
pub async fn create_subnet(State(state): State<ApiState>, JsonBody(req): JsonBody<CreateSubnet>) -> impl IntoResponse {
    created(state.plane.topology.create_subnet(req))
}

/// GET /api/v1/subnets/:id
pub async fn get_subnet(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.topology.get_subnet(&id))
}

/// DELETE /api/v1/subnets/:id
pub async fn delete_subnet(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.plane.topology.delete_subnet(&id))
}

/// GET /api/v1/adapters?subnet_id=
pub async fn list_adapters(State(state): State<ApiState>, Query(filter): Query<ListFilter>) -> impl IntoResponse {
    reply(state.plane.topology.list_adapters(filter.subnet_id.as_deref()))
}

/// GET /api/v1/adapters/:id
pub async fn get_adapter(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.topology.get_adapter(&id))
}

// ── Projects ───────────────────────────────────────────────────

/// GET /api/v1/projects
pub async fn list_projects(State(state): State<ApiState>) -> impl IntoResponse {
    reply(state.plane.projects.list())
}

/// POST /api/v1/projects
pub async fn create_project(State(state): State<ApiState>, JsonBody(req): JsonBody<CreateProject>) -> impl IntoResponse {
    created(state.plane.projects.create(req))
}

/// GET /api/v1/projects/:id
pub async fn get_project(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.projects.get(&id))
}

/// PUT /api/v1/projects/:id/quotas
pub async fn set_project_quotas(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    JsonBody(quotas): JsonBody<ProjectQuotas>,
) -> impl IntoResponse {
    reply(state.plane.projects.set_quotas(&id, quotas))
}

/// POST /api/v1/projects/:id/reconcile
pub async fn reconcile_project(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.reconciler.reconcile_project(&id))
}

/// DELETE /api/v1/projects/:id
pub async fn delete_project(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.plane.projects.delete(&id))
}
