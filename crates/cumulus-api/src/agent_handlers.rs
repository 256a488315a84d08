//! Agent records, the live agent view and the agent WebSocket endpoint.
//!
//! Agents dial `GET /agents/ws` with their id in the `x-agent-id` header.
//! The id must belong to a persisted agent record; the socket is then
//! upgraded, wrapped into an RPC channel and registered under the record's
//! kind.

use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use cumulus_agents::ws;
use cumulus_orchestrator::CreateAgentRecord;
use tracing::{info, warn};

use crate::ApiState;
use crate::response::{ApiResponse, JsonBody, created, deleted, error_response, failure, reply};

pub const AGENT_ID_HEADER: &str = "x-agent-id";

/// GET /api/v1/agents
pub async fn list_agents(State(state): State<ApiState>) -> impl IntoResponse {
    reply(state.plane.topology.list_agents())
}

/// POST /api/v1/agents
pub async fn create_agent(State(state): State<ApiState>, JsonBody(req): JsonBody<CreateAgentRecord>) -> impl IntoResponse {
    created(state.plane.topology.create_agent(req))
}

/// GET /api/v1/agents/:id
pub async fn get_agent(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    reply(state.plane.topology.get_agent(&id))
}

/// DELETE /api/v1/agents/:id
pub async fn delete_agent(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    deleted(state.plane.topology.delete_agent(&id).await)
}

/// GET /api/v1/agents/connected
pub async fn connected_agents(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.plane.registry.connected().await)
}

/// GET /agents/ws
pub async fn agent_socket(
    State(state): State<ApiState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(agent_id) = headers.get(AGENT_ID_HEADER).and_then(|v| v.to_str().ok()) else {
        return error_response("missing x-agent-id header", StatusCode::BAD_REQUEST).into_response();
    };
    let record = match state.plane.topology.get_agent(agent_id) {
        Ok(record) => record,
        Err(e) => return failure(&e),
    };
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let registry = state.plane.registry.clone();
    let timeout = state.rpc_timeout;
    upgrade.on_upgrade(move |socket| async move {
        let agent_id = record.meta.id;
        let channel = ws::attach(socket, &agent_id, timeout);
        match registry.register(record.kind, &agent_id, channel).await {
            Ok(()) => info!(%agent_id, kind = %record.kind, "agent socket attached"),
            Err(e) => warn!(%agent_id, error = %e, "agent registration failed"),
        }
    })
}
