//! cumulus-api: REST API for the Cumulus control plane.
//!
//! Provides axum route handlers over the [`ControlPlane`] services and the
//! WebSocket endpoint remote agents dial into.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET, POST | `/api/v1/regions` | List / create regions |
//! | GET, DELETE | `/api/v1/regions/:id` | Get / delete a region |
//! | GET, POST | `/api/v1/zones` | List (`?region_id=`) / create zones |
//! | GET, DELETE | `/api/v1/zones/:id` | Get / delete a zone |
//! | GET, POST | `/api/v1/hosts` | List (`?zone_id=`) / create hosts |
//! | GET, DELETE | `/api/v1/hosts/:id` | Get / delete a host |
//! | PUT | `/api/v1/hosts/:id/pricing` | Change pricing and overcommit |
//! | GET, POST | `/api/v1/storage-pools` | List / create storage pools |
//! | GET, DELETE | `/api/v1/storage-pools/:id` | Get / delete a storage pool |
//! | GET, POST | `/api/v1/subnets` | List / create subnets |
//! | GET, DELETE | `/api/v1/subnets/:id` | Get / delete a subnet |
//! | GET | `/api/v1/adapters`, `/api/v1/adapters/:id` | Read adapters |
//! | GET, POST | `/api/v1/projects` | List / create projects |
//! | GET, DELETE | `/api/v1/projects/:id` | Get / delete a project |
//! | PUT | `/api/v1/projects/:id/quotas` | Replace quotas |
//! | POST | `/api/v1/projects/:id/reconcile` | Repair dangling references |
//! | GET, POST | `/api/v1/projects/:id/instances` | List / create instances |
//! | POST | `/api/v1/projects/:id/multi-zone` | Create a multi-zone resource |
//! | POST | `/api/v1/projects/:id/highly-available` | Create a highly-available resource |
//! | GET | `/api/v1/instances` | List instances (`?project_id=`) |
//! | GET, DELETE | `/api/v1/instances/:id` | Get / delete an instance |
//! | POST | `/api/v1/instances/:id/power/:action` | start, stop, shutdown, reboot, reset, suspend, resume |
//! | PUT | `/api/v1/instances/:id/autostart` | Toggle auto start |
//! | GET | `/api/v1/instances/:id/{state,console,running}` | Hypervisor queries |
//! | GET | `/api/v1/resources` | List coordinated resources (`?project_id=&kind=`) |
//! | GET, DELETE | `/api/v1/resources/:id` | Get / delete a coordinated resource |
//! | DELETE | `/api/v1/resources/:id/members/:instance_id` | Remove one member |
//! | GET, POST | `/api/v1/agents` | List / create agent records |
//! | GET | `/api/v1/agents/connected` | Live agent sessions |
//! | GET, DELETE | `/api/v1/agents/:id` | Get / delete an agent record |
//! | GET | `/agents/ws` | Agent WebSocket (`x-agent-id` header) |

pub mod agent_handlers;
pub mod handlers;
pub mod instance_handlers;
pub mod resource_handlers;
pub mod response;

#[cfg(test)]
mod test_support;

use std::time::Duration;

use axum::Router;
use axum::routing::{delete, get, post, put};
use cumulus_orchestrator::ControlPlane;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub plane: ControlPlane,
    /// Transport timeout of RPC calls on agent sockets.
    pub rpc_timeout: Duration,
}

/// Build the complete router (REST API + agent endpoint).
pub fn build_router(plane: ControlPlane, rpc_timeout: Duration) -> Router {
    let state = ApiState { plane, rpc_timeout };

    let api_routes = Router::new()
        .route("/regions", get(handlers::list_regions).post(handlers::create_region))
        .route("/regions/{id}", get(handlers::get_region).delete(handlers::delete_region))
        .route("/zones", get(handlers::list_zones).post(handlers::create_zone))
        .route("/zones/{id}", get(handlers::get_zone).delete(handlers::delete_zone))
        .route("/hosts", get(handlers::list_hosts).post(handlers::create_host))
        .route("/hosts/{id}", get(handlers::get_host).delete(handlers::delete_host))
        .route("/hosts/{id}/pricing", put(handlers::update_host_pricing))
        .route(
            "/storage-pools",
            get(handlers::list_storage_pools).post(handlers::create_storage_pool),
        )
        .route(
            "/storage-pools/{id}",
            get(handlers::get_storage_pool).delete(handlers::delete_storage_pool),
        )
        .route("/subnets", get(handlers::list_subnets).post(handlers::create_subnet))
        .route("/subnets/{id}", get(handlers::get_subnet).delete(handlers::delete_subnet))
        .route("/adapters", get(handlers::list_adapters))
        .route("/adapters/{id}", get(handlers::get_adapter))
        .route("/projects", get(handlers::list_projects).post(handlers::create_project))
        .route("/projects/{id}", get(handlers::get_project).delete(handlers::delete_project))
        .route("/projects/{id}/quotas", put(handlers::set_project_quotas))
        .route("/projects/{id}/reconcile", post(handlers::reconcile_project))
        .route(
            "/projects/{id}/instances",
            get(instance_handlers::list_project_instances).post(instance_handlers::create_instance),
        )
        .route("/projects/{id}/multi-zone", post(resource_handlers::create_multi_zone))
        .route(
            "/projects/{id}/highly-available",
            post(resource_handlers::create_highly_available),
        )
        .route("/instances", get(instance_handlers::list_instances))
        .route(
            "/instances/{id}",
            get(instance_handlers::get_instance).delete(instance_handlers::delete_instance),
        )
        .route("/instances/{id}/power/{action}", post(instance_handlers::power_instance))
        .route("/instances/{id}/autostart", put(instance_handlers::set_auto_start))
        .route("/instances/{id}/state", get(instance_handlers::instance_state))
        .route("/instances/{id}/console", get(instance_handlers::instance_console))
        .route("/instances/{id}/running", get(instance_handlers::instance_running))
        .route("/resources", get(resource_handlers::list_resources))
        .route(
            "/resources/{id}",
            get(resource_handlers::get_resource).delete(resource_handlers::delete_resource),
        )
        .route(
            "/resources/{id}/members/{instance_id}",
            delete(resource_handlers::remove_member),
        )
        .route("/agents", get(agent_handlers::list_agents).post(agent_handlers::create_agent))
        .route("/agents/connected", get(agent_handlers::connected_agents))
        .route(
            "/agents/{id}",
            get(agent_handlers::get_agent).delete(agent_handlers::delete_agent),
        )
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/agents/ws", get(agent_handlers::agent_socket).with_state(state))
}

#[cfg(test)]
pub(crate) fn test_state() -> ApiState {
    use cumulus_agents::AgentRegistry;
    use cumulus_core::ControlPlaneConfig;
    use cumulus_state::StateStore;

    let store = StateStore::open_in_memory().unwrap();
    ApiState {
        plane: ControlPlane::new(store, AgentRegistry::new(), &ControlPlaneConfig::default()),
        rpc_timeout: Duration::from_secs(5),
    }
}
