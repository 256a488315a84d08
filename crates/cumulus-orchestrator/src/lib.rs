//! cumulus-orchestrator: the control plane's services.
//!
//! # Architecture
//!
//! ```text
//! ControlPlane
//!   ├── TopologyService   regions, zones, hosts, pools, subnets, agent records
//!   ├── ProjectService    tenants and private subnet leases
//!   ├── InstanceService   placement → adapter → CreateInstance → bookkeeping
//!   ├── Coordinator       multi-zone / highly-available resources
//!   │     └── virtual IPs (reserved adapters + VRRP ids) before members
//!   ├── Reconciler        dangling reference repair
//!   └── registration hook host rescans, pool stats, network reloads
//! ```
//!
//! Services are cheap to clone and share one [`StateStore`] and one
//! [`AgentRegistry`].

pub mod coordinator;
pub mod error;
pub mod hooks;
pub mod instances;
pub mod projects;
pub mod reconcile;
pub mod topology;

#[cfg(test)]
mod fixture;

pub use coordinator::{Coordinator, CreateHighlyAvailable, CreateMultiZone, assign_masters};
pub use error::{ErrorKind, OrchestratorError, OrchestratorResult};
pub use hooks::{RegistrationEffects, registration_hook};
pub use instances::{CreateInstance, InstanceService, PowerAction};
pub use projects::{CreateProject, ProjectService};
pub use reconcile::{ReconcileReport, Reconciler};
pub use topology::{
    CreateAgentRecord, CreateHost, CreateRegion, CreateStoragePool, CreateSubnet, CreateZone, TopologyService,
    UpdateHostPricing,
};

use cumulus_agents::AgentRegistry;
use cumulus_cascade::Cascade;
use cumulus_core::ControlPlaneConfig;
use cumulus_net::{AddressAllocator, VrrpPool};
use cumulus_placement::{HostElector, ScoringWeights};
use cumulus_state::StateStore;

/// Every service of the control plane, wired to one store and registry.
#[derive(Clone)]
pub struct ControlPlane {
    pub state: StateStore,
    pub registry: AgentRegistry,
    pub cascade: Cascade,
    pub topology: TopologyService,
    pub projects: ProjectService,
    pub instances: InstanceService,
    pub coordinator: Coordinator,
    pub reconciler: Reconciler,
}

impl ControlPlane {
    /// Build the services and install the registration hook on `registry`.
    pub fn new(state: StateStore, registry: AgentRegistry, config: &ControlPlaneConfig) -> Self {
        let cascade = Cascade::new(state.clone());
        let allocator = AddressAllocator::new(state.clone());
        let elector = HostElector::new(state.clone(), registry.clone(), ScoringWeights::from(&config.placement));

        let instances = InstanceService::new(
            state.clone(),
            registry.clone(),
            elector.clone(),
            allocator.clone(),
            cascade.clone(),
        );
        let coordinator = Coordinator::new(
            state.clone(),
            instances.clone(),
            elector,
            allocator,
            VrrpPool::new(state.clone()),
        );

        registry.set_hook(registration_hook(state.clone(), registry.clone(), cascade.clone()));

        Self {
            topology: TopologyService::new(state.clone(), registry.clone(), cascade.clone()),
            projects: ProjectService::new(state.clone()),
            reconciler: Reconciler::new(state.clone()),
            instances,
            coordinator,
            cascade,
            registry,
            state,
        }
    }
}
