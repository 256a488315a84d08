use std::net::Ipv4Addr;
use std::sync::Arc;

use cumulus_agents::fake::FakeConnection;
use cumulus_orchestrator::{CreateAgentRecord, CreateHost, CreateProject, CreateRegion, CreateSubnet, CreateZone};
use cumulus_state::{AddressRange, AgentKind};

use crate::{ApiState, test_state};

/// One region, one zone, one host behind a scripted hypervisor agent, a
/// private subnet and a project leasing it.
pub struct World {
    pub state: ApiState,
    pub region_id: String,
    pub zone_id: String,
    pub project_id: String,
    pub conn: Arc<FakeConnection>,
}

impl World {
    pub async fn new() -> Self {
        let state = test_state();
        let plane = &state.plane;

        let region = plane
            .topology
            .create_region(CreateRegion {
                name: "eu".into(),
                description: String::new(),
            })
            .unwrap();
        let zone = plane
            .topology
            .create_zone(CreateZone {
                name: "a".into(),
                region_id: region.meta.id.clone(),
            })
            .unwrap();
        plane
            .topology
            .create_agent(CreateAgentRecord {
                id: Some("hv-a-1".into()),
                name: "hv-a-1".into(),
                kind: AgentKind::Hypervisor,
                description: String::new(),
            })
            .unwrap();
        plane
            .topology
            .create_host(CreateHost {
                name: "kaktus-a-1".into(),
                zone_id: zone.meta.id.clone(),
                agents: vec!["hv-a-1".into()],
                cpu_cost: None,
                memory_cost: None,
                cpu_overcommit: None,
                memory_overcommit: None,
            })
            .unwrap();
        let conn = FakeConnection::full();
        plane
            .registry
            .register(AgentKind::Hypervisor, "hv-a-1", conn.clone())
            .await
            .unwrap();

        plane
            .topology
            .create_subnet(CreateSubnet {
                name: "private-1".into(),
                region_id: region.meta.id.clone(),
                cidr: "10.0.0.0/24".into(),
                gateway: Ipv4Addr::new(10, 0, 0, 1),
                dns: None,
                interface: "br-private".into(),
                public: false,
                reserved: vec![],
                gateway_pool: vec![AddressRange::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3)).unwrap()],
            })
            .unwrap();
        let project = plane
            .projects
            .create(CreateProject {
                name: "acme".into(),
                quotas: Default::default(),
                regions: vec![region.meta.id.clone()],
            })
            .unwrap();

        Self {
            state,
            region_id: region.meta.id,
            zone_id: zone.meta.id,
            project_id: project.meta.id,
            conn,
        }
    }
}
