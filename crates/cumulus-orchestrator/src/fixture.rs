//! Shared test topology: one region, a few zones, connected hosts and a
//! project with a leased private subnet.

use std::net::Ipv4Addr;
use std::sync::Arc;

use cumulus_agents::AgentRegistry;
use cumulus_agents::fake::FakeConnection;
use cumulus_core::ControlPlaneConfig;
use cumulus_state::{AddressRange, AgentKind, StateStore};

use crate::ControlPlane;
use crate::projects::CreateProject;
use crate::topology::{CreateAgentRecord, CreateHost, CreateRegion, CreateSubnet, CreateZone};

pub(crate) struct FixtureHost {
    pub id: String,
    pub conn: Arc<FakeConnection>,
}

pub(crate) struct Fixture {
    pub plane: ControlPlane,
    pub region_id: String,
    /// Zone ids, in name order.
    pub zones: Vec<String>,
    /// Hosts grouped by zone, in zone order.
    pub hosts: Vec<FixtureHost>,
    pub project_id: String,
    pub private_subnet_id: String,
    pub public_subnet_id: String,
}

impl Fixture {
    pub async fn new(zone_names: &[&str], hosts_per_zone: usize) -> Self {
        let state = StateStore::open_in_memory().unwrap();
        let plane = ControlPlane::new(state, AgentRegistry::new(), &ControlPlaneConfig::default());
        let topology = &plane.topology;

        let region = topology
            .create_region(CreateRegion {
                name: "eu-central".into(),
                description: String::new(),
            })
            .unwrap();

        let mut zones = Vec::new();
        let mut hosts = Vec::new();
        for zone_name in zone_names {
            let zone = topology
                .create_zone(CreateZone {
                    name: zone_name.to_string(),
                    region_id: region.meta.id.clone(),
                })
                .unwrap();
            for n in 0..hosts_per_zone {
                let agent_id = format!("hv-{zone_name}-{n}");
                topology
                    .create_agent(CreateAgentRecord {
                        id: Some(agent_id.clone()),
                        name: agent_id.clone(),
                        kind: AgentKind::Hypervisor,
                        description: String::new(),
                    })
                    .unwrap();
                let host = topology
                    .create_host(CreateHost {
                        name: format!("kaktus-{zone_name}-{n}"),
                        zone_id: zone.meta.id.clone(),
                        agents: vec![agent_id.clone()],
                        cpu_cost: None,
                        memory_cost: None,
                        cpu_overcommit: None,
                        memory_overcommit: None,
                    })
                    .unwrap();
                let conn = FakeConnection::full();
                plane
                    .registry
                    .register(AgentKind::Hypervisor, &agent_id, conn.clone())
                    .await
                    .unwrap();
                hosts.push(FixtureHost { id: host.meta.id, conn });
            }
            zones.push(zone.meta.id);
        }

        let private = topology
            .create_subnet(CreateSubnet {
                name: "private-1".into(),
                region_id: region.meta.id.clone(),
                cidr: "10.0.0.0/24".into(),
                gateway: Ipv4Addr::new(10, 0, 0, 1),
                dns: None,
                interface: "br-private".into(),
                public: false,
                reserved: vec![],
                gateway_pool: vec![AddressRange::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 9)).unwrap()],
            })
            .unwrap();
        let public = topology
            .create_subnet(CreateSubnet {
                name: "public-1".into(),
                region_id: region.meta.id.clone(),
                cidr: "192.0.2.0/24".into(),
                gateway: Ipv4Addr::new(192, 0, 2, 1),
                dns: None,
                interface: "br-public".into(),
                public: true,
                reserved: vec![],
                gateway_pool: vec![],
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
            plane,
            region_id: region.meta.id,
            zones,
            hosts,
            project_id: project.meta.id,
            private_subnet_id: private.meta.id,
            public_subnet_id: public.meta.id,
        }
    }
}
