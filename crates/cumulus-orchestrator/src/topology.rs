//! Topology service: regions, zones, hosts, storage pools, subnets and
//! agent records.
//!
//! Parents hold the ids of their children. Deleting a parent that still has
//! live children is refused with a conflict.

use std::net::Ipv4Addr;

use cumulus_agents::AgentRegistry;
use cumulus_cascade::Cascade;
use cumulus_net::{validate_gateway_pool, validate_subnet};
use cumulus_state::{
    Adapter, AddressRange, AgentKind, AgentRecord, Cost, DocumentMeta, Host, Instance, Region, StateStore,
    StoragePool, Subnet, Zone,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRegion {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateZone {
    pub name: String,
    pub region_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateHost {
    pub name: String,
    pub zone_id: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub cpu_cost: Option<Cost>,
    #[serde(default)]
    pub memory_cost: Option<Cost>,
    #[serde(default)]
    pub cpu_overcommit: Option<f64>,
    #[serde(default)]
    pub memory_overcommit: Option<f64>,
}

/// Pricing and overcommit changes of a host. Absent fields are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateHostPricing {
    #[serde(default)]
    pub cpu_cost: Option<Cost>,
    #[serde(default)]
    pub memory_cost: Option<Cost>,
    #[serde(default)]
    pub cpu_overcommit: Option<f64>,
    #[serde(default)]
    pub memory_overcommit: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateStoragePool {
    pub name: String,
    pub region_id: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub cost: Cost,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubnet {
    pub name: String,
    pub region_id: String,
    pub cidr: String,
    pub gateway: Ipv4Addr,
    #[serde(default)]
    pub dns: Option<Ipv4Addr>,
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub reserved: Vec<AddressRange>,
    #[serde(default)]
    pub gateway_pool: Vec<AddressRange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAgentRecord {
    /// Fixed id the agent will present; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub kind: AgentKind,
    #[serde(default)]
    pub description: String,
}

fn check_overcommit(ratio: Option<f64>, what: &str) -> OrchestratorResult<()> {
    match ratio {
        Some(r) if !(r.is_finite() && r > 0.0) => Err(OrchestratorError::BadRequest(format!(
            "{what} overcommit must be a positive number, got {r}"
        ))),
        _ => Ok(()),
    }
}

#[derive(Clone)]
pub struct TopologyService {
    state: StateStore,
    registry: AgentRegistry,
    cascade: Cascade,
}

impl TopologyService {
    pub fn new(state: StateStore, registry: AgentRegistry, cascade: Cascade) -> Self {
        Self {
            state,
            registry,
            cascade,
        }
    }

    // ── Regions ───────────────────────────────────────────────────

    pub fn create_region(&self, req: CreateRegion) -> OrchestratorResult<Region> {
        if self.state.find_one(|r: &Region| r.name == req.name)?.is_some() {
            return Err(OrchestratorError::Conflict(format!("region {} already exists", req.name)));
        }
        let mut region = Region {
            name: req.name,
            description: req.description,
            ..Default::default()
        };
        self.state.insert(&mut region)?;
        info!(region_id = %region.meta.id, name = %region.name, "region created");
        Ok(region)
    }

    pub fn get_region(&self, id: &str) -> OrchestratorResult<Region> {
        Ok(self.state.fetch(id)?)
    }

    pub fn list_regions(&self) -> OrchestratorResult<Vec<Region>> {
        Ok(self.state.list()?)
    }

    pub fn delete_region(&self, id: &str) -> OrchestratorResult<()> {
        let region: Region = self.state.fetch(id)?;
        let (zones, _) = self.state.resolve::<Zone>(&region.zones)?;
        if !zones.is_empty() {
            return Err(OrchestratorError::Conflict(format!(
                "region {} still has {} zone(s)",
                region.name,
                zones.len()
            )));
        }
        let (pools, _) = self.state.resolve::<StoragePool>(&region.storage_pools)?;
        if !pools.is_empty() {
            return Err(OrchestratorError::Conflict(format!(
                "region {} still has {} storage pool(s)",
                region.name,
                pools.len()
            )));
        }
        if self.state.find_one(|s: &Subnet| s.region_id == id)?.is_some() {
            return Err(OrchestratorError::Conflict(format!("region {} still has subnets", region.name)));
        }
        self.state.delete::<Region>(id)?;
        info!(region_id = %id, name = %region.name, "region deleted");
        Ok(())
    }

    // ── Zones ─────────────────────────────────────────────────────

    pub fn create_zone(&self, req: CreateZone) -> OrchestratorResult<Zone> {
        let region: Region = self.state.fetch(&req.region_id)?;
        if self
            .state
            .find_one(|z: &Zone| z.region_id == req.region_id && z.name == req.name)?
            .is_some()
        {
            return Err(OrchestratorError::Conflict(format!(
                "zone {} already exists in region {}",
                req.name, region.name
            )));
        }

        let mut zone = Zone {
            name: req.name,
            region_id: req.region_id,
            ..Default::default()
        };
        self.state.insert(&mut zone)?;
        let zone_id = zone.meta.id.clone();
        self.state
            .modify(&region.meta.id, |r: &mut Region| r.zones.push(zone_id))?;
        info!(zone_id = %zone.meta.id, name = %zone.name, region = %region.name, "zone created");
        Ok(zone)
    }

    pub fn get_zone(&self, id: &str) -> OrchestratorResult<Zone> {
        Ok(self.state.fetch(id)?)
    }

    pub fn list_zones(&self, region_id: Option<&str>) -> OrchestratorResult<Vec<Zone>> {
        Ok(self
            .state
            .find(|z: &Zone| region_id.is_none_or(|r| z.region_id == r))?)
    }

    pub fn delete_zone(&self, id: &str) -> OrchestratorResult<()> {
        let zone: Zone = self.state.fetch(id)?;
        let (hosts, _) = self.state.resolve::<Host>(&zone.hosts)?;
        if !hosts.is_empty() {
            return Err(OrchestratorError::Conflict(format!(
                "zone {} still has {} host(s)",
                zone.name,
                hosts.len()
            )));
        }
        self.state.delete::<Zone>(id)?;
        if self.state.get::<Region>(&zone.region_id)?.is_some() {
            self.state
                .modify(&zone.region_id, |r: &mut Region| r.zones.retain(|z| z != id))?;
        } else {
            warn!(zone_id = %id, region_id = %zone.region_id, "zone references missing region");
        }
        info!(zone_id = %id, name = %zone.name, "zone deleted");
        Ok(())
    }

    // ── Hosts ─────────────────────────────────────────────────────

    /// Create a host, link it to its zone and compute its capacity.
    pub fn create_host(&self, req: CreateHost) -> OrchestratorResult<Host> {
        check_overcommit(req.cpu_overcommit, "cpu")?;
        check_overcommit(req.memory_overcommit, "memory")?;
        let zone: Zone = self.state.fetch(&req.zone_id)?;
        if self
            .state
            .find_one(|h: &Host| h.zone_id == req.zone_id && h.name == req.name)?
            .is_some()
        {
            return Err(OrchestratorError::Conflict(format!(
                "host {} already exists in zone {}",
                req.name, zone.name
            )));
        }

        let mut host = Host::new(&req.name, &req.zone_id);
        host.agents = req.agents;
        if let Some(cost) = req.cpu_cost {
            host.cpu_cost = cost;
        }
        if let Some(cost) = req.memory_cost {
            host.memory_cost = cost;
        }
        host.cpu_overcommit = req.cpu_overcommit.unwrap_or(host.cpu_overcommit);
        host.memory_overcommit = req.memory_overcommit.unwrap_or(host.memory_overcommit);
        self.state.insert(&mut host)?;

        let host_id = host.meta.id.clone();
        self.state.modify(&zone.meta.id, |z: &mut Zone| z.hosts.push(host_id))?;
        self.cascade.recompute_host(&host.meta.id)?;

        info!(host_id = %host.meta.id, name = %host.name, zone = %zone.name, "host created");
        Ok(self.state.fetch(&host.meta.id)?)
    }

    pub fn get_host(&self, id: &str) -> OrchestratorResult<Host> {
        Ok(self.state.fetch(id)?)
    }

    pub fn list_hosts(&self, zone_id: Option<&str>) -> OrchestratorResult<Vec<Host>> {
        Ok(self.state.find(|h: &Host| zone_id.is_none_or(|z| h.zone_id == z))?)
    }

    /// Change a host's prices or overcommit ratios and re-run the cascade.
    pub fn update_host_pricing(&self, id: &str, req: UpdateHostPricing) -> OrchestratorResult<Host> {
        check_overcommit(req.cpu_overcommit, "cpu")?;
        check_overcommit(req.memory_overcommit, "memory")?;
        self.state.modify(id, |h: &mut Host| {
            if let Some(cost) = req.cpu_cost {
                h.cpu_cost = cost;
            }
            if let Some(cost) = req.memory_cost {
                h.memory_cost = cost;
            }
            if let Some(ratio) = req.cpu_overcommit {
                h.cpu_overcommit = ratio;
            }
            if let Some(ratio) = req.memory_overcommit {
                h.memory_overcommit = ratio;
            }
        })?;
        self.cascade.recompute_host(id)?;
        Ok(self.state.fetch(id)?)
    }

    pub fn delete_host(&self, id: &str) -> OrchestratorResult<()> {
        let host: Host = self.state.fetch(id)?;
        let (instances, _) = self.state.resolve::<Instance>(&host.instances)?;
        if !instances.is_empty() {
            return Err(OrchestratorError::Conflict(format!(
                "host {} still runs {} instance(s)",
                host.name,
                instances.len()
            )));
        }
        self.state.delete::<Host>(id)?;
        if self.state.get::<Zone>(&host.zone_id)?.is_some() {
            self.state
                .modify(&host.zone_id, |z: &mut Zone| z.hosts.retain(|h| h != id))?;
            if let Some(zone) = self.cascade.recompute_zone(&host.zone_id)? {
                self.cascade.recompute_region(&zone.region_id)?;
            }
        } else {
            warn!(host_id = %id, zone_id = %host.zone_id, "host references missing zone");
        }
        info!(host_id = %id, name = %host.name, "host deleted");
        Ok(())
    }

    // ── Storage pools ─────────────────────────────────────────────

    pub fn create_storage_pool(&self, req: CreateStoragePool) -> OrchestratorResult<StoragePool> {
        let region: Region = self.state.fetch(&req.region_id)?;
        if self
            .state
            .find_one(|p: &StoragePool| p.region_id == req.region_id && p.name == req.name)?
            .is_some()
        {
            return Err(OrchestratorError::Conflict(format!(
                "storage pool {} already exists in region {}",
                req.name, region.name
            )));
        }

        let mut pool = StoragePool {
            name: req.name,
            region_id: req.region_id,
            agents: req.agents,
            cost: req.cost,
            ..Default::default()
        };
        self.state.insert(&mut pool)?;
        let pool_id = pool.meta.id.clone();
        self.state.modify(&region.meta.id, |r: &mut Region| {
            r.storage_pools.push(pool_id.clone());
            r.default_storage_pool.get_or_insert(pool_id);
        })?;
        self.cascade.recompute_region(&region.meta.id)?;
        info!(pool_id = %pool.meta.id, name = %pool.name, region = %region.name, "storage pool created");
        Ok(pool)
    }

    pub fn get_storage_pool(&self, id: &str) -> OrchestratorResult<StoragePool> {
        Ok(self.state.fetch(id)?)
    }

    pub fn list_storage_pools(&self, region_id: Option<&str>) -> OrchestratorResult<Vec<StoragePool>> {
        Ok(self
            .state
            .find(|p: &StoragePool| region_id.is_none_or(|r| p.region_id == r))?)
    }

    pub fn delete_storage_pool(&self, id: &str) -> OrchestratorResult<()> {
        let pool: StoragePool = self.state.fetch(id)?;
        self.state.delete::<StoragePool>(id)?;
        if self.state.get::<Region>(&pool.region_id)?.is_some() {
            self.state.modify(&pool.region_id, |r: &mut Region| {
                r.storage_pools.retain(|p| p != id);
                if r.default_storage_pool.as_deref() == Some(id) {
                    r.default_storage_pool = r.storage_pools.first().cloned();
                }
            })?;
            self.cascade.recompute_region(&pool.region_id)?;
        }
        info!(pool_id = %id, name = %pool.name, "storage pool deleted");
        Ok(())
    }

    // ── Subnets ───────────────────────────────────────────────────

    /// Create a subnet after validating its addressing. Private subnets must
    /// carry a gateway pool large enough for every zone of the region.
    pub fn create_subnet(&self, req: CreateSubnet) -> OrchestratorResult<Subnet> {
        let region: Region = self.state.fetch(&req.region_id)?;
        if self
            .state
            .find_one(|s: &Subnet| s.region_id == req.region_id && s.name == req.name)?
            .is_some()
        {
            return Err(OrchestratorError::Conflict(format!(
                "subnet {} already exists in region {}",
                req.name, region.name
            )));
        }

        let mut subnet = Subnet::new(&req.name, &req.region_id, &req.cidr, req.gateway);
        subnet.dns = req.dns;
        subnet.interface = req.interface;
        subnet.public = req.public;
        subnet.reserved = req.reserved;
        subnet.gateway_pool = req.gateway_pool;

        validate_subnet(&subnet)?;
        if !subnet.public {
            validate_gateway_pool(&subnet, region.zones.len())?;
        }

        self.state.insert(&mut subnet)?;
        info!(
            subnet_id = %subnet.meta.id,
            name = %subnet.name,
            cidr = %subnet.cidr,
            public = subnet.public,
            "subnet created"
        );
        Ok(subnet)
    }

    pub fn get_subnet(&self, id: &str) -> OrchestratorResult<Subnet> {
        Ok(self.state.fetch(id)?)
    }

    pub fn list_subnets(&self, region_id: Option<&str>) -> OrchestratorResult<Vec<Subnet>> {
        Ok(self
            .state
            .find(|s: &Subnet| region_id.is_none_or(|r| s.region_id == r))?)
    }

    pub fn delete_subnet(&self, id: &str) -> OrchestratorResult<()> {
        let subnet: Subnet = self.state.fetch(id)?;
        if let Some(project_id) = &subnet.project_id {
            return Err(OrchestratorError::Conflict(format!(
                "subnet {} is leased by project {project_id}",
                subnet.name
            )));
        }
        let (adapters, _) = self.state.resolve::<Adapter>(&subnet.adapters)?;
        if !adapters.is_empty() {
            return Err(OrchestratorError::Conflict(format!(
                "subnet {} still has {} adapter(s)",
                subnet.name,
                adapters.len()
            )));
        }
        self.state.delete::<Subnet>(id)?;
        info!(subnet_id = %id, name = %subnet.name, "subnet deleted");
        Ok(())
    }

    // ── Adapters (read-only) ──────────────────────────────────────

    pub fn get_adapter(&self, id: &str) -> OrchestratorResult<Adapter> {
        Ok(self.state.fetch(id)?)
    }

    pub fn list_adapters(&self, subnet_id: Option<&str>) -> OrchestratorResult<Vec<Adapter>> {
        Ok(self
            .state
            .find(|a: &Adapter| subnet_id.is_none_or(|s| a.subnet_id == s))?)
    }

    // ── Agent records ─────────────────────────────────────────────

    pub fn create_agent(&self, req: CreateAgentRecord) -> OrchestratorResult<AgentRecord> {
        if self.state.find_one(|a: &AgentRecord| a.name == req.name)?.is_some() {
            return Err(OrchestratorError::Conflict(format!("agent {} already exists", req.name)));
        }
        let mut record = AgentRecord {
            meta: DocumentMeta::with_id(req.id.unwrap_or_default()),
            name: req.name,
            kind: req.kind,
            description: req.description,
        };
        self.state.insert(&mut record)?;
        info!(agent_id = %record.meta.id, name = %record.name, kind = %record.kind, "agent record created");
        Ok(record)
    }

    pub fn get_agent(&self, id: &str) -> OrchestratorResult<AgentRecord> {
        Ok(self.state.fetch(id)?)
    }

    pub fn list_agents(&self) -> OrchestratorResult<Vec<AgentRecord>> {
        Ok(self.state.list()?)
    }

    /// Delete an agent record and drop its live connection, if any.
    pub async fn delete_agent(&self, id: &str) -> OrchestratorResult<()> {
        if !self.state.delete::<AgentRecord>(id)? {
            return Err(OrchestratorError::NotFound(format!("agent {id}")));
        }
        if self.registry.disconnect(id).await {
            info!(agent_id = %id, "live agent disconnected");
        }
        info!(agent_id = %id, "agent record deleted");
        Ok(())
    }
}
