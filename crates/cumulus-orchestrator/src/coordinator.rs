//! Coordinator for multi-zone (MZR) and highly-available (HAR) resources.
//!
//! A coordinated resource is a set of member instances sharing virtual IPs.
//! Virtual IPs are reserved before any member exists. Creation is
//! all-or-nothing: the first failure tears down every member, adapter and
//! VRRP id acquired so far and nothing is persisted. Deletion walks the
//! resource down piece by piece and persists what is left when a step fails,
//! so it can be retried.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use cumulus_net::{AdapterRequest, AddressAllocator, NetError, VrrpPool, parse_cidr};
use cumulus_placement::{HostElector, HostSpread};
use cumulus_state::{
    CoordinatedKind, CoordinatedResource, DocumentMeta, MasterPolicy, Member, Project, Region, ResourcePhase,
    StateStore, Subnet, VirtualIp, Zone,
};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::instances::{CreateInstance, InstanceService};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateMultiZone {
    pub name: String,
    pub region_id: String,
    pub vcpus: u32,
    pub memory_bytes: u64,
    /// Also reserve a public address per zone.
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub master_policy: MasterPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateHighlyAvailable {
    pub name: String,
    pub region_id: String,
    pub count: usize,
    /// Zones to spread over; the least-loaded zones when empty.
    #[serde(default)]
    pub zones: Vec<String>,
    pub vcpus: u32,
    pub memory_bytes: u64,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub master_policy: MasterPolicy,
}

/// Give every virtual IP exactly one master according to the resource's
/// policy. Virtual IPs of a resource without members have none.
pub fn assign_masters(resource: &mut CoordinatedResource) {
    let first = resource.members.first().map(|m| m.instance_id.clone());
    for vip in &mut resource.virtual_ips {
        vip.master = match resource.master_policy {
            MasterPolicy::FirstMember => first.clone(),
            MasterPolicy::OwningZone => vip
                .zone_id
                .as_ref()
                .and_then(|zone| resource.members.iter().find(|m| &m.zone_id == zone))
                .map(|m| m.instance_id.clone())
                .or_else(|| first.clone()),
        };
    }
}

/// What a resource is made of before it exists.
struct Plan {
    kind: CoordinatedKind,
    name: String,
    region_id: String,
    vcpus: u32,
    memory_bytes: u64,
    public: bool,
    master_policy: MasterPolicy,
    /// One entry per virtual IP scope: owning zone and adapter name.
    vip_scopes: Vec<(Option<String>, String)>,
    /// One entry per member: zone and instance name.
    placements: Vec<(String, String)>,
}

/// Everything acquired so far, for rollback.
#[derive(Default)]
struct Acquired {
    adapters: Vec<String>,
    vrrp_ids: Vec<u8>,
    virtual_ips: Vec<VirtualIp>,
    members: Vec<Member>,
}

#[derive(Clone)]
pub struct Coordinator {
    state: StateStore,
    instances: InstanceService,
    elector: HostElector,
    allocator: AddressAllocator,
    vrrp: VrrpPool,
}

impl Coordinator {
    pub fn new(
        state: StateStore,
        instances: InstanceService,
        elector: HostElector,
        allocator: AddressAllocator,
        vrrp: VrrpPool,
    ) -> Self {
        Self {
            state,
            instances,
            elector,
            allocator,
            vrrp,
        }
    }

    fn zones_of(&self, region_id: &str) -> OrchestratorResult<Vec<Zone>> {
        let region: Region = self.state.fetch(region_id)?;
        let mut zones = self.state.find(|z: &Zone| z.region_id == region_id)?;
        if zones.is_empty() {
            return Err(OrchestratorError::InvalidConfig(format!("region {} has no zones", region.name)));
        }
        zones.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(zones)
    }

    /// One member in every zone of the region, each zone with its own
    /// virtual IP.
    pub async fn create_multi_zone(&self, project_id: &str, req: CreateMultiZone) -> OrchestratorResult<CoordinatedResource> {
        let project: Project = self.state.fetch(project_id)?;
        let zones = self.zones_of(&req.region_id)?;

        let plan = Plan {
            kind: CoordinatedKind::MultiZone,
            vip_scopes: zones
                .iter()
                .map(|z| (Some(z.meta.id.clone()), format!("{}-{}-vip", req.name, z.name)))
                .collect(),
            placements: zones
                .iter()
                .map(|z| (z.meta.id.clone(), format!("{}-{}", req.name, z.name)))
                .collect(),
            name: req.name,
            region_id: req.region_id,
            vcpus: req.vcpus,
            memory_bytes: req.memory_bytes,
            public: req.public,
            master_policy: req.master_policy,
        };
        self.provision(&project, plan).await
    }

    /// `count` members spread over a set of zones, sharing one virtual IP.
    pub async fn create_highly_available(
        &self,
        project_id: &str,
        req: CreateHighlyAvailable,
    ) -> OrchestratorResult<CoordinatedResource> {
        if req.count == 0 {
            return Err(OrchestratorError::BadRequest("a highly-available resource needs members".into()));
        }
        let project: Project = self.state.fetch(project_id)?;
        self.zones_of(&req.region_id)?;

        let zone_ids: Vec<String> = if req.zones.is_empty() {
            self.elector
                .elect_zones_in_region(&req.region_id, req.count)
                .await?
                .into_iter()
                .map(|z| z.zone_id)
                .collect()
        } else {
            for zone_id in &req.zones {
                let zone: Zone = self.state.fetch(zone_id)?;
                if zone.region_id != req.region_id {
                    return Err(OrchestratorError::BadRequest(format!(
                        "zone {} is not in region {}",
                        zone.name, req.region_id
                    )));
                }
            }
            req.zones.clone()
        };

        let plan = Plan {
            kind: CoordinatedKind::HighlyAvailable,
            vip_scopes: vec![(None, format!("{}-vip", req.name))],
            placements: (0..req.count)
                .map(|i| (zone_ids[i % zone_ids.len()].clone(), format!("{}-{}", req.name, i + 1)))
                .collect(),
            name: req.name,
            region_id: req.region_id,
            vcpus: req.vcpus,
            memory_bytes: req.memory_bytes,
            public: req.public,
            master_policy: req.master_policy,
        };
        self.provision(&project, plan).await
    }

    async fn provision(&self, project: &Project, plan: Plan) -> OrchestratorResult<CoordinatedResource> {
        let mut acquired = Acquired::default();
        match self.build(project, &plan, &mut acquired).await {
            Ok(resource) => {
                info!(
                    resource_id = %resource.meta.id,
                    name = %resource.name,
                    kind = ?resource.kind,
                    members = resource.members.len(),
                    vips = resource.virtual_ips.len(),
                    "coordinated resource created"
                );
                Ok(resource)
            }
            Err(e) => {
                warn!(name = %plan.name, error = %e, "coordinated resource failed, rolling back");
                self.rollback(&project.meta.id, acquired).await;
                Err(e)
            }
        }
    }

    async fn build(&self, project: &Project, plan: &Plan, acquired: &mut Acquired) -> OrchestratorResult<CoordinatedResource> {
        self.reserve_virtual_ips(project, plan, acquired)?;

        let mut spreads: HashMap<&str, HostSpread> = HashMap::new();
        for (zone_id, member_name) in &plan.placements {
            let spread = spreads.entry(zone_id.as_str()).or_default();
            let host = self.elector.elect_spread_in_zone(member_name, zone_id, spread).await?;
            let instance = self
                .instances
                .create(
                    &project.meta.id,
                    CreateInstance {
                        name: member_name.clone(),
                        zone_id: zone_id.clone(),
                        host_id: Some(host.host_id.clone()),
                        vcpus: plan.vcpus,
                        memory_bytes: plan.memory_bytes,
                    },
                )
                .await?;
            acquired.members.push(Member {
                instance_id: instance.meta.id,
                zone_id: zone_id.clone(),
                host_id: host.host_id,
            });
        }

        let mut resource = CoordinatedResource {
            meta: DocumentMeta::default(),
            name: plan.name.clone(),
            kind: plan.kind,
            project_id: project.meta.id.clone(),
            region_id: plan.region_id.clone(),
            phase: ResourcePhase::Active,
            vcpus: plan.vcpus,
            memory_bytes: plan.memory_bytes,
            master_policy: plan.master_policy,
            members: acquired.members.clone(),
            adapters: acquired.adapters.clone(),
            virtual_ips: acquired.virtual_ips.clone(),
        };
        assign_masters(&mut resource);
        self.state.insert(&mut resource)?;

        let resource_id = resource.meta.id.clone();
        if let Err(e) = self
            .state
            .modify(&project.meta.id, |p: &mut Project| p.coordinated.push(resource_id))
        {
            if let Err(cleanup) = self.state.delete::<CoordinatedResource>(&resource.meta.id) {
                error!(resource_id = %resource.meta.id, error = %cleanup, "failed to remove unlinked resource");
            }
            return Err(e.into());
        }
        Ok(resource)
    }

    /// Reserve the private, and optionally public, addresses of every
    /// virtual IP scope.
    fn reserve_virtual_ips(&self, project: &Project, plan: &Plan, acquired: &mut Acquired) -> OrchestratorResult<()> {
        let subnet_id = project.private_subnets.get(&plan.region_id).ok_or_else(|| {
            OrchestratorError::InvalidConfig(format!(
                "project {} has no private subnet in region {}",
                project.name, plan.region_id
            ))
        })?;
        let private: Subnet = self.state.fetch(subnet_id)?;

        let public = if plan.public {
            let needed = plan.vip_scopes.len() as u32;
            let subnet = self
                .allocator
                .find_public_subnet(&plan.region_id, needed)?
                .ok_or_else(|| {
                    NetError::AddressExhausted(format!(
                        "no public subnet in region {} has {needed} free addresses",
                        plan.region_id
                    ))
                })?;
            Some(subnet)
        } else {
            None
        };

        for (zone_id, adapter_name) in &plan.vip_scopes {
            self.reserve_virtual_ip(&project.meta.id, &private, adapter_name, zone_id, acquired)?;
            if let Some(public) = &public {
                let name = format!("{adapter_name}-public");
                self.reserve_virtual_ip(&project.meta.id, public, &name, zone_id, acquired)?;
            }
        }
        Ok(())
    }

    fn reserve_virtual_ip(
        &self,
        project_id: &str,
        subnet: &Subnet,
        adapter_name: &str,
        zone_id: &Option<String>,
        acquired: &mut Acquired,
    ) -> OrchestratorResult<()> {
        let netmask = parse_cidr(subnet)?.prefix();
        let adapter = self.allocator.create_adapter(
            &subnet.meta.id,
            AdapterRequest {
                name: adapter_name.to_string(),
                reserved: true,
                ..Default::default()
            },
        )?;
        acquired.adapters.push(adapter.meta.id.clone());
        let address: Ipv4Addr = adapter.addresses.first().copied().ok_or_else(|| {
            OrchestratorError::InvalidConfig(format!("adapter {} holds no address", adapter.name))
        })?;

        let vrrp_id = self.vrrp.allocate(project_id)?;
        acquired.vrrp_ids.push(vrrp_id);
        acquired.virtual_ips.push(VirtualIp {
            vrrp_id,
            interface: subnet.interface.clone(),
            address,
            netmask,
            public: subnet.public,
            zone_id: zone_id.clone(),
            master: None,
        });
        debug!(%address, vrrp_id, subnet = %subnet.name, "virtual IP reserved");
        Ok(())
    }

    /// Undo a failed creation: members first, then adapters, then VRRP ids.
    async fn rollback(&self, project_id: &str, acquired: Acquired) {
        for member in &acquired.members {
            if let Err(e) = self.instances.discard(&member.instance_id).await {
                error!(instance_id = %member.instance_id, error = %e, "rollback: member discard failed");
            }
        }
        for adapter_id in &acquired.adapters {
            if let Err(e) = self.allocator.delete_adapter(adapter_id) {
                error!(%adapter_id, error = %e, "rollback: adapter delete failed");
            }
        }
        for vrrp_id in &acquired.vrrp_ids {
            if let Err(e) = self.vrrp.release(project_id, *vrrp_id) {
                error!(vrrp_id, error = %e, "rollback: VRRP id release failed");
            }
        }
    }

    pub fn get(&self, id: &str) -> OrchestratorResult<CoordinatedResource> {
        Ok(self.state.fetch(id)?)
    }

    pub fn list(&self, project_id: Option<&str>, kind: Option<CoordinatedKind>) -> OrchestratorResult<Vec<CoordinatedResource>> {
        Ok(self.state.find(|r: &CoordinatedResource| {
            project_id.is_none_or(|p| r.project_id == p) && kind.is_none_or(|k| r.kind == k)
        })?)
    }

    /// Delete one member and hand its master roles to the remaining ones.
    pub async fn remove_member(&self, id: &str, instance_id: &str) -> OrchestratorResult<CoordinatedResource> {
        let mut resource: CoordinatedResource = self.state.fetch(id)?;
        if resource.phase == ResourcePhase::Deleting {
            return Err(OrchestratorError::Conflict(format!("{} is being deleted", resource.name)));
        }
        if !resource.members.iter().any(|m| m.instance_id == instance_id) {
            return Err(OrchestratorError::NotFound(format!(
                "member {instance_id} of {}",
                resource.name
            )));
        }

        match self.instances.delete(instance_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(%instance_id, "member instance already gone"),
            Err(e) => return Err(e),
        }
        resource.members.retain(|m| m.instance_id != instance_id);
        assign_masters(&mut resource);
        self.state.update(&mut resource)?;
        info!(resource_id = %id, %instance_id, remaining = resource.members.len(), "member removed");
        Ok(resource)
    }

    /// Tear a resource down: members, reserved adapters, VRRP ids, then the
    /// record itself. On failure the remainder is persisted in the
    /// `Deleting` phase and the call can be repeated.
    pub async fn delete(&self, id: &str) -> OrchestratorResult<()> {
        let mut resource: CoordinatedResource = self.state.fetch(id)?;
        if resource.phase != ResourcePhase::Deleting {
            resource.phase = ResourcePhase::Deleting;
            self.state.update(&mut resource)?;
        }

        while let Some(member) = resource.members.first().cloned() {
            match self.instances.delete(&member.instance_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => debug!(instance_id = %member.instance_id, "member already gone"),
                Err(e) => {
                    self.persist_remaining(&mut resource);
                    return Err(e);
                }
            }
            resource.members.remove(0);
        }

        while let Some(adapter_id) = resource.adapters.first().cloned() {
            if let Err(e) = self.allocator.delete_adapter(&adapter_id) {
                self.persist_remaining(&mut resource);
                return Err(e.into());
            }
            resource.adapters.remove(0);
        }

        while let Some(vip) = resource.virtual_ips.first().cloned() {
            if let Err(e) = self.vrrp.release(&resource.project_id, vip.vrrp_id) {
                let e = OrchestratorError::from(e);
                if !e.is_not_found() {
                    self.persist_remaining(&mut resource);
                    return Err(e);
                }
                warn!(resource_id = %id, project_id = %resource.project_id, "project is gone, VRRP id dropped");
            }
            resource.virtual_ips.remove(0);
        }

        self.state.delete::<CoordinatedResource>(id)?;
        match self.state.get::<Project>(&resource.project_id)? {
            Some(mut project) => {
                project.coordinated.retain(|c| c != id);
                self.state.update(&mut project)?;
            }
            None => warn!(resource_id = %id, project_id = %resource.project_id, "resource references missing project"),
        }
        info!(resource_id = %id, name = %resource.name, "coordinated resource deleted");
        Ok(())
    }

    fn persist_remaining(&self, resource: &mut CoordinatedResource) {
        assign_masters(resource);
        if let Err(e) = self.state.update(resource) {
            error!(resource_id = %resource.meta.id, error = %e, "failed to persist partial deletion");
        }
    }
}
