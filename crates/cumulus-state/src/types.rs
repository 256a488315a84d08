//! Domain types for the Cumulus state store.
//!
//! These types represent the persisted state of the fleet: topology
//! (regions, zones, hosts, storage pools), tenants (projects), networking
//! (subnets, adapters), workloads (instances) and coordinated HA/multi-zone
//! resources. Cross-resource links are plain identifier strings; the store
//! is the source of truth and a link may dangle.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Version stamped on every document written by this build.
pub const SCHEMA_VERSION: u32 = 1;

pub type AgentId = String;
pub type RegionId = String;
pub type ZoneId = String;
pub type HostId = String;
pub type PoolId = String;
pub type ProjectId = String;
pub type SubnetId = String;
pub type AdapterId = String;
pub type InstanceId = String;
pub type CoordinatedId = String;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Convert a byte count into fractional GiB.
pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB
}

/// Fields shared by every persisted document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentMeta {
    /// Opaque identifier. Left empty to let the store generate one.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub schema_version: u32,
}

impl DocumentMeta {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

// ── Pricing ───────────────────────────────────────────────────────

/// A monthly price in a given currency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cost {
    pub price: f64,
    pub currency: String,
}

impl Default for Cost {
    fn default() -> Self {
        Self {
            price: 0.0,
            currency: "EUR".to_string(),
        }
    }
}

/// Derived capacity of a virtual resource unit (vCPU, GiB of vMemory, GiB of storage).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VirtualResource {
    /// Number of units available.
    pub count: f64,
    /// Price of one unit.
    pub price: f64,
    pub currency: String,
}

// ── Agents ────────────────────────────────────────────────────────

/// Declared role of a remote execution agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Hypervisor,
    Network,
    Controller,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Hypervisor => "hypervisor",
            AgentKind::Network => "network",
            AgentKind::Controller => "controller",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted identity of an agent allowed to connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRecord {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    pub kind: AgentKind,
    #[serde(default)]
    pub description: String,
}

// ── Topology ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Region {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub zones: Vec<ZoneId>,
    #[serde(default)]
    pub storage_pools: Vec<PoolId>,
    #[serde(default)]
    pub default_storage_pool: Option<PoolId>,
    #[serde(default)]
    pub nfs_exports: Vec<String>,
    #[serde(default)]
    pub default_nfs_export: Option<String>,
    /// Per-GiB storage pricing averaged over the region's pools.
    #[serde(default)]
    pub virtual_storage: VirtualResource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    pub region_id: RegionId,
    #[serde(default)]
    pub hosts: Vec<HostId>,
    #[serde(default)]
    pub virtual_cpus: VirtualResource,
    #[serde(default)]
    pub virtual_memory: VirtualResource,
}

/// Hardware snapshot reported by a hypervisor agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostCapabilities {
    pub arch: String,
    pub cpu_model: String,
    pub sockets: u32,
    pub cores: u32,
    pub threads: u32,
    pub memory_bytes: u64,
}

impl HostCapabilities {
    pub fn logical_cpus(&self) -> u32 {
        self.sockets * self.cores * self.threads
    }
}

/// Live resource claims of the instances hosted on a host.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostUsage {
    pub vcpus: u32,
    pub memory_bytes: u64,
    pub instances: u32,
}

/// A hypervisor host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    pub zone_id: ZoneId,
    #[serde(default)]
    pub capabilities: HostCapabilities,
    #[serde(default)]
    pub cpu_cost: Cost,
    #[serde(default)]
    pub memory_cost: Cost,
    pub cpu_overcommit: f64,
    pub memory_overcommit: f64,
    #[serde(default)]
    pub virtual_cpus: VirtualResource,
    #[serde(default)]
    pub virtual_memory: VirtualResource,
    #[serde(default)]
    pub usage: HostUsage,
    #[serde(default)]
    pub agents: Vec<AgentId>,
    #[serde(default)]
    pub instances: Vec<InstanceId>,
}

impl Host {
    pub fn new(name: &str, zone_id: &str) -> Self {
        Self {
            meta: DocumentMeta::default(),
            name: name.to_string(),
            zone_id: zone_id.to_string(),
            capabilities: HostCapabilities::default(),
            cpu_cost: Cost::default(),
            memory_cost: Cost::default(),
            cpu_overcommit: 1.0,
            memory_overcommit: 1.0,
            virtual_cpus: VirtualResource::default(),
            virtual_memory: VirtualResource::default(),
            usage: HostUsage::default(),
            agents: Vec::new(),
            instances: Vec::new(),
        }
    }

    /// Record an instance as hosted here, adding its claims to the usage
    /// counters. Returns false if it was already attached.
    pub fn attach_instance(&mut self, instance: &Instance) -> bool {
        if self.instances.iter().any(|id| id == &instance.meta.id) {
            return false;
        }
        self.instances.push(instance.meta.id.clone());
        self.usage.instances += 1;
        self.usage.vcpus += instance.vcpus;
        self.usage.memory_bytes += instance.memory_bytes;
        true
    }

    /// Remove an instance and its claims. Returns false if it was not attached.
    pub fn detach_instance(&mut self, instance: &Instance) -> bool {
        let before = self.instances.len();
        self.instances.retain(|id| id != &instance.meta.id);
        if self.instances.len() == before {
            return false;
        }
        self.usage.instances = self.usage.instances.saturating_sub(1);
        self.usage.vcpus = self.usage.vcpus.saturating_sub(instance.vcpus);
        self.usage.memory_bytes = self.usage.memory_bytes.saturating_sub(instance.memory_bytes);
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoragePool {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    pub region_id: RegionId,
    #[serde(default)]
    pub agents: Vec<AgentId>,
    #[serde(default)]
    pub capacity_bytes: u64,
    #[serde(default)]
    pub allocated_bytes: u64,
    #[serde(default)]
    pub available_bytes: u64,
    /// Monthly cost of the whole pool.
    #[serde(default)]
    pub cost: Cost,
}

// ── Projects ──────────────────────────────────────────────────────

/// Resource ceilings for a project. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectQuotas {
    pub instances: u32,
    pub vcpus: u32,
    pub memory_bytes: u64,
    pub storage_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectUsage {
    pub instances: u32,
    pub vcpus: u32,
    pub memory_bytes: u64,
    pub storage_bytes: u64,
}

impl ProjectQuotas {
    /// Name of the first quota one more instance of the given size would
    /// exceed, if any.
    pub fn exceeded_by(
        &self,
        usage: &ProjectUsage,
        vcpus: u32,
        memory_bytes: u64,
    ) -> Option<&'static str> {
        if self.instances > 0 && usage.instances + 1 > self.instances {
            return Some("instances");
        }
        if self.vcpus > 0 && usage.vcpus + vcpus > self.vcpus {
            return Some("vcpus");
        }
        if self.memory_bytes > 0 && usage.memory_bytes + memory_bytes > self.memory_bytes {
            return Some("memory");
        }
        None
    }
}

/// A tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Project {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    #[serde(default)]
    pub quotas: ProjectQuotas,
    #[serde(default)]
    pub usage: ProjectUsage,
    /// Reserved VRRP virtual-router IDs, each in 1..=255.
    #[serde(default)]
    pub vrrp_ids: Vec<u8>,
    /// Region id → leased private subnet id.
    #[serde(default)]
    pub private_subnets: HashMap<RegionId, SubnetId>,
    /// Zone name → fixed local gateway address.
    #[serde(default)]
    pub zone_gateways: HashMap<String, Ipv4Addr>,
    #[serde(default)]
    pub instances: Vec<InstanceId>,
    #[serde(default)]
    pub coordinated: Vec<CoordinatedId>,
}

// ── Networking ────────────────────────────────────────────────────

/// An inclusive range of IPv4 addresses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressRange {
    pub first: Ipv4Addr,
    pub last: Ipv4Addr,
}

impl AddressRange {
    pub fn new(first: Ipv4Addr, last: Ipv4Addr) -> Result<Self, String> {
        if first <= last {
            Ok(Self { first, last })
        } else {
            Err(format!("address range {first}-{last} must be non-decreasing"))
        }
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.first <= addr && addr <= self.last
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    pub fn len(&self) -> u32 {
        u32::from(self.last).saturating_sub(u32::from(self.first)) + 1
    }

    pub fn iter(&self) -> AddressRangeIter {
        AddressRangeIter {
            next: (self.first <= self.last).then(|| u32::from(self.first)),
            last: u32::from(self.last),
        }
    }
}

pub struct AddressRangeIter {
    next: Option<u32>,
    last: u32,
}

impl Iterator for AddressRangeIter {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.next?;
        self.next = (next < self.last).then(|| next + 1);
        Some(next.into())
    }
}

/// An IPv4 subnet addresses are drawn from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subnet {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    pub region_id: RegionId,
    /// CIDR block, e.g. `10.0.0.0/24`.
    pub cidr: String,
    pub gateway: Ipv4Addr,
    #[serde(default)]
    pub dns: Option<Ipv4Addr>,
    /// Physical interface (bridge) carrying this subnet on hosts.
    #[serde(default)]
    pub interface: String,
    /// Public subnets serve internet-facing virtual IPs.
    #[serde(default)]
    pub public: bool,
    /// Project holding the lease on this private subnet.
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    /// Never assignable.
    #[serde(default)]
    pub reserved: Vec<AddressRange>,
    /// Reserved for per-zone VRRP gateways.
    #[serde(default)]
    pub gateway_pool: Vec<AddressRange>,
    #[serde(default)]
    pub adapters: Vec<AdapterId>,
}

impl Subnet {
    pub fn new(name: &str, region_id: &str, cidr: &str, gateway: Ipv4Addr) -> Self {
        Self {
            meta: DocumentMeta::default(),
            name: name.to_string(),
            region_id: region_id.to_string(),
            cidr: cidr.to_string(),
            gateway,
            dns: None,
            interface: String::new(),
            public: false,
            project_id: None,
            reserved: Vec::new(),
            gateway_pool: Vec::new(),
            adapters: Vec::new(),
        }
    }

    pub fn is_reserved(&self, addr: Ipv4Addr) -> bool {
        self.reserved.iter().any(|r| r.contains(addr))
    }

    pub fn is_gateway_pool(&self, addr: Ipv4Addr) -> bool {
        self.gateway_pool.iter().any(|r| r.contains(addr))
    }
}

/// A virtual network interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Adapter {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    pub subnet_id: SubnetId,
    pub mac: String,
    #[serde(default)]
    pub addresses: Vec<Ipv4Addr>,
    /// Reserved adapters hold fixed addresses (virtual IPs) and are exempt
    /// from MAC duplication checks.
    #[serde(default)]
    pub reserved: bool,
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
}

// ── Instances ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Provisioning,
    Running,
    Stopped,
    Suspended,
}

/// A virtual machine scheduled onto a host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    pub project_id: ProjectId,
    pub zone_id: ZoneId,
    pub host_id: HostId,
    pub vcpus: u32,
    pub memory_bytes: u64,
    #[serde(default)]
    pub adapters: Vec<AdapterId>,
    pub power: PowerState,
    #[serde(default)]
    pub cost: Cost,
}

// ── Coordinated resources ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatedKind {
    /// One member per zone of a region.
    MultiZone,
    /// N members spread over a subset of a region's zones.
    HighlyAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePhase {
    Provisioning,
    Active,
    Deleting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VrrpPriority {
    Master,
    Backup,
}

impl VrrpPriority {
    /// keepalived priority value.
    pub fn value(&self) -> u8 {
        match self {
            VrrpPriority::Master => 150,
            VrrpPriority::Backup => 100,
        }
    }
}

/// How the master member of a virtual IP is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterPolicy {
    #[default]
    FirstMember,
    /// The member living in the zone the address was reserved for.
    OwningZone,
}

/// A fixed address shared by the members of a coordinated resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualIp {
    pub vrrp_id: u8,
    pub interface: String,
    pub address: Ipv4Addr,
    pub netmask: u8,
    pub public: bool,
    /// Zone the address was reserved for, if zone-scoped.
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
    /// Member holding master priority.
    #[serde(default)]
    pub master: Option<InstanceId>,
}

impl VirtualIp {
    pub fn priority_for(&self, instance_id: &str) -> VrrpPriority {
        match &self.master {
            Some(master) if master == instance_id => VrrpPriority::Master,
            _ => VrrpPriority::Backup,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub instance_id: InstanceId,
    pub zone_id: ZoneId,
    pub host_id: HostId,
}

/// A multi-zone (MZR) or highly-available (HAR) set of instances sharing
/// virtual IPs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoordinatedResource {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    pub name: String,
    pub kind: CoordinatedKind,
    pub project_id: ProjectId,
    pub region_id: RegionId,
    pub phase: ResourcePhase,
    pub vcpus: u32,
    pub memory_bytes: u64,
    #[serde(default)]
    pub master_policy: MasterPolicy,
    #[serde(default)]
    pub members: Vec<Member>,
    /// Reserved adapters backing the virtual IPs.
    #[serde(default)]
    pub adapters: Vec<AdapterId>,
    #[serde(default)]
    pub virtual_ips: Vec<VirtualIp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, vcpus: u32, memory_bytes: u64) -> Instance {
        Instance {
            meta: DocumentMeta::with_id(id),
            name: id.to_string(),
            project_id: "p".to_string(),
            zone_id: "z".to_string(),
            host_id: "h".to_string(),
            vcpus,
            memory_bytes,
            adapters: Vec::new(),
            power: PowerState::Running,
            cost: Cost::default(),
        }
    }

    #[test]
    fn usage_counters_follow_attach_detach() {
        let mut host = Host::new("h1", "z1");
        let a = instance("a", 2, 1024);
        let b = instance("b", 4, 2048);
        let c = instance("c", 1, 512);

        assert!(host.attach_instance(&a));
        assert!(host.attach_instance(&b));
        assert!(!host.attach_instance(&a));
        assert!(host.detach_instance(&a));
        assert!(host.attach_instance(&c));
        assert!(!host.detach_instance(&a));

        let live = [&b, &c];
        assert_eq!(host.usage.instances as usize, host.instances.len());
        assert_eq!(host.usage.vcpus, live.iter().map(|i| i.vcpus).sum::<u32>());
        assert_eq!(
            host.usage.memory_bytes,
            live.iter().map(|i| i.memory_bytes).sum::<u64>()
        );
    }

    #[test]
    fn address_range_iterates_inclusively() {
        let range = AddressRange::new(
            Ipv4Addr::new(10, 0, 0, 254),
            Ipv4Addr::new(10, 0, 1, 1),
        )
        .unwrap();
        let addrs: Vec<_> = range.iter().collect();
        assert_eq!(addrs.len(), 4);
        assert_eq!(range.len(), 4);
        assert_eq!(addrs[1], Ipv4Addr::new(10, 0, 0, 255));
        assert_eq!(addrs[3], Ipv4Addr::new(10, 0, 1, 1));
    }

    #[test]
    fn address_range_rejects_reversed_bounds() {
        assert!(AddressRange::new(Ipv4Addr::new(10, 0, 0, 9), Ipv4Addr::new(10, 0, 0, 1)).is_err());
    }

    #[test]
    fn address_range_overlap() {
        let a = AddressRange::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 10)).unwrap();
        let b = AddressRange::new(Ipv4Addr::new(10, 0, 0, 10), Ipv4Addr::new(10, 0, 0, 20)).unwrap();
        let c = AddressRange::new(Ipv4Addr::new(10, 0, 0, 11), Ipv4Addr::new(10, 0, 0, 20)).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn quotas_zero_means_unlimited() {
        let quotas = ProjectQuotas::default();
        let usage = ProjectUsage {
            instances: 1000,
            vcpus: 1000,
            memory_bytes: u64::MAX / 2,
            storage_bytes: 0,
        };
        assert_eq!(quotas.exceeded_by(&usage, 64, 1024), None);
    }

    #[test]
    fn quotas_report_first_exceeded_resource() {
        let quotas = ProjectQuotas {
            instances: 10,
            vcpus: 8,
            memory_bytes: 0,
            storage_bytes: 0,
        };
        let usage = ProjectUsage {
            instances: 2,
            vcpus: 6,
            ..Default::default()
        };
        assert_eq!(quotas.exceeded_by(&usage, 2, 0), None);
        assert_eq!(quotas.exceeded_by(&usage, 4, 0), Some("vcpus"));
    }

    #[test]
    fn meta_is_flattened_in_json() {
        let mut region = Region {
            name: "eu-west".to_string(),
            ..Default::default()
        };
        region.meta.id = "r1".to_string();
        let json = serde_json::to_value(&region).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["name"], "eu-west");
        assert!(json.get("meta").is_none());
    }
}
