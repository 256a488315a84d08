//! Subnet validation and free-address search.
//!
//! Addresses are handed out by a linear walk from the first host address of
//! the subnet. An address is assignable when it is not the gateway, not the
//! broadcast address, not inside a reserved range, not inside the gateway
//! pool and not held by a live adapter of the subnet.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use cumulus_state::{Adapter, AddressRange, StateStore, Subnet};
use ipnetwork::Ipv4Network;
use tracing::{debug, warn};

use crate::error::{NetError, NetResult};

/// Parse the subnet's CIDR block.
pub fn parse_cidr(subnet: &Subnet) -> NetResult<Ipv4Network> {
    subnet.cidr.parse::<Ipv4Network>().map_err(|e| {
        NetError::InvalidConfig(format!(
            "subnet {} has invalid CIDR {:?}: {e}",
            subnet.name, subnet.cidr
        ))
    })
}

/// Host addresses of a network: everything strictly between the network
/// and broadcast addresses. A /31 or /32 has none.
pub fn usable_range(net: &Ipv4Network) -> AddressRange {
    let network = u32::from(net.network());
    let broadcast = u32::from(net.broadcast());
    AddressRange {
        first: network.saturating_add(1).into(),
        last: broadcast.saturating_sub(1).into(),
    }
}

fn is_assignable(
    subnet: &Subnet,
    broadcast: Ipv4Addr,
    assigned: &HashSet<Ipv4Addr>,
    addr: Ipv4Addr,
) -> bool {
    addr != subnet.gateway
        && addr != broadcast
        && !subnet.is_reserved(addr)
        && !subnet.is_gateway_pool(addr)
        && !assigned.contains(&addr)
}

/// First assignable address of the subnet given the addresses already held.
pub fn find_free_address(subnet: &Subnet, assigned: &HashSet<Ipv4Addr>) -> NetResult<Ipv4Addr> {
    let net = parse_cidr(subnet)?;
    let broadcast = net.broadcast();
    usable_range(&net)
        .iter()
        .find(|addr| is_assignable(subnet, broadcast, assigned, *addr))
        .ok_or_else(|| NetError::AddressExhausted(subnet.name.clone()))
}

/// Number of addresses still assignable in the subnet.
pub fn free_count(subnet: &Subnet, assigned: &HashSet<Ipv4Addr>) -> NetResult<u32> {
    let net = parse_cidr(subnet)?;
    let broadcast = net.broadcast();
    let free = usable_range(&net)
        .iter()
        .filter(|addr| is_assignable(subnet, broadcast, assigned, *addr))
        .count();
    Ok(free as u32)
}

/// Expand the gateway-pool ranges into individual addresses, in order.
pub fn gateway_pool_addresses(subnet: &Subnet) -> Vec<Ipv4Addr> {
    subnet.gateway_pool.iter().flat_map(|r| r.iter()).collect()
}

/// Fail unless the gateway pool holds at least one address per zone.
pub fn validate_gateway_pool(subnet: &Subnet, zone_count: usize) -> NetResult<()> {
    let available = subnet.gateway_pool.iter().map(|r| r.len() as usize).sum::<usize>();
    if available < zone_count {
        return Err(NetError::InvalidConfig(format!(
            "gateway pool of subnet {} holds {available} addresses but the region has {zone_count} zones",
            subnet.name
        )));
    }
    Ok(())
}

fn check_ranges(subnet: &Subnet, net: &Ipv4Network, label: &str, ranges: &[AddressRange]) -> NetResult<()> {
    for range in ranges {
        if range.first > range.last {
            return Err(NetError::InvalidConfig(format!(
                "{label} range {}-{} of subnet {} is reversed",
                range.first, range.last, subnet.name
            )));
        }
        if !net.contains(range.first) || !net.contains(range.last) {
            return Err(NetError::InvalidConfig(format!(
                "{label} range {}-{} lies outside {}",
                range.first, range.last, subnet.cidr
            )));
        }
    }
    Ok(())
}

/// Check that a subnet is internally consistent.
pub fn validate_subnet(subnet: &Subnet) -> NetResult<()> {
    let net = parse_cidr(subnet)?;

    if !net.contains(subnet.gateway) {
        return Err(NetError::InvalidConfig(format!(
            "gateway {} lies outside {}",
            subnet.gateway, subnet.cidr
        )));
    }

    check_ranges(subnet, &net, "reserved", &subnet.reserved)?;
    check_ranges(subnet, &net, "gateway pool", &subnet.gateway_pool)?;

    for reserved in &subnet.reserved {
        if let Some(pool) = subnet.gateway_pool.iter().find(|p| p.overlaps(reserved)) {
            return Err(NetError::InvalidConfig(format!(
                "reserved range {}-{} overlaps gateway pool {}-{}",
                reserved.first, reserved.last, pool.first, pool.last
            )));
        }
    }
    Ok(())
}

/// Map each zone name to a gateway-pool address, in order.
pub fn assign_zone_gateways(
    subnet: &Subnet,
    zone_names: &[String],
) -> NetResult<HashMap<String, Ipv4Addr>> {
    validate_gateway_pool(subnet, zone_names.len())?;
    Ok(zone_names
        .iter()
        .cloned()
        .zip(gateway_pool_addresses(subnet))
        .collect())
}

/// Address allocation against the persisted subnets and adapters.
#[derive(Clone)]
pub struct AddressAllocator {
    pub(crate) state: StateStore,
}

impl AddressAllocator {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Addresses held by the live adapters of a subnet. Dangling adapter ids
    /// are skipped.
    pub fn assigned_addresses(&self, subnet: &Subnet) -> NetResult<HashSet<Ipv4Addr>> {
        let (adapters, dangling) = self.state.resolve::<Adapter>(&subnet.adapters)?;
        for id in &dangling {
            warn!(subnet = %subnet.name, adapter_id = %id, "subnet references missing adapter");
        }
        Ok(adapters.into_iter().flat_map(|a| a.addresses).collect())
    }

    /// Pick the next free address of a subnet. The address is not claimed
    /// until an adapter holding it is persisted.
    pub fn allocate(&self, subnet_id: &str) -> NetResult<Ipv4Addr> {
        let subnet: Subnet = self.state.fetch(subnet_id)?;
        let assigned = self.assigned_addresses(&subnet)?;
        let addr = find_free_address(&subnet, &assigned)?;
        debug!(subnet = %subnet.name, %addr, "address allocated");
        Ok(addr)
    }

    /// Number of free addresses in a subnet.
    pub fn free_addresses(&self, subnet_id: &str) -> NetResult<u32> {
        let subnet: Subnet = self.state.fetch(subnet_id)?;
        let assigned = self.assigned_addresses(&subnet)?;
        free_count(&subnet, &assigned)
    }

    /// First public subnet of a region with at least `needed` free addresses.
    pub fn find_public_subnet(&self, region_id: &str, needed: u32) -> NetResult<Option<Subnet>> {
        let candidates = self
            .state
            .find(|s: &Subnet| s.public && s.region_id == region_id)?;
        for subnet in candidates {
            let assigned = self.assigned_addresses(&subnet)?;
            if free_count(&subnet, &assigned)? >= needed {
                return Ok(Some(subnet));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_state::DocumentMeta;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn range(first: u8, last: u8) -> AddressRange {
        AddressRange::new(addr(first), addr(last)).unwrap()
    }

    fn subnet_24() -> Subnet {
        Subnet::new("lan", "r1", "10.0.0.0/24", addr(1))
    }

    #[test]
    fn first_free_skips_gateway() {
        let subnet = subnet_24();
        assert_eq!(find_free_address(&subnet, &HashSet::new()).unwrap(), addr(2));
    }

    #[test]
    fn never_returns_reserved_pool_or_assigned() {
        let mut subnet = subnet_24();
        subnet.reserved.push(range(2, 9));
        subnet.gateway_pool.push(range(10, 12));
        let assigned: HashSet<_> = [addr(13), addr(14)].into_iter().collect();

        assert_eq!(find_free_address(&subnet, &assigned).unwrap(), addr(15));
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut subnet = Subnet::new("tiny", "r1", "10.0.0.0/30", addr(1));
        let assigned: HashSet<_> = [addr(2)].into_iter().collect();
        assert!(matches!(
            find_free_address(&subnet, &assigned),
            Err(NetError::AddressExhausted(_))
        ));

        // The broadcast address is never handed out even with nothing held.
        subnet.reserved.push(range(2, 2));
        assert!(find_free_address(&subnet, &HashSet::new()).is_err());
    }

    #[test]
    fn point_to_point_network_has_no_host_address() {
        let subnet = Subnet::new("p2p", "r1", "10.0.0.0/31", addr(1));
        assert!(matches!(
            find_free_address(&subnet, &HashSet::new()),
            Err(NetError::AddressExhausted(_))
        ));
        assert_eq!(free_count(&subnet, &HashSet::new()).unwrap(), 0);

        let single = Subnet::new("one", "r1", "10.0.0.4/32", addr(4));
        assert_eq!(free_count(&single, &HashSet::new()).unwrap(), 0);
    }

    #[test]
    fn free_count_excludes_every_unassignable_address() {
        let mut subnet = subnet_24();
        subnet.reserved.push(range(2, 11));
        subnet.gateway_pool.push(range(250, 254));
        let assigned: HashSet<_> = [addr(20)].into_iter().collect();

        // 254 host addresses - gateway - 10 reserved - 5 pool - 1 assigned.
        assert_eq!(free_count(&subnet, &assigned).unwrap(), 237);
    }

    #[test]
    fn gateway_pool_expands_in_order() {
        let mut subnet = subnet_24();
        subnet.gateway_pool.push(range(250, 251));
        subnet.gateway_pool.push(range(240, 240));

        assert_eq!(gateway_pool_addresses(&subnet), vec![addr(250), addr(251), addr(240)]);
        assert!(validate_gateway_pool(&subnet, 3).is_ok());
        assert!(matches!(
            validate_gateway_pool(&subnet, 4),
            Err(NetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn zone_gateways_follow_pool_order() {
        let mut subnet = subnet_24();
        subnet.gateway_pool.push(range(250, 252));
        let zones = vec!["a".to_string(), "b".to_string()];

        let gateways = assign_zone_gateways(&subnet, &zones).unwrap();
        assert_eq!(gateways["a"], addr(250));
        assert_eq!(gateways["b"], addr(251));

        let too_many: Vec<String> = (0..4).map(|i| format!("z{i}")).collect();
        assert!(assign_zone_gateways(&subnet, &too_many).is_err());
    }

    #[test]
    fn validate_subnet_rejects_bad_layouts() {
        let mut bad_cidr = subnet_24();
        bad_cidr.cidr = "10.0.0.0/33".to_string();
        assert!(validate_subnet(&bad_cidr).is_err());

        let mut outside_gateway = subnet_24();
        outside_gateway.gateway = Ipv4Addr::new(10, 0, 1, 1);
        assert!(validate_subnet(&outside_gateway).is_err());

        let mut outside_range = subnet_24();
        outside_range.reserved.push(AddressRange {
            first: addr(250),
            last: Ipv4Addr::new(10, 0, 1, 4),
        });
        assert!(validate_subnet(&outside_range).is_err());

        let mut reversed = subnet_24();
        reversed.gateway_pool.push(AddressRange {
            first: addr(9),
            last: addr(3),
        });
        assert!(validate_subnet(&reversed).is_err());

        let mut overlapping = subnet_24();
        overlapping.reserved.push(range(2, 20));
        overlapping.gateway_pool.push(range(20, 30));
        assert!(validate_subnet(&overlapping).is_err());

        let mut good = subnet_24();
        good.reserved.push(range(2, 19));
        good.gateway_pool.push(range(20, 30));
        assert!(validate_subnet(&good).is_ok());
    }

    // ── Store-backed allocation ────────────────────────────────────

    fn store_with_subnet() -> (StateStore, Subnet) {
        let store = StateStore::open_in_memory().unwrap();
        let mut subnet = subnet_24();
        store.insert(&mut subnet).unwrap();
        (store, subnet)
    }

    fn insert_adapter(store: &StateStore, subnet: &mut Subnet, id: &str, held: Ipv4Addr) {
        let mut adapter = Adapter {
            meta: DocumentMeta::with_id(id),
            name: id.to_string(),
            subnet_id: subnet.meta.id.clone(),
            mac: format!("52:54:00:00:00:{:02x}", held.octets()[3]),
            addresses: vec![held],
            reserved: false,
            instance_id: None,
        };
        store.insert(&mut adapter).unwrap();
        subnet.adapters.push(id.to_string());
        store.update(subnet).unwrap();
    }

    #[test]
    fn allocate_skips_live_adapters_and_tolerates_dangling() {
        let (store, mut subnet) = store_with_subnet();
        insert_adapter(&store, &mut subnet, "a1", addr(2));
        insert_adapter(&store, &mut subnet, "a2", addr(3));
        subnet.adapters.push("gone".to_string());
        store.update(&mut subnet).unwrap();

        let allocator = AddressAllocator::new(store);
        assert_eq!(allocator.allocate(&subnet.meta.id).unwrap(), addr(4));
        assert_eq!(allocator.free_addresses(&subnet.meta.id).unwrap(), 251);
    }

    #[test]
    fn find_public_subnet_requires_room() {
        let store = StateStore::open_in_memory().unwrap();
        let mut tiny = Subnet::new("tiny", "r1", "192.0.2.0/30", Ipv4Addr::new(192, 0, 2, 1));
        tiny.public = true;
        store.insert(&mut tiny).unwrap();
        let mut wide = Subnet::new("wide", "r1", "198.51.100.0/24", Ipv4Addr::new(198, 51, 100, 1));
        wide.public = true;
        store.insert(&mut wide).unwrap();

        let allocator = AddressAllocator::new(store);
        let found = allocator.find_public_subnet("r1", 2).unwrap().unwrap();
        assert_eq!(found.name, "wide");
        assert!(allocator.find_public_subnet("r2", 1).unwrap().is_none());
    }
}
