//! Capacity and price arithmetic.

use cumulus_state::{Cost, Host, Instance, StoragePool, VirtualResource, bytes_to_gib};

fn per_unit(cost: &Cost, count: f64) -> VirtualResource {
    VirtualResource {
        count,
        price: if count > 0.0 { cost.price / count } else { 0.0 },
        currency: cost.currency.clone(),
    }
}

/// vCPUs of a host: logical CPUs times the CPU overcommit ratio.
pub fn virtual_cpus(host: &Host) -> VirtualResource {
    let count = f64::from(host.capabilities.logical_cpus()) * host.cpu_overcommit;
    per_unit(&host.cpu_cost, count)
}

/// GiB of virtual memory of a host: physical GiB times the memory
/// overcommit ratio.
pub fn virtual_memory(host: &Host) -> VirtualResource {
    let count = bytes_to_gib(host.capabilities.memory_bytes) * host.memory_overcommit;
    per_unit(&host.memory_cost, count)
}

/// Mean count and mean price. Empty input yields a zero resource.
pub fn average<'a>(resources: impl IntoIterator<Item = &'a VirtualResource>) -> VirtualResource {
    let mut n = 0usize;
    let mut count = 0.0;
    let mut price = 0.0;
    let mut currency = None;
    for r in resources {
        n += 1;
        count += r.count;
        price += r.price;
        currency.get_or_insert_with(|| r.currency.clone());
    }
    if n == 0 {
        return VirtualResource {
            currency: Cost::default().currency,
            ..Default::default()
        };
    }
    VirtualResource {
        count: count / n as f64,
        price: price / n as f64,
        currency: currency.unwrap_or_default(),
    }
}

/// Region storage: total GiB and the mean per-GiB price over the pools
/// that report a capacity.
pub fn region_storage(pools: &[StoragePool]) -> VirtualResource {
    let per_gib: Vec<VirtualResource> = pools
        .iter()
        .filter(|p| p.capacity_bytes > 0)
        .map(|p| per_unit(&p.cost, bytes_to_gib(p.capacity_bytes)))
        .collect();
    let mut storage = average(&per_gib);
    storage.count = per_gib.iter().map(|r| r.count).sum();
    storage
}

/// Monthly cost of an instance at the given unit prices.
pub fn instance_cost(instance: &Instance, cpu: &VirtualResource, memory: &VirtualResource) -> Cost {
    Cost {
        price: f64::from(instance.vcpus) * cpu.price + bytes_to_gib(instance.memory_bytes) * memory.price,
        currency: cpu.currency.clone(),
    }
}
