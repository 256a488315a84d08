//! Cascade: host → zone → region recomputation.

use std::time::Duration;

use cumulus_state::{Host, HostUsage, Instance, Region, StateStore, StoragePool, Zone};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::capacity::{average, instance_cost, region_storage, virtual_cpus, virtual_memory};
use crate::error::CascadeResult;

#[derive(Clone)]
pub struct Cascade {
    state: StateStore,
}

impl Cascade {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Recompute a host, re-price its instances, then its zone and region.
    pub fn recompute_host(&self, host_id: &str) -> CascadeResult<()> {
        let host = self.refresh_host(host_id)?;
        self.recompute_zone_chain(&host.zone_id)
    }

    /// Start [`Cascade::recompute_host`] in the background. The caller is
    /// not told when, or whether, it completed.
    pub fn trigger_host(&self, host_id: &str) {
        let cascade = self.clone();
        let host_id = host_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = cascade.recompute_host(&host_id) {
                warn!(%host_id, error = %e, "cascade recomputation failed");
            }
        });
    }

    /// Host virtual resources and the cost of its live instances.
    fn refresh_host(&self, host_id: &str) -> CascadeResult<Host> {
        let mut host: Host = self.state.fetch(host_id)?;
        host.virtual_cpus = virtual_cpus(&host);
        host.virtual_memory = virtual_memory(&host);
        self.state.update(&mut host)?;

        let (instances, dangling) = self.state.resolve::<Instance>(&host.instances)?;
        for id in &dangling {
            warn!(host = %host.name, instance_id = %id, "host references missing instance");
        }
        for mut instance in instances {
            instance.cost = instance_cost(&instance, &host.virtual_cpus, &host.virtual_memory);
            self.state.update(&mut instance)?;
        }

        debug!(
            host = %host.name,
            vcpus = host.virtual_cpus.count,
            vcpu_price = host.virtual_cpus.price,
            vmemory = host.virtual_memory.count,
            "host capacity recomputed"
        );
        Ok(host)
    }

    fn recompute_zone_chain(&self, zone_id: &str) -> CascadeResult<()> {
        match self.recompute_zone(zone_id)? {
            Some(zone) => self.recompute_region(&zone.region_id),
            None => {
                warn!(%zone_id, "host references missing zone");
                Ok(())
            }
        }
    }

    /// Average the zone's host resources. Returns `None` if the zone is gone.
    pub fn recompute_zone(&self, zone_id: &str) -> CascadeResult<Option<Zone>> {
        let Some(mut zone) = self.state.get::<Zone>(zone_id)? else {
            return Ok(None);
        };
        let (hosts, _) = self.state.resolve::<Host>(&zone.hosts)?;
        zone.virtual_cpus = average(hosts.iter().map(|h| &h.virtual_cpus));
        zone.virtual_memory = average(hosts.iter().map(|h| &h.virtual_memory));
        self.state.update(&mut zone)?;
        Ok(Some(zone))
    }

    /// Region storage pricing from its pools.
    pub fn recompute_region(&self, region_id: &str) -> CascadeResult<()> {
        let Some(mut region) = self.state.get::<Region>(region_id)? else {
            warn!(%region_id, "zone references missing region");
            return Ok(());
        };
        let (pools, _) = self.state.resolve::<StoragePool>(&region.storage_pools)?;
        region.virtual_storage = region_storage(&pools);
        self.state.update(&mut region)?;
        Ok(())
    }

    /// Rebuild a host's instance list and usage counters from the instances
    /// that name it as their host. Ids of instances that no longer exist are
    /// dropped and ids lost by a concurrent write are restored.
    pub fn heal_host_usage(&self, host_id: &str) -> CascadeResult<HostUsage> {
        let mut host: Host = self.state.fetch(host_id)?;
        let mut hosted = self.state.find(|i: &Instance| i.host_id == host_id)?;
        hosted.sort_by_key(|i| host.instances.iter().position(|id| id == &i.meta.id).unwrap_or(usize::MAX));

        let mut usage = HostUsage::default();
        for instance in &hosted {
            usage.instances += 1;
            usage.vcpus += instance.vcpus;
            usage.memory_bytes += instance.memory_bytes;
        }
        let ids: Vec<String> = hosted.into_iter().map(|i| i.meta.id).collect();

        if usage != host.usage || ids != host.instances {
            let dropped = host.instances.iter().filter(|id| !ids.contains(id)).count();
            let restored = ids.iter().filter(|id| !host.instances.contains(id)).count();
            info!(
                host = %host.name,
                dropped,
                restored,
                old = ?host.usage,
                new = ?usage,
                "host usage healed"
            );
            host.instances = ids;
            host.usage = usage;
            self.state.update(&mut host)?;
        }
        Ok(usage)
    }

    /// Heal and recompute every host, zone and region.
    pub fn recompute_all(&self) -> CascadeResult<()> {
        let hosts = self.state.list::<Host>()?;
        for host in &hosts {
            self.heal_host_usage(&host.meta.id)?;
            self.refresh_host(&host.meta.id)?;
        }
        for zone in self.state.list::<Zone>()? {
            self.recompute_zone(&zone.meta.id)?;
        }
        for region in self.state.list::<Region>()? {
            self.recompute_region(&region.meta.id)?;
        }
        debug!(hosts = hosts.len(), "full cascade pass complete");
        Ok(())
    }

    /// Run [`Cascade::recompute_all`] every `interval` until shutdown.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "cascade loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.recompute_all() {
                        error!(error = %e, "periodic cascade pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("cascade loop stopping");
                    break;
                }
            }
        }
    }
}
