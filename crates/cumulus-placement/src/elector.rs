//! Host elector: builds placement candidates from the store and the
//! agent registry.
//!
//! Only hosts with at least one connected agent are candidates: a host
//! nobody can talk to cannot run anything.

use cumulus_agents::AgentRegistry;
use cumulus_state::{Host, Instance, StateStore, Zone};
use tracing::{debug, warn};

use crate::convert::host_to_load;
use crate::error::{PlacementError, PlacementResult};
use crate::placer::{HostSpread, ZoneLoad, ZoneScore, elect_zones};
use crate::scorer::{HostLoad, HostScore, ScoringWeights};

#[derive(Clone)]
pub struct HostElector {
    state: StateStore,
    registry: AgentRegistry,
    weights: ScoringWeights,
}

impl HostElector {
    pub fn new(state: StateStore, registry: AgentRegistry, weights: ScoringWeights) -> Self {
        Self {
            state,
            registry,
            weights,
        }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    async fn load_of(&self, host: &Host) -> PlacementResult<HostLoad> {
        let (instances, dangling) = self.state.resolve::<Instance>(&host.instances)?;
        for id in &dangling {
            warn!(host = %host.name, instance_id = %id, "host references missing instance");
        }
        let names = instances.into_iter().map(|i| i.name).collect();
        Ok(host_to_load(host, names))
    }

    /// Reachable hosts of a zone, in the zone's host order.
    pub async fn candidates_in_zone(&self, zone_id: &str) -> PlacementResult<Vec<HostLoad>> {
        let zone: Zone = self.state.fetch(zone_id)?;
        let (hosts, dangling) = self.state.resolve::<Host>(&zone.hosts)?;
        for id in &dangling {
            warn!(zone = %zone.name, host_id = %id, "zone references missing host");
        }

        let mut candidates = Vec::with_capacity(hosts.len());
        for host in hosts {
            if !self.registry.any_connected(&host.agents).await {
                debug!(host = %host.name, "host skipped: no connected agent");
                continue;
            }
            candidates.push(self.load_of(&host).await?);
        }
        Ok(candidates)
    }

    /// Elect a host of the zone for a workload called `name`.
    ///
    /// Hosts in `exclude` are skipped unless that would leave no candidate,
    /// in which case every reachable host of the zone is considered again.
    pub async fn elect_in_zone(&self, name: &str, zone_id: &str, exclude: &[String]) -> PlacementResult<HostScore> {
        let mut spread = HostSpread::excluding(exclude.iter().cloned());
        self.elect_spread_in_zone(name, zone_id, &mut spread).await
    }

    /// Elect a host of the zone and record it in `spread`, so repeated
    /// calls cycle through the zone's hosts.
    pub async fn elect_spread_in_zone(
        &self,
        name: &str,
        zone_id: &str,
        spread: &mut HostSpread,
    ) -> PlacementResult<HostScore> {
        let candidates = self.candidates_in_zone(zone_id).await?;
        if candidates.is_empty() {
            return Err(PlacementError::NoHosts(format!(
                "zone {zone_id} has no host with a connected agent"
            )));
        }
        let pick = spread.elect(name, &candidates, &self.weights)?;
        debug!(%name, %zone_id, host_id = %pick.host_id, total = pick.total, "host elected");
        Ok(pick)
    }

    /// Zones of a region with their reachable hosts, sorted by zone name.
    pub async fn zone_loads(&self, region_id: &str) -> PlacementResult<Vec<ZoneLoad>> {
        let mut zones = self.state.find(|z: &Zone| z.region_id == region_id)?;
        zones.sort_by(|a, b| a.name.cmp(&b.name));

        let mut loads = Vec::with_capacity(zones.len());
        for zone in zones {
            let hosts = self.candidates_in_zone(&zone.meta.id).await?;
            loads.push(ZoneLoad {
                zone_id: zone.meta.id,
                hosts,
            });
        }
        Ok(loads)
    }

    /// The `count` least-loaded zones of a region.
    pub async fn elect_zones_in_region(&self, region_id: &str, count: usize) -> PlacementResult<Vec<ZoneScore>> {
        let loads = self.zone_loads(region_id).await?;
        if loads.is_empty() {
            return Err(PlacementError::NoZones(format!("region {region_id} has no zones")));
        }
        elect_zones(&loads, count, &self.weights)
    }
}
