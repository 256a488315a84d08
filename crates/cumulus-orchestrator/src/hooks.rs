//! Side effects of an agent (re)registering.
//!
//! Hosts backed by the agent are re-scanned and re-priced, storage pools
//! backed by it refresh their statistics and network agents reload their
//! configuration. Everything runs in the background; failures are logged.

use std::sync::Arc;

use cumulus_agents::methods::{self, NodeCapabilitiesReply, PoolStatsArgs, PoolStatsReply};
use cumulus_agents::{AgentRegistry, BoxFuture, RegistrationHook};
use cumulus_cascade::Cascade;
use cumulus_state::{AgentKind, Host, StateStore, StoragePool};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::OrchestratorResult;

/// Build the hook the registry runs after every registration.
pub fn registration_hook(state: StateStore, registry: AgentRegistry, cascade: Cascade) -> RegistrationHook {
    let effects = RegistrationEffects {
        state,
        registry,
        cascade,
    };
    Arc::new(move |agent_id: String, kind: AgentKind| -> BoxFuture {
        let effects = effects.clone();
        Box::pin(async move { effects.run(&agent_id, kind).await })
    })
}

#[derive(Clone)]
pub struct RegistrationEffects {
    state: StateStore,
    registry: AgentRegistry,
    cascade: Cascade,
}

impl RegistrationEffects {
    pub fn new(state: StateStore, registry: AgentRegistry, cascade: Cascade) -> Self {
        Self {
            state,
            registry,
            cascade,
        }
    }

    pub async fn run(&self, agent_id: &str, kind: AgentKind) {
        debug!(%agent_id, %kind, "running registration side effects");
        if let Err(e) = self.rescan_hosts(agent_id).await {
            warn!(%agent_id, error = %e, "host rescan failed");
        }
        if let Err(e) = self.refresh_pools(agent_id).await {
            warn!(%agent_id, error = %e, "storage pool refresh failed");
        }
        if kind == AgentKind::Network {
            let agents = [agent_id.to_string()];
            match self.registry.dispatch(&agents, methods::RELOAD_CONFIG, Value::Null).await {
                Ok(_) => info!(%agent_id, "network agent reloaded"),
                Err(e) => warn!(%agent_id, error = %e, "network reload failed"),
            }
        }
    }

    /// Refresh the hardware of every host the agent serves and re-run the
    /// cascade for it. Returns the number of hosts updated.
    pub async fn rescan_hosts(&self, agent_id: &str) -> OrchestratorResult<usize> {
        let hosts = self.state.find(|h: &Host| h.agents.iter().any(|a| a == agent_id))?;
        let agents = [agent_id.to_string()];
        let mut updated = 0;
        for host in hosts {
            let capabilities: NodeCapabilitiesReply = match self
                .registry
                .dispatch_as(&agents, methods::NODE_CAPABILITIES, Value::Null)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(host = %host.name, %agent_id, error = %e, "capability scan failed");
                    continue;
                }
            };
            self.state
                .modify(&host.meta.id, |h: &mut Host| h.capabilities = capabilities)?;
            self.cascade.recompute_host(&host.meta.id)?;
            info!(host = %host.name, %agent_id, "host capabilities refreshed");
            updated += 1;
        }
        Ok(updated)
    }

    /// Pull usage statistics of every pool the agent serves. Returns the
    /// number of pools updated.
    pub async fn refresh_pools(&self, agent_id: &str) -> OrchestratorResult<usize> {
        let pools = self
            .state
            .find(|p: &StoragePool| p.agents.iter().any(|a| a == agent_id))?;
        let agents = [agent_id.to_string()];
        let mut updated = 0;
        for pool in pools {
            let args = PoolStatsArgs {
                pool: pool.name.clone(),
            };
            let stats: PoolStatsReply = match self.registry.dispatch_as(&agents, methods::POOL_STATS, &args).await {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(pool = %pool.name, %agent_id, error = %e, "pool stats failed");
                    continue;
                }
            };
            self.state.modify(&pool.meta.id, |p: &mut StoragePool| {
                p.capacity_bytes = stats.capacity_bytes;
                p.allocated_bytes = stats.allocated_bytes;
                p.available_bytes = stats.available_bytes;
            })?;
            self.cascade.recompute_region(&pool.region_id)?;
            debug!(pool = %pool.name, capacity = stats.capacity_bytes, "pool stats refreshed");
            updated += 1;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cumulus_agents::fake::FakeConnection;
    use cumulus_state::{Cost, DocumentMeta, HostCapabilities, Region, Zone};
    use serde_json::json;
    use std::time::Duration;

    const GIB: u64 = 1024 * 1024 * 1024;

    struct Fixture {
        state: StateStore,
        registry: AgentRegistry,
    }

    fn fixture() -> Fixture {
        let state = StateStore::open_in_memory().unwrap();
        let mut region = Region {
            meta: DocumentMeta::with_id("r1"),
            name: "eu".into(),
            storage_pools: vec!["pool1".into()],
            ..Default::default()
        };
        state.insert(&mut region).unwrap();
        let mut zone = Zone {
            meta: DocumentMeta::with_id("z1"),
            name: "a".into(),
            region_id: "r1".into(),
            hosts: vec!["h1".into()],
            ..Default::default()
        };
        state.insert(&mut zone).unwrap();

        let mut host = Host::new("kaktus-1", "z1");
        host.meta.id = "h1".into();
        host.agents = vec!["hv-1".into()];
        host.cpu_cost.price = 100.0;
        state.insert(&mut host).unwrap();

        let mut pool = StoragePool {
            meta: DocumentMeta::with_id("pool1"),
            name: "ceph".into(),
            region_id: "r1".into(),
            agents: vec!["st-1".into()],
            cost: Cost {
                price: 50.0,
                currency: "EUR".into(),
            },
            ..Default::default()
        };
        state.insert(&mut pool).unwrap();

        let registry = AgentRegistry::new();
        registry.set_hook(registration_hook(
            state.clone(),
            registry.clone(),
            Cascade::new(state.clone()),
        ));
        Fixture { state, registry }
    }

    async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }

    #[tokio::test]
    async fn hypervisor_registration_rescans_its_hosts() {
        let fx = fixture();
        let conn = FakeConnection::full();
        conn.respond(
            methods::NODE_CAPABILITIES,
            json!({
                "arch": "x86_64",
                "cpu_model": "EPYC 7443",
                "sockets": 1,
                "cores": 10,
                "threads": 1,
                "memory_bytes": 32 * GIB,
            }),
        );
        fx.registry
            .register(AgentKind::Hypervisor, "hv-1", conn.clone())
            .await
            .unwrap();

        let state = fx.state.clone();
        eventually("host rescan", move || {
            let host: Host = state.fetch("h1").unwrap();
            host.virtual_cpus.count == 10.0
        })
        .await;

        let host: Host = fx.state.fetch("h1").unwrap();
        assert_eq!(host.capabilities.cpu_model, "EPYC 7443");
        assert_eq!(host.virtual_cpus.price, 10.0);
        assert_eq!(conn.calls_to(methods::RELOAD_CONFIG), 0);
    }

    #[tokio::test]
    async fn storage_agent_refreshes_pool_stats() {
        let fx = fixture();
        let conn = FakeConnection::new(&[methods::POOL_STATS]);
        conn.respond(
            methods::POOL_STATS,
            json!({
                "capacity_bytes": 500 * GIB,
                "allocated_bytes": 100 * GIB,
                "available_bytes": 400 * GIB,
            }),
        );
        fx.registry
            .register(AgentKind::Controller, "st-1", conn.clone())
            .await
            .unwrap();

        let state = fx.state.clone();
        eventually("pool refresh", move || {
            let region: Region = state.fetch("r1").unwrap();
            region.virtual_storage.count == 500.0
        })
        .await;

        let pool: StoragePool = fx.state.fetch("pool1").unwrap();
        assert_eq!(pool.available_bytes, 400 * GIB);
        let region: Region = fx.state.fetch("r1").unwrap();
        assert_eq!(region.virtual_storage.price, 0.1);

        let (_, params) = conn
            .calls()
            .into_iter()
            .find(|(m, _)| m == methods::POOL_STATS)
            .unwrap();
        assert_eq!(params, json!({ "pool": "ceph" }));
    }

    #[tokio::test]
    async fn network_agents_reload_config() {
        let fx = fixture();
        let conn = FakeConnection::new(&[methods::RELOAD_CONFIG]);
        fx.registry
            .register(AgentKind::Network, "gw-1", conn.clone())
            .await
            .unwrap();

        let watched = conn.clone();
        eventually("reload", move || watched.calls_to(methods::RELOAD_CONFIG) == 1).await;
    }

    #[tokio::test]
    async fn failed_scan_leaves_host_untouched() {
        let fx = fixture();
        let conn = FakeConnection::full();
        conn.fail(methods::NODE_CAPABILITIES, "dmidecode failed");
        let effects = RegistrationEffects::new(fx.state.clone(), fx.registry.clone(), Cascade::new(fx.state.clone()));
        fx.registry
            .register(AgentKind::Hypervisor, "hv-1", conn)
            .await
            .unwrap();

        assert_eq!(effects.rescan_hosts("hv-1").await.unwrap(), 0);
        let host: Host = fx.state.fetch("h1").unwrap();
        assert_eq!(host.capabilities, HostCapabilities::default());
    }
}
