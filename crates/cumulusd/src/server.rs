//! Serve mode: open the store, wire the control plane, run the background
//! loops and the HTTP server until Ctrl-C.

use std::net::SocketAddr;
use std::time::Duration;

use cumulus_agents::AgentRegistry;
use cumulus_core::ControlPlaneConfig;
use cumulus_orchestrator::ControlPlane;
use cumulus_state::StateStore;
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run(config: ControlPlaneConfig) -> anyhow::Result<()> {
    info!("Cumulus control plane starting");

    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.database_path();
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let plane = ControlPlane::new(state, AgentRegistry::new(), &config);
    info!(
        rpc_timeout_secs = config.agents.rpc_timeout_secs,
        sibling_malus = config.placement.sibling_malus,
        "control plane services initialized"
    );

    match plane.reconciler.reconcile_all() {
        Ok(0) => {}
        Ok(repaired) => warn!(repaired, "projects repaired at startup"),
        Err(e) => warn!(error = %e, "startup reconciliation failed"),
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let cascade_handle = if config.cascade.interval_secs > 0 {
        let cascade = plane.cascade.clone();
        let interval = Duration::from_secs(config.cascade.interval_secs);
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move { cascade.run(interval, shutdown).await }))
    } else {
        info!("periodic cascade disabled");
        None
    };

    // ── API server ─────────────────────────────────────────────

    let rpc_timeout = Duration::from_secs(config.agents.rpc_timeout_secs);
    let router = cumulus_api::build_router(plane, rpc_timeout);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C, running until killed");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    if let Some(handle) = cascade_handle {
        let _ = handle.await;
    }
    drop(shutdown_rx);

    info!("Cumulus control plane stopped");
    Ok(())
}
