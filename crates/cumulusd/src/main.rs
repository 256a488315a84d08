//! cumulusd: the Cumulus control plane daemon.
//!
//! Single binary that assembles the control plane:
//! - State store (redb)
//! - Agent registry and the agent WebSocket endpoint
//! - Topology, project, instance and coordinator services
//! - Periodic cascade recomputation
//! - REST API
//!
//! # Usage
//!
//! ```text
//! cumulusd serve --config /etc/cumulus/cumulus.toml --port 8443
//! cumulusd config > cumulus.toml
//! ```

mod server;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cumulus_core::ControlPlaneConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,cumulusd=debug,cumulus=debug";

#[derive(Parser)]
#[command(name = "cumulusd", about = "Cumulus control plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Serve {
        /// Configuration file; every section falls back to its defaults.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on, overriding the configuration.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state, overriding the configuration.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ControlPlaneConfig> {
    match path {
        Some(path) => ControlPlaneConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("load config {}: {e}", path.display())),
        None => Ok(ControlPlaneConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
            log_json,
        } => {
            init_tracing(log_json);
            let mut config = load_config(config.as_ref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            server::run(config).await
        }
        Command::Config { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from([
            "cumulusd",
            "serve",
            "--config",
            "/etc/cumulus/cumulus.toml",
            "--port",
            "9000",
            "--log-json",
        ])
        .unwrap();
        match cli.command {
            Command::Serve {
                config,
                port,
                data_dir,
                log_json,
            } => {
                assert_eq!(config, Some(PathBuf::from("/etc/cumulus/cumulus.toml")));
                assert_eq!(port, Some(9000));
                assert_eq!(data_dir, None);
                assert!(log_json);
            }
            Command::Config { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cumulus.toml");
        std::fs::write(&path, "[server]\nport = 9443\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.cascade.interval_secs, 300);
    }
}
