pub mod config;
pub mod time;

pub use config::{AgentsConfig, CascadeConfig, ControlPlaneConfig, PlacementConfig, ServerConfig};
pub use time::epoch_secs;
