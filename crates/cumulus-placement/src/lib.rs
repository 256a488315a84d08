//! Cumulus placement scheduler: usage scoring, anti-affinity, election.
//!
//! This crate decides which hypervisor host runs a new workload and which
//! zones a highly-available resource spreads over. It does NOT create
//! anything; the orchestrator executes the decisions.
//!
//! # Components
//!
//! - **`scorer`**: Host usage score and sibling-name malus
//! - **`placer`**: `elect_host`, `elect_hosts`, `elect_zones`, `HostSpread`
//! - **`convert`**: Conversions from state store types
//! - **`elector`**: Store and registry aware candidate building

pub mod convert;
pub mod elector;
pub mod error;
pub mod placer;
pub mod scorer;

pub use convert::host_to_load;
pub use elector::HostElector;
pub use error::{PlacementError, PlacementResult};
pub use placer::{HostSpread, ZoneLoad, ZoneScore, elect_host, elect_hosts, elect_zones};
pub use scorer::{HostLoad, HostScore, ScoringWeights, is_sibling, levenshtein, score_host, successor, usage_score};
