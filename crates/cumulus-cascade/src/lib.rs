//! cumulus-cascade: derived capacity and pricing aggregates.
//!
//! Hardware and cost changes on a host flow upward: the host's virtual
//! resources are recomputed, its instances are re-priced, then its zone
//! and region averages follow. Recomputation is best-effort and eventually
//! consistent; a periodic pass heals whatever concurrent writers lost.

pub mod capacity;
pub mod cascade;
pub mod error;

pub use capacity::{average, instance_cost, region_storage, virtual_cpus, virtual_memory};
pub use cascade::Cascade;
pub use error::{CascadeError, CascadeResult};
