//! cumulus-state: embedded document store for the Cumulus control plane.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for every resource kind of the fleet (regions, zones, hosts,
//! projects, subnets, adapters, instances, coordinated resources, agents).
//!
//! # Architecture
//!
//! Every domain type implements [`Document`], which binds it to one redb
//! table keyed by document id. Values are JSON. Cross-resource links are
//! identifier strings and are never resolved by the store itself.
//!
//! Reads go through a cache keyed by `(collection, id)` that every write to
//! that key invalidates. There are no multi-document transactions: callers
//! maintain invariants by the order of their writes.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod document;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use document::Document;
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
