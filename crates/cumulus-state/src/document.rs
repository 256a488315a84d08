//! The `Document` trait binds a domain type to its collection.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::tables::{self, DocumentTable};
use crate::types::*;

/// A persisted, JSON-serialized domain type.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Singular kind name used in logs and error messages.
    const COLLECTION: &'static str;
    const TABLE: DocumentTable;

    fn meta(&self) -> &DocumentMeta;
    fn meta_mut(&mut self) -> &mut DocumentMeta;

    fn id(&self) -> &str {
        &self.meta().id
    }
}

macro_rules! document {
    ($ty:ty, $table:ident, $name:literal) => {
        impl Document for $ty {
            const COLLECTION: &'static str = $name;
            const TABLE: DocumentTable = tables::$table;

            fn meta(&self) -> &DocumentMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut DocumentMeta {
                &mut self.meta
            }
        }
    };
}

document!(AgentRecord, AGENTS, "agent");
document!(Region, REGIONS, "region");
document!(Zone, ZONES, "zone");
document!(Host, HOSTS, "host");
document!(StoragePool, STORAGE_POOLS, "storage pool");
document!(Project, PROJECTS, "project");
document!(Subnet, SUBNETS, "subnet");
document!(Adapter, ADAPTERS, "adapter");
document!(Instance, INSTANCES, "instance");
document!(CoordinatedResource, COORDINATED, "coordinated resource");
