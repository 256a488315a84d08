//! redb table definitions for the Cumulus state store.
//!
//! Each table uses `&str` keys (document ids) and `&[u8]` values
//! (JSON-serialized documents).

use redb::TableDefinition;

pub type DocumentTable = TableDefinition<'static, &'static str, &'static [u8]>;

pub const AGENTS: DocumentTable = TableDefinition::new("agents");
pub const REGIONS: DocumentTable = TableDefinition::new("regions");
pub const ZONES: DocumentTable = TableDefinition::new("zones");
pub const HOSTS: DocumentTable = TableDefinition::new("hosts");
pub const STORAGE_POOLS: DocumentTable = TableDefinition::new("storage_pools");
pub const PROJECTS: DocumentTable = TableDefinition::new("projects");
pub const SUBNETS: DocumentTable = TableDefinition::new("subnets");
pub const ADAPTERS: DocumentTable = TableDefinition::new("adapters");
pub const INSTANCES: DocumentTable = TableDefinition::new("instances");
/// Multi-zone and highly-available resources.
pub const COORDINATED: DocumentTable = TableDefinition::new("coordinated");

pub const ALL_TABLES: [DocumentTable; 10] = [
    AGENTS,
    REGIONS,
    ZONES,
    HOSTS,
    STORAGE_POOLS,
    PROJECTS,
    SUBNETS,
    ADAPTERS,
    INSTANCES,
    COORDINATED,
];
