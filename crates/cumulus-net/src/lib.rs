//! cumulus-net: IPv4 address management for the Cumulus control plane.
//!
//! # Components
//!
//! - **`allocator`**: Subnet validation, free-address search, per-zone
//!   gateway assignment
//! - **`adapter`**: Virtual network adapter lifecycle (MAC + address)
//! - **`vrrp`**: Per-project VRRP virtual-router ID pool

pub mod adapter;
pub mod allocator;
pub mod error;
pub mod vrrp;

pub use adapter::{AdapterRequest, generate_mac};
pub use allocator::{
    AddressAllocator, assign_zone_gateways, find_free_address, free_count, gateway_pool_addresses,
    parse_cidr, usable_range, validate_gateway_pool, validate_subnet,
};
pub use error::{NetError, NetResult};
pub use vrrp::{VRRP_ID_MAX, VRRP_ID_MIN, VrrpPool, lowest_free};
