//! Type conversions between state store types and placement types.

use cumulus_state::Host;

use crate::scorer::HostLoad;

/// Convert a [`Host`] to a [`HostLoad`].
///
/// Hosted instance names are passed in because resolving them needs the
/// store; the host document only carries ids.
pub fn host_to_load(host: &Host, instance_names: Vec<String>) -> HostLoad {
    HostLoad {
        host_id: host.meta.id.clone(),
        usage: host.usage,
        instance_names,
    }
}
