//! Per-project pool of VRRP virtual-router IDs.
//!
//! Each project owns the IDs it reserved. An ID is unique within its project
//! and always inside `VRRP_ID_MIN..=VRRP_ID_MAX`.

use cumulus_state::{Project, StateStore};
use tracing::{debug, info};

use crate::error::{NetError, NetResult};

pub const VRRP_ID_MIN: u8 = 1;
pub const VRRP_ID_MAX: u8 = 255;

/// Lowest ID not present in `used`.
pub fn lowest_free(used: &[u8]) -> Option<u8> {
    (VRRP_ID_MIN..=VRRP_ID_MAX).find(|id| !used.contains(id))
}

#[derive(Clone)]
pub struct VrrpPool {
    state: StateStore,
}

impl VrrpPool {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Reserve the lowest free ID of the project and persist it.
    pub fn allocate(&self, project_id: &str) -> NetResult<u8> {
        let mut project: Project = self.state.fetch(project_id)?;
        let id = lowest_free(&project.vrrp_ids)
            .ok_or_else(|| NetError::VrrpExhausted(project.name.clone()))?;
        project.vrrp_ids.push(id);
        self.state.update(&mut project)?;
        debug!(project = %project.name, vrrp_id = id, "VRRP id reserved");
        Ok(id)
    }

    /// Return an ID to the project's pool. Unknown IDs are ignored.
    pub fn release(&self, project_id: &str, id: u8) -> NetResult<()> {
        let mut project: Project = self.state.fetch(project_id)?;
        let before = project.vrrp_ids.len();
        project.vrrp_ids.retain(|v| *v != id);
        if project.vrrp_ids.len() != before {
            self.state.update(&mut project)?;
            info!(project = %project.name, vrrp_id = id, "VRRP id released");
        }
        Ok(())
    }
}
