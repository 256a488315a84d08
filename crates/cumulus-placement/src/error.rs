//! Placement error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no candidate hosts: {0}")]
    NoHosts(String),

    #[error("no candidate zones: {0}")]
    NoZones(String),

    #[error("state store error: {0}")]
    State(#[from] cumulus_state::StateError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
