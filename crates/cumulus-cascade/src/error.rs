//! Cascade error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("state store error: {0}")]
    State(#[from] cumulus_state::StateError),
}

pub type CascadeResult<T> = Result<T, CascadeError>;
