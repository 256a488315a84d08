//! Address management error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("no free address left in subnet {0}")]
    AddressExhausted(String),

    #[error("no free VRRP id left in project {0}")]
    VrrpExhausted(String),

    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),

    #[error("MAC address {mac} already used in subnet {subnet}")]
    DuplicateMac { mac: String, subnet: String },

    #[error("state store error: {0}")]
    State(#[from] cumulus_state::StateError),
}

pub type NetResult<T> = Result<T, NetError>;
