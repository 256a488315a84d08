//! Agent registry and transport error types.

use thiserror::Error;

/// Failures of a single connection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("call {method} timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("no eligible agent for {method}")]
    NoEligibleAgent { method: String },

    #[error("handshake with agent {agent} failed: {source}")]
    Handshake {
        agent: String,
        source: ConnectionError,
    },

    #[error("agent not registered: {0}")]
    UnknownAgent(String),

    #[error("invalid reply to {method}: {message}")]
    InvalidReply { method: String, message: String },

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

pub type AgentResult<T> = Result<T, AgentError>;
