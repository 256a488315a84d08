//! The duplex channel to one remote agent.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ConnectionError;

/// A live connection to an agent.
///
/// Implementations must make `terminated` resolve exactly when the channel
/// dies, whatever the cause (peer hang-up, transport failure, `close`).
#[async_trait]
pub trait AgentConnection: Send + Sync + 'static {
    /// Issue one RPC and wait for its reply.
    async fn call(&self, method: &str, params: Value) -> Result<Value, ConnectionError>;

    /// Resolves once the channel is dead.
    async fn terminated(&self);

    /// Tear the channel down. Idempotent.
    async fn close(&self);

    fn is_alive(&self) -> bool;
}
