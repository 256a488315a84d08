//! cumulus-agents: the execution fabric of remote agents.
//!
//! Hypervisor, network and controller agents dial in over a WebSocket and
//! answer JSON-RPC calls. The registry tracks which agents are live and
//! dispatches calls to one of a set of candidate agents.
//!
//! # Architecture
//!
//! ```text
//! AgentRegistry
//!   ├── register(kind, id, connection)
//!   │   ├── Capabilities handshake (first registration only)
//!   │   ├── watcher task per session (reaps on termination)
//!   │   └── registration hook (async side effects)
//!   └── dispatch(candidates, method, params)
//!       └── uniform random choice among eligible agents
//!
//! AgentConnection (trait)
//!   └── RpcChannel: JSON-RPC 2.0 multiplexed over text frames
//!       └── ws::attach: pumps frames to/from an axum WebSocket
//! ```

pub mod channel;
pub mod connection;
pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod methods;
pub mod protocol;
pub mod registry;
pub mod ws;

pub use channel::RpcChannel;
pub use connection::AgentConnection;
pub use error::{AgentError, AgentResult, ConnectionError};
pub use registry::{AgentInfo, AgentRegistry, BoxFuture, RegistrationHook};
