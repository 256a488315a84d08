//! Agent registry: tracks live agent connections and dispatches RPCs.
//!
//! Each registration starts a new session with its own watcher task. The
//! watcher waits for the connection to die (or for an explicit stop) and
//! then removes the registry entry, but only if the entry still belongs to
//! its session: a reconnecting agent is never reaped by the watcher of the
//! connection it replaced.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError};

use cumulus_state::AgentKind;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::connection::AgentConnection;
use crate::error::{AgentError, AgentResult, ConnectionError};
use crate::methods::{self, CapabilitiesReply};

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked after every successful registration with the agent id and kind.
pub type RegistrationHook = Arc<dyn Fn(String, AgentKind) -> BoxFuture + Send + Sync>;

/// A registered agent session.
struct AgentHandle {
    id: String,
    kind: AgentKind,
    connection: Arc<dyn AgentConnection>,
    methods: Vec<String>,
    version: String,
    session: u64,
    online: AtomicBool,
    stop: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl AgentHandle {
    fn is_live(&self) -> bool {
        self.online.load(Ordering::SeqCst) && self.connection.is_alive()
    }

    fn advertises(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    /// Wake the watcher. Idempotent.
    fn stop_watcher(&self) {
        self.online.store(false, Ordering::SeqCst);
        let stop = self
            .stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = stop {
            let _ = tx.send(());
        }
    }

    fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id.clone(),
            kind: self.kind,
            methods: self.methods.clone(),
            version: self.version.clone(),
            session: self.session,
            online: self.is_live(),
        }
    }
}

/// Snapshot of a registered agent.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentInfo {
    pub id: String,
    pub kind: AgentKind,
    pub methods: Vec<String>,
    pub version: String,
    pub session: u64,
    pub online: bool,
}

/// Registry of connected agents. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: Arc<Mutex<HashMap<String, Arc<AgentHandle>>>>,
    sessions: Arc<AtomicU64>,
    hook: Arc<OnceLock<RegistrationHook>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the registration hook. Only the first call has an effect.
    pub fn set_hook(&self, hook: RegistrationHook) {
        if self.hook.set(hook).is_err() {
            warn!("registration hook already installed");
        }
    }

    /// Register a connection for an agent identity.
    ///
    /// A first registration learns the agent's method list through the
    /// `Capabilities` call; if that fails the connection is closed and the
    /// error returned. Re-registering a known identity replaces its
    /// connection and keeps the known method list.
    pub async fn register(
        &self,
        kind: AgentKind,
        id: &str,
        connection: Arc<dyn AgentConnection>,
    ) -> AgentResult<()> {
        let previous = self.agents.lock().await.get(id).cloned();

        let (methods, version) = match &previous {
            Some(prev) => (prev.methods.clone(), prev.version.clone()),
            None => match handshake(connection.as_ref()).await {
                Ok(reply) => (reply.methods, reply.version),
                Err(source) => {
                    connection.close().await;
                    warn!(agent_id = %id, error = %source, "agent handshake failed");
                    return Err(AgentError::Handshake {
                        agent: id.to_string(),
                        source,
                    });
                }
            },
        };

        let session = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = Arc::new(AgentHandle {
            id: id.to_string(),
            kind,
            connection,
            methods,
            version,
            session,
            online: AtomicBool::new(true),
            stop: std::sync::Mutex::new(Some(stop_tx)),
        });

        let replaced = self
            .agents
            .lock()
            .await
            .insert(id.to_string(), handle.clone());

        if let Some(old) = replaced {
            old.stop_watcher();
            old.connection.close().await;
            info!(agent_id = %id, old_session = old.session, session, "agent connection replaced");
        } else {
            info!(
                agent_id = %id,
                %kind,
                version = %handle.version,
                methods = handle.methods.len(),
                session,
                "agent registered"
            );
        }

        tokio::spawn(watch_connection(self.agents.clone(), handle, stop_rx));

        if let Some(hook) = self.hook.get() {
            tokio::spawn(hook(id.to_string(), kind));
        }
        Ok(())
    }

    /// Drop an agent: stop its watcher, close its connection and remove it.
    /// Returns false if it was not registered.
    pub async fn disconnect(&self, id: &str) -> bool {
        let Some(handle) = self.agents.lock().await.remove(id) else {
            return false;
        };
        handle.stop_watcher();
        handle.connection.close().await;
        info!(agent_id = %id, session = handle.session, "agent disconnected");
        true
    }

    /// Call `method` on one eligible agent among `candidates`.
    ///
    /// An agent is eligible when it is registered, advertises the method and
    /// its connection is live. The agent is chosen uniformly at random. The
    /// call error, if any, is returned as is; there is no retry.
    pub async fn dispatch(&self, candidates: &[String], method: &str, params: Value) -> AgentResult<Value> {
        let chosen = {
            let agents = self.agents.lock().await;
            let eligible: Vec<&Arc<AgentHandle>> = agents
                .values()
                .filter(|h| candidates.iter().any(|c| c == &h.id))
                .filter(|h| h.advertises(method) && h.is_live())
                .collect();
            eligible.choose(&mut rand::thread_rng()).map(|h| Arc::clone(h))
        };

        let Some(agent) = chosen else {
            debug!(%method, ?candidates, "no eligible agent");
            return Err(AgentError::NoEligibleAgent {
                method: method.to_string(),
            });
        };

        debug!(agent_id = %agent.id, %method, "dispatching call");
        Ok(agent.connection.call(method, params).await?)
    }

    /// Dispatch and decode the reply.
    pub async fn dispatch_as<T: DeserializeOwned>(
        &self,
        candidates: &[String],
        method: &str,
        params: impl Serialize,
    ) -> AgentResult<T> {
        let params = serde_json::to_value(params).map_err(|e| AgentError::InvalidReply {
            method: method.to_string(),
            message: format!("cannot encode params: {e}"),
        })?;
        let reply = self.dispatch(candidates, method, params).await?;
        serde_json::from_value(reply).map_err(|e| AgentError::InvalidReply {
            method: method.to_string(),
            message: e.to_string(),
        })
    }

    pub async fn is_connected(&self, id: &str) -> bool {
        self.agents
            .lock()
            .await
            .get(id)
            .is_some_and(|h| h.is_live())
    }

    /// Whether at least one of `ids` is connected.
    pub async fn any_connected(&self, ids: &[String]) -> bool {
        let agents = self.agents.lock().await;
        ids.iter()
            .any(|id| agents.get(id).is_some_and(|h| h.is_live()))
    }

    pub async fn get(&self, id: &str) -> Option<AgentInfo> {
        self.agents.lock().await.get(id).map(|h| h.info())
    }

    /// Snapshot of every registered agent, sorted by id.
    pub async fn connected(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self
            .agents
            .lock()
            .await
            .values()
            .map(|h| h.info())
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }
}

async fn handshake(connection: &dyn AgentConnection) -> Result<CapabilitiesReply, ConnectionError> {
    let reply = connection.call(methods::CAPABILITIES, Value::Null).await?;
    serde_json::from_value(reply).map_err(|e| ConnectionError::Protocol(e.to_string()))
}

/// Wait for the session to end, then reap its registry entry.
async fn watch_connection(
    agents: Arc<Mutex<HashMap<String, Arc<AgentHandle>>>>,
    handle: Arc<AgentHandle>,
    stop: oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = handle.connection.terminated() => {
            debug!(agent_id = %handle.id, session = handle.session, "agent connection terminated");
        }
        _ = stop => {
            debug!(agent_id = %handle.id, session = handle.session, "agent watcher stopped");
        }
    }
    handle.online.store(false, Ordering::SeqCst);

    let mut agents = agents.lock().await;
    let owned = agents
        .get(&handle.id)
        .is_some_and(|current| current.session == handle.session);
    if owned {
        agents.remove(&handle.id);
        info!(agent_id = %handle.id, session = handle.session, "agent went offline");
    }
}
