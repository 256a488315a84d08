//! RpcChannel: JSON-RPC multiplexing over a duplex frame stream.
//!
//! The channel is transport-agnostic: it consumes inbound text frames from
//! an mpsc receiver and produces outbound frames on another. A transport
//! (see [`crate::ws`]) pumps those frames to and from the wire. Concurrent
//! calls are matched to their replies by request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::connection::AgentConnection;
use crate::error::ConnectionError;
use crate::protocol::{Request, Response};

/// Buffered outbound frames before `call` waits on the writer.
const OUTBOUND_BUFFER: usize = 64;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ConnectionError>>>>>;

pub struct RpcChannel {
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    pending: Pending,
    next_id: AtomicU64,
    timeout: Duration,
    alive: Arc<AtomicBool>,
    closed: Arc<watch::Sender<bool>>,
}

impl RpcChannel {
    /// Build a channel reading replies from `inbound`.
    ///
    /// Returns the channel and the receiver of outbound frames. The channel
    /// dies when `inbound` ends or when it is closed, whichever comes first.
    pub fn new(inbound: mpsc::Receiver<String>, timeout: Duration) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (closed, _) = watch::channel(false);

        let channel = Arc::new(Self {
            outbound: Mutex::new(Some(outbound_tx)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            timeout,
            alive: Arc::new(AtomicBool::new(true)),
            closed: Arc::new(closed),
        });

        tokio::spawn(read_loop(
            inbound,
            channel.pending.clone(),
            channel.alive.clone(),
            channel.closed.clone(),
        ));

        (channel, outbound_rx)
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|c| *c).await;
}

/// Route replies to their callers until the inbound stream ends.
async fn read_loop(
    mut inbound: mpsc::Receiver<String>,
    pending: Pending,
    alive: Arc<AtomicBool>,
    closed: Arc<watch::Sender<bool>>,
) {
    let mut closed_rx = closed.subscribe();
    loop {
        let frame = tokio::select! {
            frame = inbound.recv() => frame,
            _ = wait_closed(&mut closed_rx) => None,
        };
        let Some(frame) = frame else { break };

        let reply: Response = match serde_json::from_str(&frame) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame from agent");
                continue;
            }
        };
        let waiter = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&reply.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply.into_result());
            }
            None => debug!(id = reply.id, "reply for unknown or expired call"),
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Dropping the waiters fails every outstanding call with `Closed`.
    pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
    closed.send_replace(true);
    debug!("rpc channel terminated");
}

#[async_trait]
impl AgentConnection for RpcChannel {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ConnectionError> {
        if !self.is_alive() {
            return Err(ConnectionError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&Request::new(id, method, params))
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            self.forget(id);
            return Err(ConnectionError::Closed);
        };
        if sender.send(frame).await.is_err() {
            self.forget(id);
            return Err(ConnectionError::Closed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Err(_) => {
                self.forget(id);
                Err(ConnectionError::Timeout {
                    method: method.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }

    async fn terminated(&self) {
        wait_closed(&mut self.closed.subscribe()).await;
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        // Dropping the sender ends the transport's writer.
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.closed.send_replace(true);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
