//! In-process agent connection for tests.
//!
//! Answers `Capabilities` with its configured method list, records every
//! call and replies with scripted results (`null` by default).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::connection::AgentConnection;
use crate::error::ConnectionError;
use crate::methods;

type Handler = Arc<dyn Fn(&Value) -> Result<Value, ConnectionError> + Send + Sync>;

pub struct FakeConnection {
    methods: Vec<String>,
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<(String, Value)>>,
    alive: AtomicBool,
    closed: watch::Sender<bool>,
}

impl FakeConnection {
    /// A connection advertising `methods`.
    pub fn new(methods: &[&str]) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            methods: methods.iter().map(|m| m.to_string()).collect(),
            handlers: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            alive: AtomicBool::new(true),
            closed,
        })
    }

    /// A connection advertising the whole method catalog.
    pub fn full() -> Arc<Self> {
        Self::new(methods::ALL)
    }

    /// Script the reply to `method`.
    pub fn handle(
        &self,
        method: &str,
        handler: impl Fn(&Value) -> Result<Value, ConnectionError> + Send + Sync + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.to_string(), Arc::new(handler));
    }

    /// Always answer `method` with `reply`.
    pub fn respond(&self, method: &str, reply: Value) {
        self.handle(method, move |_| Ok(reply.clone()));
    }

    /// Make `method` fail with a remote error.
    pub fn fail(&self, method: &str, message: &str) {
        let message = message.to_string();
        self.handle(method, move |_| {
            Err(ConnectionError::Remote {
                code: 500,
                message: message.clone(),
            })
        });
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    /// Flip liveness without terminating the channel.
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Simulate the peer dropping the connection.
    pub fn hang_up(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

#[async_trait]
impl AgentConnection for FakeConnection {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ConnectionError> {
        if !self.is_alive() {
            return Err(ConnectionError::Closed);
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((method.to_string(), params.clone()));

        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned();
        match handler {
            Some(handler) => handler(&params),
            None if method == methods::CAPABILITIES => Ok(json!({
                "methods": self.methods,
                "version": "1.0",
            })),
            None => Ok(Value::Null),
        }
    }

    async fn terminated(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }

    async fn close(&self) {
        self.hang_up();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
