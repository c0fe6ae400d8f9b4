//! Dispatch fan-out and lifecycle notifications.
//!
//! The session pushes every dispatch event onto a single-consumer channel.
//! A [`Dispatcher`] drains it and calls the handlers registered for the
//! event's name, then the catch-all handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::{GatewayError, HandlerError};

/// Registry key that matches every event.
pub const CATCH_ALL: &str = "*";

/// One dispatch event as delivered to handlers.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchEvent {
    /// Event name, e.g. `MESSAGE_CREATE`.
    pub name: String,
    /// Sequence number.
    pub seq: u64,
    /// Event body, verbatim.
    pub data: Value,
}

/// Session lifecycle notification, broadcast to every subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A transport opened.
    Connected {
        /// Connection generation.
        epoch: u64,
    },
    /// Identify sent.
    Identifying,
    /// Resume sent.
    Resuming,
    /// `READY` received.
    Ready {
        /// New session id.
        session_id: String,
    },
    /// `RESUMED` received.
    Resumed,
    /// The transport went away.
    Disconnected {
        /// Close code, if any.
        code: Option<u16>,
    },
    /// Replacing the connection.
    Reconnecting {
        /// Whether the next Hello will be answered with Resume.
        resume: bool,
    },
    /// Heartbeat round trip measured.
    HeartbeatAck {
        /// Round trip in milliseconds.
        latency_ms: u64,
    },
    /// Something went wrong and was recovered from.
    Fault(GatewayError),
    /// The session is closed.
    Closed,
}

/// Receives dispatch events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Identifies the handler in logs and for [`HandlerRegistry::unregister`].
    fn name(&self) -> &str;

    /// Handle one event.
    async fn handle(&self, event: &DispatchEvent) -> Result<(), HandlerError>;
}

/// Handlers keyed by event name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event` (or [`CATCH_ALL`]). Handlers for the
    /// same event run in registration order.
    pub fn register(&mut self, event: &str, handler: Arc<dyn EventHandler>) {
        debug!(event, handler = handler.name(), "registering event handler");
        self.handlers.entry(event.to_string()).or_default().push(handler);
    }

    /// Remove every registration of the handler called `name`. Returns
    /// whether anything was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let mut found = false;
        for handlers in self.handlers.values_mut() {
            let before = handlers.len();
            handlers.retain(|h| h.name() != name);
            found |= handlers.len() < before;
        }
        self.handlers.retain(|_, handlers| !handlers.is_empty());
        found
    }

    /// Handlers for `event`: exact matches first, then catch-alls.
    pub fn handlers_for(&self, event: &str) -> Vec<Arc<dyn EventHandler>> {
        let exact = self.handlers.get(event).into_iter().flatten();
        let catch_all = self.handlers.get(CATCH_ALL).into_iter().flatten();
        if event == CATCH_ALL {
            return exact.cloned().collect();
        }
        exact.chain(catch_all).cloned().collect()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drains the dispatch channel into a [`HandlerRegistry`].
pub struct Dispatcher {
    registry: HandlerRegistry,
    events: mpsc::UnboundedReceiver<DispatchEvent>,
}

impl Dispatcher {
    /// Wrap a registry and the receiver from
    /// [`GatewaySession::events`](crate::GatewaySession::events).
    pub fn new(registry: HandlerRegistry, events: mpsc::UnboundedReceiver<DispatchEvent>) -> Self {
        Self { registry, events }
    }

    /// Deliver events until the session drops its sender.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            let _ = self.dispatch(&event).await;
        }
        debug!("dispatch channel closed");
    }

    /// Deliver one event. Handler errors are logged, not propagated. Returns
    /// how many handlers ran.
    pub async fn dispatch(&self, event: &DispatchEvent) -> usize {
        let handlers = self.registry.handlers_for(&event.name);
        for handler in &handlers {
            if let Err(error) = handler.handle(event).await {
                warn!(
                    handler = handler.name(),
                    event = %event.name,
                    seq = event.seq,
                    %error,
                    "event handler failed"
                );
            }
        }
        handlers.len()
    }
}
