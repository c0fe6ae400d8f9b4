//! In-process connector.
//!
//! Every successful [`MemoryConnector::open`] hands the far end of the new
//! connection to whoever holds the accept receiver, as a [`MemoryServer`].
//! Tests script the server side with it; dropping a `MemoryServer` looks like
//! the peer going away.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc as stream_mpsc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use tether_protocol::{GatewayFrame, decode, encode};

use super::{Connection, Connector, Transport, TransportEvent};
use crate::errors::{GatewayError, Result};

/// What the client wrote to a memory connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// A text frame.
    Text(String),
    /// A close with the given code.
    Close(u16),
}

/// Connector whose connections terminate in [`MemoryServer`]s.
#[derive(Debug)]
pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<MemoryServer>,
    failures: Mutex<VecDeque<String>>,
    dialed: Mutex<Vec<String>>,
}

impl MemoryConnector {
    /// Create a connector and the receiver that yields server halves.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryServer>) {
        let (accept, servers) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accept,
            failures: Mutex::new(VecDeque::new()),
            dialed: Mutex::new(Vec::new()),
        });
        (connector, servers)
    }

    /// Make the next `count` opens fail with a connection error.
    pub fn fail_next(&self, count: usize) {
        let mut failures = self.failures.lock();
        for _ in 0..count {
            failures.push_back("connection refused".to_string());
        }
    }

    /// Every URL passed to `open`, in order, including failed attempts.
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, url: &str) -> Result<Connection> {
        self.dialed.lock().push(url.to_string());
        if let Some(reason) = self.failures.lock().pop_front() {
            return Err(GatewayError::Connection(format!("{url}: {reason}")));
        }

        let (to_client, inbound) = stream_mpsc::unbounded();
        let (to_server, outbound) = mpsc::unbounded_channel();
        let server = MemoryServer {
            url: url.to_string(),
            to_client,
            outbound,
        };
        self.accept
            .send(server)
            .map_err(|_| GatewayError::Connection(format!("{url}: nobody accepting")))?;
        debug!(url, "memory connection opened");

        Ok(Connection {
            transport: Box::new(MemoryTransport { to_server }),
            inbound: inbound.boxed(),
        })
    }
}

struct MemoryTransport {
    to_server: mpsc::UnboundedSender<ClientMessage>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        self.to_server
            .send(ClientMessage::Text(text))
            .map_err(|_| GatewayError::Transport("peer hung up".into()))
    }

    async fn close(&mut self, code: u16) -> Result<()> {
        self.to_server
            .send(ClientMessage::Close(code))
            .map_err(|_| GatewayError::Transport("peer hung up".into()))
    }
}

/// Server end of one memory connection.
#[derive(Debug)]
pub struct MemoryServer {
    /// URL the client dialed.
    pub url: String,
    to_client: stream_mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
}

impl MemoryServer {
    /// Push a raw text frame to the client. Returns `false` if the client
    /// half is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(TransportEvent::Text(text.into()))
    }

    /// Encode and push a frame.
    pub fn send_frame(&self, frame: &GatewayFrame) -> bool {
        match encode(frame) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    /// Close the connection from the server side.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.push(TransportEvent::Closed {
            code: Some(code),
            reason: reason.to_string(),
        })
    }

    /// Fail the client's read half.
    pub fn fail(&self, error: &str) -> bool {
        self.push(TransportEvent::Error(error.to_string()))
    }

    /// Next thing the client wrote, or `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.outbound.recv().await
    }

    /// Next frame the client sent. `None` on close, hang-up, or an
    /// undecodable frame.
    pub async fn recv_frame(&mut self) -> Option<GatewayFrame> {
        match self.recv().await? {
            ClientMessage::Text(text) => decode(&text).ok(),
            ClientMessage::Close(_) => None,
        }
    }

    /// Whatever the client has written so far without waiting.
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn push(&self, event: TransportEvent) -> bool {
        self.to_client.unbounded_send(event).is_ok()
    }
}
