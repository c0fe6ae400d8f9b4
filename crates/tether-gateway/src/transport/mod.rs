//! The seam between the session and the wire.
//!
//! A [`Connector`] opens a [`Connection`]: a write half ([`Transport`]) and a
//! stream of [`TransportEvent`]s. The session spawns one reader task per
//! connection that drains the stream.

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::errors::Result;

/// Something the read half of a connection produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    Text(String),
    /// The peer closed the connection, or the stream ended.
    Closed {
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// The read half failed.
    Error(String),
}

impl TransportEvent {
    /// Whether nothing more will follow this event.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Text(_))
    }
}

/// Write half of an open connection.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Close with a WebSocket close code.
    async fn close(&mut self, code: u16) -> Result<()>;
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`. Fails with
    /// [`GatewayError::Connection`](crate::errors::GatewayError::Connection).
    async fn open(&self, url: &str) -> Result<Connection>;
}

/// An open connection.
pub struct Connection {
    /// Write half.
    pub transport: Box<dyn Transport>,
    /// Read half.
    pub inbound: BoxStream<'static, TransportEvent>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}
