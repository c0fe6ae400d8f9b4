//! Gateway error types.

use thiserror::Error;

use tether_protocol::CodecError;

/// Everything that can go wrong in a gateway session.
///
/// Only `Connection`, `FatalClose` and `Closed` are returned from public
/// operations. The other kinds are recovered from internally and published as
/// [`LifecycleEvent::Fault`](crate::events::LifecycleEvent::Fault).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The transport could not be opened.
    #[error("connection failed: {0}")]
    Connection(String),

    /// An inbound frame failed to decode.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A well-formed frame arrived in a state that does not allow it.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The previous heartbeat was never acknowledged.
    #[error("zombie connection: heartbeat not acknowledged")]
    ZombieConnection,

    /// The server invalidated the session.
    #[error("session invalidated (resumable: {resumable})")]
    SessionInvalidated {
        /// Whether the server allowed a resume.
        resumable: bool,
    },

    /// Reading from or writing to an open transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server closed with a code that forbids reconnecting.
    #[error("gateway closed with fatal code {code}: {reason}")]
    FatalClose {
        /// WebSocket close code.
        code: u16,
        /// Close reason sent by the server.
        reason: String,
    },

    /// The session was closed locally.
    #[error("session closed")]
    Closed,
}

impl From<CodecError> for GatewayError {
    fn from(err: CodecError) -> Self {
        Self::MalformedFrame(err.to_string())
    }
}

/// Error returned by an [`EventHandler`](crate::events::EventHandler).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Build from anything printable.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
