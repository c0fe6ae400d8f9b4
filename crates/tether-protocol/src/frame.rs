//! Typed control frames and their payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::opcode::OpCode;

/// One decoded gateway frame.
///
/// Each variant carries only the fields valid for its opcode.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayFrame {
    /// Named event plus its sequence number.
    Dispatch {
        /// Sequence number assigned by the server.
        seq: u64,
        /// Event name, e.g. `MESSAGE_CREATE`.
        event: String,
        /// Event body.
        data: Value,
    },
    /// Liveness proof carrying the last sequence seen (`None` before any
    /// dispatch).
    Heartbeat {
        /// Last sequence number.
        seq: Option<u64>,
    },
    /// New session request.
    Identify(IdentifyPayload),
    /// Resume a prior session.
    Resume(ResumePayload),
    /// Server requests a reconnect.
    Reconnect,
    /// Session is invalid.
    InvalidSession {
        /// Whether the session may still be resumed.
        resumable: bool,
    },
    /// Connection greeting.
    Hello(HelloPayload),
    /// Heartbeat acknowledgement.
    HeartbeatAck,
}

impl GatewayFrame {
    /// The opcode this frame is sent under.
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Dispatch { .. } => OpCode::Dispatch,
            Self::Heartbeat { .. } => OpCode::Heartbeat,
            Self::Identify(_) => OpCode::Identify,
            Self::Resume(_) => OpCode::Resume,
            Self::Reconnect => OpCode::Reconnect,
            Self::InvalidSession { .. } => OpCode::InvalidSession,
            Self::Hello(_) => OpCode::Hello,
            Self::HeartbeatAck => OpCode::HeartbeatAck,
        }
    }
}

/// Payload of [`OpCode::Hello`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Interval between heartbeats, in milliseconds.
    pub heartbeat_interval: u64,
}

/// Client description sent with Identify.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    /// Operating system.
    pub os: String,
    /// Library or client name.
    pub browser: String,
    /// Device name.
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "tether".to_string(),
            device: "tether".to_string(),
        }
    }
}

/// Payload of [`OpCode::Identify`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token.
    pub token: String,
    /// Gateway intents bitfield.
    pub intents: u64,
    /// Client description.
    pub properties: ConnectionProperties,
    /// Member count above which offline members are not sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u32>,
}

// Tokens never reach logs.
impl fmt::Debug for IdentifyPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifyPayload")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("properties", &self.properties)
            .field("large_threshold", &self.large_threshold)
            .finish()
    }
}

/// Payload of [`OpCode::Resume`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token.
    pub token: String,
    /// Session being resumed.
    pub session_id: String,
    /// Last sequence number received.
    pub seq: u64,
}

impl fmt::Debug for ResumePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumePayload")
            .field("token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq)
            .finish()
    }
}
