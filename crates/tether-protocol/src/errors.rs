//! Codec error types.

use thiserror::Error;

/// A frame could not be translated.
///
/// Every variant describes a malformed frame. The session layer drops such
/// frames with a warning, they are never fatal.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The text was not a JSON object.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The object had no `op` field.
    #[error("malformed frame: missing opcode")]
    MissingOpcode,

    /// The `op` value is not part of the protocol.
    #[error("malformed frame: unknown opcode {0}")]
    UnknownOpcode(u64),

    /// The payload does not have the shape its opcode requires.
    #[error("malformed {op} payload: {reason}")]
    InvalidPayload {
        /// Opcode name of the offending frame.
        op: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

impl CodecError {
    pub(crate) fn invalid(op: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            op,
            reason: reason.into(),
        }
    }
}
