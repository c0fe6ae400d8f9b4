//! Gateway control opcodes.

use std::fmt;

use crate::errors::CodecError;

/// Control opcode carried in the `op` field of every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Server -> client named event with a sequence number.
    Dispatch = 0,
    /// Liveness proof carrying the last sequence. Also sent by the server to
    /// request an immediate beat.
    Heartbeat = 1,
    /// Start a new session.
    Identify = 2,
    /// Continue a prior session.
    Resume = 6,
    /// Server asks the client to reconnect.
    Reconnect = 7,
    /// Session is invalid; payload says whether it can be resumed.
    InvalidSession = 9,
    /// First frame on a connection, carries the heartbeat interval.
    Hello = 10,
    /// Acknowledges the last heartbeat.
    HeartbeatAck = 11,
}

impl OpCode {
    /// Numeric wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Heartbeat => "heartbeat",
            Self::Identify => "identify",
            Self::Resume => "resume",
            Self::Reconnect => "reconnect",
            Self::InvalidSession => "invalid_session",
            Self::Hello => "hello",
            Self::HeartbeatAck => "heartbeat_ack",
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dispatch),
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Identify),
            6 => Ok(Self::Resume),
            7 => Ok(Self::Reconnect),
            9 => Ok(Self::InvalidSession),
            10 => Ok(Self::Hello),
            11 => Ok(Self::HeartbeatAck),
            other => Err(CodecError::UnknownOpcode(u64::from(other))),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u8())
    }
}
