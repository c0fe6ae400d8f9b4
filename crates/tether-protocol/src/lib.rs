//! # tether-protocol
//!
//! Wire-level vocabulary of the gateway protocol:
//!
//! - [`OpCode`]: the control opcodes, with values fixed by the protocol
//! - [`GatewayFrame`]: tagged union over the eight control messages
//! - [`decode`] / [`encode`]: pure translation between JSON text and frames
//! - [`CodecError`]: why a frame could not be decoded
//!
//! Nothing here holds state or retries. Callers decide what to do with a
//! frame that fails to decode.

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod frame;
pub mod opcode;

pub use codec::{decode, encode};
pub use errors::CodecError;
pub use frame::{ConnectionProperties, GatewayFrame, HelloPayload, IdentifyPayload, ResumePayload};
pub use opcode::OpCode;
