//! # tether-gateway
//!
//! Client side of one gateway session.
//!
//! - [`GatewaySession`]: the state machine. Owns the transport, the
//!   [`SessionState`] and the [`HeartbeatSupervisor`], and runs everything on
//!   one task via [`GatewaySession::run`].
//! - [`SessionHandle`]: cloneable remote control (`reconnect`, `close`,
//!   `status`) plus the lifecycle event feed.
//! - [`Dispatcher`] / [`HandlerRegistry`]: fan-out of dispatch events to
//!   handlers registered by event name.
//! - [`Connector`] / [`Transport`]: the seam to the wire. [`WsConnector`]
//!   speaks WebSocket, [`MemoryConnector`] is an in-process stand-in.
//!
//! Entity-bearing dispatch events update the shared
//! [`EntityCache`](tether_cache::EntityCache) before they reach handlers.

#![deny(unsafe_code)]

pub mod backoff;
pub mod dispatch;
pub mod errors;
pub mod events;
pub mod heartbeat;
pub mod session;
pub mod state;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use errors::{GatewayError, HandlerError, Result};
pub use events::{CATCH_ALL, DispatchEvent, Dispatcher, EventHandler, HandlerRegistry, LifecycleEvent};
pub use heartbeat::{HeartbeatSupervisor, TickAction};
pub use session::{GatewaySession, SessionHandle, SessionOptions};
pub use state::{Phase, SessionState, SessionStatus};
pub use transport::memory::{MemoryConnector, MemoryServer};
pub use transport::websocket::WsConnector;
pub use transport::{Connection, Connector, Transport, TransportEvent};
