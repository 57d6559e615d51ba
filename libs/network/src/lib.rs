//! Network Infrastructure
//!
//! Moves addressed payloads between the two peers of a protocol.
//!
//! ## Layers
//!
//! - **Transports** ([`Transport`]): raw framed byte delivery over TCP or an
//!   in-process channel
//! - **Framing** ([`WireMessage`]): `[id: i64 LE][len: u32 LE][payload]`
//! - **Broker** ([`MessageBroker`]): id-to-handler dispatch on a scheduler,
//!   buffering messages that arrive before their id is advised
//! - **Wires** ([`Wire`]): [`InMemoryWire`] pairs and the transport-driven
//!   [`SocketWire`], each exposing its [`WireStatus`]
//!
//! Reconnection and handshakes are left to the owner of the wire.

pub mod broker;
pub mod config;
pub mod error;
pub mod message;
pub mod transports;
pub mod wire;

pub use broker::{MessageBroker, WireHandler};
pub use config::WireConfig;
pub use error::{Result, TransportError};
pub use message::{WireMessage, WIRE_HEADER_SIZE};
pub use transports::{
    ChannelTransport, MetricsTracker, TcpTransport, Transport, TransportInfo, TransportMetrics,
    TransportType,
};
pub use wire::{InMemoryWire, SocketWire, Wire, WireStatus};
