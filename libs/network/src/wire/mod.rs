//! Wires
//!
//! A [`Wire`] carries addressed payloads between the two peers of a protocol.
//! Outbound sends are ordered; inbound payloads are dispatched on the wire's
//! scheduler to the handler advised for their id. Connection state is a
//! [`Property`] so loss of the peer is observable rather than looking like
//! silence.

mod memory;
mod socket;

pub use memory::InMemoryWire;
pub use socket::SocketWire;

use crate::broker::WireHandler;
use crate::error::Result;
use bytes::Bytes;
use codec::RdId;
use reactive::{Lifetime, Property};
use std::fmt;
use tracing::{info, warn};

/// Connection state of a wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireStatus {
    Connecting,
    Connected,
    Disconnected { reason: String },
}

impl WireStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, WireStatus::Connected)
    }
}

impl fmt::Display for WireStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireStatus::Connecting => f.write_str("connecting"),
            WireStatus::Connected => f.write_str("connected"),
            WireStatus::Disconnected { reason } => write!(f, "disconnected ({})", reason),
        }
    }
}

/// Addressed, ordered message channel to the remote peer
pub trait Wire: Send + Sync {
    /// Queue `payload` for the entity `id` on the remote side
    ///
    /// Sends from one thread arrive in the order they were made.
    fn send(&self, id: RdId, payload: Bytes) -> Result<()>;

    /// Deliver inbound payloads for `id` to `handler` until `lifetime` terminates
    fn advise(&self, lifetime: &Lifetime, id: RdId, handler: WireHandler);

    fn status(&self) -> &Property<WireStatus>;

    fn is_connected(&self) -> bool {
        self.status().get().is_connected()
    }
}

/// Move a wire to `Disconnected`, logging only the first transition
pub(crate) fn mark_disconnected(wire: &str, status: &Property<WireStatus>, reason: impl Into<String>) {
    if matches!(status.get(), WireStatus::Disconnected { .. }) {
        return;
    }
    let reason = reason.into();
    warn!(wire, reason = %reason, "Wire disconnected");
    status.set(WireStatus::Disconnected { reason });
}

pub(crate) fn mark_connected(wire: &str, status: &Property<WireStatus>) {
    if status.set(WireStatus::Connected) {
        info!(wire, "Wire connected");
    }
}
