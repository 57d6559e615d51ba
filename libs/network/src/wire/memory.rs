//! In-process wire pair

use super::{mark_disconnected, Wire, WireStatus};
use crate::broker::{MessageBroker, WireHandler};
use crate::config::WireConfig;
use crate::error::{Result, TransportError};
use crate::message::WireMessage;
use crate::transports::MetricsTracker;
use bytes::Bytes;
use codec::RdId;
use parking_lot::Mutex;
use reactive::{Lifetime, Property, Scheduler};
use std::sync::{Arc, Weak};
use tracing::trace;

/// One end of two cross-linked in-process wires
///
/// Every send goes through the real frame encoding before the peer's broker
/// dispatches it on the peer's scheduler.
pub struct InMemoryWire {
    name: String,
    broker: MessageBroker,
    status: Property<WireStatus>,
    peer: Mutex<Weak<InMemoryWire>>,
    max_message_size: usize,
    metrics: MetricsTracker,
}

impl InMemoryWire {
    /// Create two connected wires, each dispatching on its own scheduler
    pub fn pair(
        scheduler_a: Arc<dyn Scheduler>,
        scheduler_b: Arc<dyn Scheduler>,
        config: &WireConfig,
    ) -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self::new("memory-a", scheduler_a, config));
        let b = Arc::new(Self::new("memory-b", scheduler_b, config));
        *a.peer.lock() = Arc::downgrade(&b);
        *b.peer.lock() = Arc::downgrade(&a);
        (a, b)
    }

    fn new(name: &str, scheduler: Arc<dyn Scheduler>, config: &WireConfig) -> Self {
        Self {
            name: name.to_string(),
            broker: MessageBroker::new(scheduler, config),
            status: Property::new(WireStatus::Connected),
            peer: Mutex::new(Weak::new()),
            max_message_size: config.max_message_size,
            metrics: MetricsTracker::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    /// Cut the link in both directions
    pub fn disconnect(&self, reason: &str) {
        let peer = self.peer.lock().upgrade();
        mark_disconnected(&self.name, &self.status, reason);
        if let Some(peer) = peer {
            mark_disconnected(&peer.name, &peer.status, reason);
        }
    }
}

impl Wire for InMemoryWire {
    fn send(&self, id: RdId, payload: Bytes) -> Result<()> {
        if let WireStatus::Disconnected { reason } = self.status.get() {
            return Err(TransportError::disconnected(reason));
        }

        let Some(peer) = self.peer.lock().upgrade() else {
            mark_disconnected(&self.name, &self.status, "peer dropped");
            return Err(TransportError::disconnected("peer dropped"));
        };

        let frame = WireMessage::new(id, payload).to_wire_format();
        let frame_len = frame.len();
        let message = WireMessage::from_wire_format(frame, self.max_message_size)?;

        self.metrics.record_send(frame_len);
        peer.metrics.record_receive(frame_len);
        trace!(wire = %self.name, %id, bytes = message.payload.len(), "Sent in-memory frame");

        peer.broker.dispatch(message.id, message.payload);
        Ok(())
    }

    fn advise(&self, lifetime: &Lifetime, id: RdId, handler: WireHandler) {
        self.broker.advise(lifetime, id, handler);
    }

    fn status(&self) -> &Property<WireStatus> {
        &self.status
    }
}

impl std::fmt::Debug for InMemoryWire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryWire")
            .field("name", &self.name)
            .field("status", &self.status.get())
            .finish()
    }
}
