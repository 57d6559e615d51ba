//! Transport-backed wire
//!
//! Two tokio tasks drive the transport: a writer draining an unbounded queue
//! of outbound frames, and a reader decoding inbound frames into the broker.
//! Any I/O failure moves the wire to `Disconnected` and stops both directions.
//! Reconnection is left to the owner.

use super::{mark_connected, mark_disconnected, Wire, WireStatus};
use crate::broker::{MessageBroker, WireHandler};
use crate::config::WireConfig;
use crate::error::{Result, TransportError};
use crate::message::WireMessage;
use crate::transports::{MetricsTracker, Transport};
use bytes::Bytes;
use codec::RdId;
use parking_lot::Mutex;
use reactive::{Lifetime, Property, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const WIRE_NAME: &str = "socket";

pub struct SocketWire {
    broker: Arc<MessageBroker>,
    status: Arc<Property<WireStatus>>,
    outbound: mpsc::UnboundedSender<WireMessage>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    max_message_size: usize,
    metrics: MetricsTracker,
}

impl SocketWire {
    /// Start driving `transport` on the current tokio runtime
    pub fn spawn<T>(transport: T, scheduler: Arc<dyn Scheduler>, config: &WireConfig) -> Result<Arc<Self>>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            TransportError::configuration(format!("SocketWire requires a tokio runtime: {}", e), None)
        })?;

        let transport: Arc<dyn Transport> = Arc::new(transport);
        let broker = Arc::new(MessageBroker::new(scheduler, config));
        let status = Arc::new(Property::new(WireStatus::Connecting));
        let metrics = MetricsTracker::new();
        let (outbound, queue) = mpsc::unbounded_channel();

        // Connected before the tasks start so an early failure is never overwritten
        mark_connected(WIRE_NAME, &status);

        let writer = runtime.spawn(run_writer(
            Arc::clone(&transport),
            queue,
            Arc::clone(&status),
            metrics.clone(),
        ));
        let reader = runtime.spawn(run_reader(
            transport,
            Arc::clone(&broker),
            Arc::clone(&status),
            metrics.clone(),
            config.max_message_size,
            config.receive_timeout(),
        ));

        Ok(Arc::new(Self {
            broker,
            status,
            outbound,
            tasks: Mutex::new(vec![writer, reader]),
            max_message_size: config.max_message_size,
            metrics,
        }))
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    pub fn broker(&self) -> &MessageBroker {
        &self.broker
    }

    /// Stop both tasks and mark the wire disconnected
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        mark_disconnected(WIRE_NAME, &self.status, "shutdown");
    }
}

async fn run_writer(
    transport: Arc<dyn Transport>,
    mut queue: mpsc::UnboundedReceiver<WireMessage>,
    status: Arc<Property<WireStatus>>,
    metrics: MetricsTracker,
) {
    while let Some(message) = queue.recv().await {
        let frame = message.to_wire_format();
        if let Err(e) = transport.send(&frame).await {
            metrics.record_error();
            mark_disconnected(WIRE_NAME, &status, e.to_string());
            return;
        }
        metrics.record_send(frame.len());
    }
    debug!("Socket wire writer stopped");
}

async fn run_reader(
    transport: Arc<dyn Transport>,
    broker: Arc<MessageBroker>,
    status: Arc<Property<WireStatus>>,
    metrics: MetricsTracker,
    max_message_size: usize,
    receive_timeout: Option<Duration>,
) {
    loop {
        let received = match receive_timeout {
            Some(timeout) => transport.receive_timeout(timeout).await,
            None => transport.receive().await,
        };

        let frame = match received {
            Ok(frame) => frame,
            Err(e) => {
                metrics.record_error();
                mark_disconnected(WIRE_NAME, &status, e.to_string());
                return;
            }
        };

        metrics.record_receive(frame.len());
        match WireMessage::from_wire_format(frame, max_message_size) {
            Ok(message) => broker.dispatch(message.id, message.payload),
            Err(e) => {
                metrics.record_error();
                warn!(error = %e, "Malformed frame, closing wire");
                mark_disconnected(WIRE_NAME, &status, e.to_string());
                return;
            }
        }
    }
}

impl Wire for SocketWire {
    fn send(&self, id: RdId, payload: Bytes) -> Result<()> {
        if let WireStatus::Disconnected { reason } = self.status.get() {
            return Err(TransportError::disconnected(reason));
        }
        if payload.len() > self.max_message_size {
            return Err(TransportError::protocol(format!(
                "Message size {} exceeds maximum {}",
                payload.len(),
                self.max_message_size
            )));
        }

        self.outbound
            .send(WireMessage::new(id, payload))
            .map_err(|_| TransportError::disconnected("writer stopped"))
    }

    fn advise(&self, lifetime: &Lifetime, id: RdId, handler: WireHandler) {
        self.broker.advise(lifetime, id, handler);
    }

    fn status(&self) -> &Property<WireStatus> {
        &self.status
    }
}

impl Drop for SocketWire {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for SocketWire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketWire")
            .field("status", &self.status.get())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}
