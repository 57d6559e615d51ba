//! In-process Channel Transport
//!
//! Two cross-connected tokio channels. Behaves like a socket pair without
//! touching the network, which keeps wire tests hermetic.

use super::{MetricsTracker, Transport, TransportInfo, TransportType};
use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<Bytes>,
    receiver: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    healthy: AtomicBool,
    metrics: MetricsTracker,
}

impl ChannelTransport {
    /// Create two connected endpoints
    pub fn pair() -> (Self, Self) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        (Self::new(left_tx, right_rx), Self::new(right_tx, left_rx))
    }

    fn new(sender: mpsc::UnboundedSender<Bytes>, receiver: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            sender,
            receiver: Mutex::new(receiver),
            healthy: AtomicBool::new(true),
            metrics: MetricsTracker::new(),
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: &[u8]) -> Result<()> {
        self.sender
            .send(Bytes::copy_from_slice(message))
            .map_err(|_| {
                self.healthy.store(false, Ordering::Release);
                TransportError::disconnected("channel peer dropped")
            })?;
        self.metrics.record_send(message.len());
        trace!(bytes = message.len(), "Sent frame over channel");
        Ok(())
    }

    async fn receive(&self) -> Result<Bytes> {
        match self.receiver.lock().await.recv().await {
            Some(message) => {
                self.metrics.record_receive(message.len());
                Ok(message)
            }
            None => {
                self.healthy.store(false, Ordering::Release);
                Err(TransportError::disconnected("channel peer dropped"))
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    fn transport_info(&self) -> TransportInfo {
        TransportInfo {
            transport_type: TransportType::Channel,
            local_address: None,
            remote_address: None,
            metrics: self.metrics.snapshot(),
        }
    }
}
