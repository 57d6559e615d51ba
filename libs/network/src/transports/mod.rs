//! Byte Transports
//!
//! A [`Transport`] moves opaque, already-framed messages between two peers.
//! Wires sit on top and add addressing, dispatch and connection state.

use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod channel;
pub mod metrics;
pub mod tcp;


pub use channel::ChannelTransport;
pub use metrics::{MetricsTracker, TransportMetrics};
pub use tcp::TcpTransport;

/// Duplex message transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message
    async fn send(&self, message: &[u8]) -> Result<()>;

    /// Receive the next message; `Disconnected` once the peer is gone
    async fn receive(&self) -> Result<Bytes>;

    /// Receive message with timeout
    async fn receive_timeout(&self, timeout: Duration) -> Result<Bytes> {
        tokio::time::timeout(timeout, self.receive())
            .await
            .map_err(|_| TransportError::timeout("receive", timeout.as_millis() as u64))?
    }

    /// Check if transport is healthy
    fn is_healthy(&self) -> bool;

    /// Get transport-specific information
    fn transport_info(&self) -> TransportInfo;
}

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    /// TCP network transport
    Tcp,
    /// In-process channel transport
    Channel,
}

/// Transport information for monitoring
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub transport_type: TransportType,
    pub local_address: Option<String>,
    pub remote_address: Option<String>,
    pub metrics: TransportMetrics,
}
