//! TCP Transport
//!
//! Length-prefixed framing over a TCP stream:
//!
//! ```text
//! [len: u32 BE][message: len bytes]
//! ```
//!
//! The stream is split so a reader task and a writer task can run
//! concurrently without contending on one lock.

use super::{MetricsTracker, Transport, TransportInfo, TransportType};
use crate::config::WireConfig;
use crate::message::WIRE_HEADER_SIZE;
use crate::{Result, TransportError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

const LENGTH_PREFIX_SIZE: usize = 4;

struct WriteHalf {
    stream: OwnedWriteHalf,
    /// Reusable frame buffer
    buffer: BytesMut,
}

/// Framed TCP connection to one peer
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<WriteHalf>,
    peer_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    max_message_size: usize,
    healthy: AtomicBool,
    metrics: MetricsTracker,
}

impl TcpTransport {
    /// Connect to a listening peer
    pub async fn connect(addr: impl ToSocketAddrs, config: &WireConfig) -> Result<Self> {
        let timeout = config.connect_timeout();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::timeout("connect", timeout.as_millis() as u64))?
            .map_err(|e| TransportError::connection_with_source("Failed to connect", None, e))?;

        let transport = Self::from_stream(stream, config)?;
        info!(peer = %transport.peer_addr, "TCP transport connected");
        Ok(transport)
    }

    /// Accept one inbound connection
    pub async fn accept(listener: &TcpListener, config: &WireConfig) -> Result<Self> {
        let (stream, peer_addr) = listener.accept().await.map_err(|e| {
            TransportError::connection_with_source("Failed to accept connection", None, e)
        })?;

        let transport = Self::from_stream(stream, config)?;
        info!(peer = %peer_addr, "TCP transport accepted");
        Ok(transport)
    }

    /// Wrap an established stream
    pub fn from_stream(stream: TcpStream, config: &WireConfig) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr().ok();
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(WriteHalf {
                stream: writer,
                buffer: BytesMut::with_capacity(64 * 1024),
            }),
            peer_addr,
            local_addr,
            // Frames carry the wire header on top of the payload limit
            max_message_size: config.max_message_size.saturating_add(WIRE_HEADER_SIZE),
            healthy: AtomicBool::new(true),
            metrics: MetricsTracker::new(),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    fn fail(&self, error: std::io::Error, operation: &'static str) -> TransportError {
        self.healthy.store(false, Ordering::Release);
        self.metrics.record_error();
        warn!(peer = %self.peer_addr, operation, error = %error, "TCP transport failed");
        TransportError::from(error)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, message: &[u8]) -> Result<()> {
        if message.len() > self.max_message_size {
            return Err(TransportError::protocol(format!(
                "Message size {} exceeds maximum {}",
                message.len(),
                self.max_message_size
            )));
        }

        let mut writer = self.writer.lock().await;
        let WriteHalf { stream, buffer } = &mut *writer;

        buffer.clear();
        buffer.extend_from_slice(&(message.len() as u32).to_be_bytes());
        buffer.extend_from_slice(message);

        // Single write call for the whole frame
        stream
            .write_all(&buffer[..])
            .await
            .map_err(|e| self.fail(e, "write"))?;
        stream.flush().await.map_err(|e| self.fail(e, "flush"))?;

        self.metrics.record_send(LENGTH_PREFIX_SIZE + message.len());
        trace!(peer = %self.peer_addr, bytes = message.len(), "Sent frame over TCP");
        Ok(())
    }

    async fn receive(&self) -> Result<Bytes> {
        let mut reader = self.reader.lock().await;

        let mut len_bytes = [0u8; LENGTH_PREFIX_SIZE];
        reader
            .read_exact(&mut len_bytes)
            .await
            .map_err(|e| self.fail(e, "read length"))?;

        let message_len = u32::from_be_bytes(len_bytes) as usize;
        if message_len > self.max_message_size {
            self.healthy.store(false, Ordering::Release);
            return Err(TransportError::protocol(format!(
                "Message size {} exceeds maximum {}",
                message_len, self.max_message_size
            )));
        }

        let mut body = BytesMut::zeroed(message_len);
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| self.fail(e, "read body"))?;

        self.metrics.record_receive(LENGTH_PREFIX_SIZE + message_len);
        debug!(peer = %self.peer_addr, bytes = message_len, "Received frame over TCP");
        Ok(body.freeze())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    fn transport_info(&self) -> TransportInfo {
        TransportInfo {
            transport_type: TransportType::Tcp,
            local_address: self.local_addr.map(|addr| addr.to_string()),
            remote_address: Some(self.peer_addr.to_string()),
            metrics: self.metrics.snapshot(),
        }
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer_addr", &self.peer_addr)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}
