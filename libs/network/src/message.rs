//! Wire Message Framing
//!
//! One frame per entity delivery:
//!
//! ```text
//! [id: i64 LE][len: u32 LE][payload: len bytes]
//! ```
//!
//! The payload layout belongs to the entity that owns the id.

use crate::error::{Result, TransportError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use codec::RdId;

/// Size of the id and length header
pub const WIRE_HEADER_SIZE: usize = 12;

/// Addressed payload travelling between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub id: RdId,
    pub payload: Bytes,
}

impl WireMessage {
    pub fn new(id: RdId, payload: Bytes) -> Self {
        Self { id, payload }
    }

    /// Total encoded size
    pub fn wire_size(&self) -> usize {
        WIRE_HEADER_SIZE + self.payload.len()
    }

    pub fn to_wire_format(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(self.wire_size());
        frame.put_i64_le(self.id.value());
        frame.put_u32_le(self.payload.len() as u32);
        frame.extend_from_slice(&self.payload);
        frame.freeze()
    }

    /// Decode exactly one frame; trailing bytes are an error
    pub fn from_wire_format(mut frame: Bytes, max_message_size: usize) -> Result<Self> {
        if frame.len() < WIRE_HEADER_SIZE {
            return Err(TransportError::protocol(format!(
                "Frame too small: need {} header bytes, got {}",
                WIRE_HEADER_SIZE,
                frame.len()
            )));
        }

        let id = RdId::of(frame.get_i64_le());
        let length = frame.get_u32_le() as usize;
        if length > max_message_size {
            return Err(TransportError::protocol(format!(
                "Message size {} exceeds maximum {}",
                length, max_message_size
            )));
        }
        if frame.len() != length {
            return Err(TransportError::protocol(format!(
                "Frame length mismatch for id {}: header says {}, body has {}",
                id,
                length,
                frame.len()
            )));
        }

        Ok(Self { id, payload: frame })
    }
}
