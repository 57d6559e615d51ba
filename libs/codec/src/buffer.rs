//! Serialization Buffer
//!
//! Growable byte buffer with a read cursor. Fixed-width values are
//! little-endian; strings and byte arrays carry an `i32` length prefix. Every
//! read is bounds-checked and reports the offset it failed at.

use crate::error::{CodecError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

#[derive(Clone, Default)]
pub struct Buffer {
    inner: BytesMut,
    offset: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
            offset: 0,
        }
    }

    /// Wrap received bytes for reading
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self {
            inner: BytesMut::from(bytes),
            offset: 0,
        }
    }

    /// Unread bytes, consuming the buffer
    pub fn freeze(self) -> Bytes {
        self.inner.freeze()
    }

    /// Unread bytes without consuming
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    pub fn remaining(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Bytes consumed by reads so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn ensure(&self, need: usize, context: &'static str) -> Result<()> {
        if self.inner.len() < need {
            return Err(CodecError::Truncated {
                need,
                remaining: self.inner.len(),
                offset: self.offset,
                context,
            });
        }
        Ok(())
    }

    fn consumed(&mut self, count: usize) {
        self.offset += count;
    }

    pub fn write_u8(&mut self, value: u8) {
        self.inner.put_u8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.inner.put_u8(value as u8);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.inner.put_i32_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.inner.put_i64_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.inner.put_u64_le(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.inner.put_f64_le(value);
    }

    /// Length-prefixed byte array. Fails past `i32::MAX` bytes.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        let length = length_prefix(value.len(), self.inner.len())?;
        self.inner.put_i32_le(length);
        self.inner.put_slice(value);
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Append raw bytes with no length prefix
    pub fn write_raw(&mut self, value: &[u8]) {
        self.inner.put_slice(value);
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1, "u8")?;
        self.consumed(1);
        Ok(self.inner.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let offset = self.offset;
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(CodecError::invalid_tag(tag, offset, "bool")),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4, "i32")?;
        self.consumed(4);
        Ok(self.inner.get_i32_le())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8, "i64")?;
        self.consumed(8);
        Ok(self.inner.get_i64_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8, "u64")?;
        self.consumed(8);
        Ok(self.inner.get_u64_le())
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        self.ensure(8, "f64")?;
        self.consumed(8);
        Ok(self.inner.get_f64_le())
    }

    pub fn read_bytes(&mut self) -> Result<Bytes> {
        let offset = self.offset;
        let length = self.read_i32()?;
        if length < 0 {
            return Err(CodecError::InvalidLength {
                length: length as i64,
                offset,
            });
        }
        let length = length as usize;
        self.ensure(length, "byte array")?;
        self.consumed(length);
        Ok(self.inner.split_to(length).freeze())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let offset = self.offset + 4;
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { offset })
    }
}

fn length_prefix(length: usize, offset: usize) -> Result<i32> {
    i32::try_from(length).map_err(|_| CodecError::InvalidLength {
        length: i64::try_from(length).unwrap_or(i64::MAX),
        offset,
    })
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("offset", &self.offset)
            .field("remaining", &self.inner.len())
            .finish()
    }
}

impl From<Bytes> for Buffer {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_layout_is_little_endian() {
        let mut buffer = Buffer::new();
        buffer.write_i32(1);
        buffer.write_i64(-2);
        assert_eq!(&buffer.as_slice()[..4], &[1, 0, 0, 0]);
        assert_eq!(buffer.remaining(), 12);

        assert_eq!(buffer.read_i32().unwrap(), 1);
        assert_eq!(buffer.read_i64().unwrap(), -2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.offset(), 12);
    }

    #[test]
    fn test_strings_are_length_prefixed() {
        let mut buffer = Buffer::new();
        buffer.write_string("héllo").unwrap();
        assert_eq!(&buffer.as_slice()[..4], &[6, 0, 0, 0]);
        assert_eq!(buffer.read_string().unwrap(), "héllo");
    }

    #[test]
    fn test_truncated_read_reports_context() {
        let mut buffer = Buffer::from_bytes(Bytes::from_static(&[1, 2, 3]));
        let err = buffer.read_i64().unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                need: 8,
                remaining: 3,
                offset: 0,
                context: "i64",
            }
        );
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut buffer = Buffer::new();
        buffer.write_i32(-5);
        assert_eq!(
            buffer.read_bytes().unwrap_err(),
            CodecError::InvalidLength {
                length: -5,
                offset: 0
            }
        );
    }

    #[test]
    fn test_invalid_utf8_and_bool() {
        let mut buffer = Buffer::new();
        buffer.write_bytes(&[0xff, 0xfe]).unwrap();
        buffer.write_u8(7);

        assert_eq!(
            buffer.read_string().unwrap_err(),
            CodecError::InvalidUtf8 { offset: 4 }
        );
        assert_eq!(
            buffer.read_bool().unwrap_err(),
            CodecError::invalid_tag(7, 6, "bool")
        );
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let too_long = i32::MAX as usize + 1;
        assert_eq!(
            length_prefix(too_long, 3).unwrap_err(),
            CodecError::InvalidLength {
                length: too_long as i64,
                offset: 3
            }
        );
        assert_eq!(length_prefix(i32::MAX as usize, 0).unwrap(), i32::MAX);
    }
}
