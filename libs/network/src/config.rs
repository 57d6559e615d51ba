//! Wire Configuration
//!
//! Limits shared by every wire and transport. Loaded from the `[wire]` table
//! of a protocol configuration file; every field has a default.

use crate::error::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transport and broker limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireConfig {
    /// Largest accepted frame payload in bytes
    pub max_message_size: usize,
    /// Messages buffered per id before it is advised; oldest dropped beyond this
    pub max_pending_per_id: usize,
    /// Distinct unadvised ids buffered at once; messages for new ids are dropped beyond this
    pub max_pending_ids: usize,
    /// TCP connect timeout
    pub connect_timeout_ms: u64,
    /// Transport receive timeout, 0 disables it
    pub receive_timeout_ms: u64,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024, // 16MB
            max_pending_per_id: 1024,
            max_pending_ids: 4096,
            connect_timeout_ms: 5_000,
            receive_timeout_ms: 0,
        }
    }
}

impl WireConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        (self.receive_timeout_ms > 0).then(|| Duration::from_millis(self.receive_timeout_ms))
    }

    /// Reject limits that would make every message fail
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(TransportError::configuration(
                "max_message_size must be greater than zero",
                Some("max_message_size"),
            ));
        }
        if self.max_message_size > u32::MAX as usize {
            return Err(TransportError::configuration(
                format!(
                    "max_message_size {} exceeds the u32 frame length limit",
                    self.max_message_size
                ),
                Some("max_message_size"),
            ));
        }
        if self.max_pending_per_id == 0 {
            return Err(TransportError::configuration(
                "max_pending_per_id must be greater than zero",
                Some("max_pending_per_id"),
            ));
        }
        if self.max_pending_ids == 0 {
            return Err(TransportError::configuration(
                "max_pending_ids must be greater than zero",
                Some("max_pending_ids"),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(TransportError::configuration(
                "connect_timeout_ms must be greater than zero",
                Some("connect_timeout_ms"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WireConfig::default();
        config.validate().unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.receive_timeout(), None);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = WireConfig {
            max_pending_per_id: 0,
            ..WireConfig::default()
        };
        match config.validate() {
            Err(TransportError::Configuration { field, .. }) => {
                assert_eq!(field.as_deref(), Some("max_pending_per_id"));
            }
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_pending_ids_rejected() {
        let config = WireConfig {
            max_pending_ids: 0,
            ..WireConfig::default()
        };
        match config.validate() {
            Err(TransportError::Configuration { field, .. }) => {
                assert_eq!(field.as_deref(), Some("max_pending_ids"));
            }
            other => panic!("Expected configuration error, got {:?}", other),
        }
    }
}
