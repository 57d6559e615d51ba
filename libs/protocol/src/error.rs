//! Protocol errors
//!
//! Aggregates the lower layers' errors so entity and protocol APIs return one
//! type. Configuration problems carry the offending field when known.

use codec::{CodecError, RdId};
use network::TransportError;
use reactive::LifetimeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Lifetime(#[from] LifetimeError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("Failed to read {}: {source}", .path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start scheduler {name}: {source}")]
    Scheduler {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Entity used with the wire before being bound to a protocol
    #[error("Entity {id} is not bound to a protocol")]
    NotBound { id: RdId },

    #[error("Entity {id} is already bound")]
    AlreadyBound { id: RdId },
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Lifetime(e) => e.category(),
            Error::Codec(e) => e.category(),
            Error::Transport(e) => e.category(),
            Error::Configuration { .. } | Error::ConfigFile { .. } => "configuration",
            Error::Scheduler { .. } => "scheduler",
            Error::NotBound { .. } => "not_bound",
            Error::AlreadyBound { .. } => "already_bound",
        }
    }
}
