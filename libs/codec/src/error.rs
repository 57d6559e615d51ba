//! Codec errors
//!
//! Each variant carries enough context to locate the failing field without a
//! debugger: the discriminator or type involved, and buffer state for reads.

use thiserror::Error;

/// Serialization and registry errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No serializer registered under the discriminator
    #[error("Unknown serializer for discriminator {discriminator:#018x}")]
    UnknownSerializer { discriminator: i64 },

    /// Polymorphic write of a type with no registered serializer
    #[error("Type {type_name} has no registered serializer")]
    UnregisteredType { type_name: String },

    /// Discriminator or type registered twice
    #[error("Duplicate serializer registration for {type_name} (discriminator {discriminator:#018x})")]
    DuplicateRegistration {
        discriminator: i64,
        type_name: String,
    },

    /// Value type does not match the type registered for the discriminator
    #[error("Type mismatch for discriminator {discriminator:#018x}: registered {registered}, requested {requested}")]
    TypeMismatch {
        discriminator: i64,
        registered: String,
        requested: String,
    },

    /// Read past the end of the buffer
    #[error("Truncated buffer: need {need} bytes at offset {offset}, {remaining} remaining (reading {context})")]
    Truncated {
        need: usize,
        remaining: usize,
        offset: usize,
        context: &'static str,
    },

    /// String payload is not valid UTF-8
    #[error("Invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// Negative or oversized length prefix
    #[error("Invalid length prefix {length} at offset {offset}")]
    InvalidLength { length: i64, offset: usize },

    /// Unknown tag byte for an enumerated value
    #[error("Invalid tag {tag} for {context} at offset {offset}")]
    InvalidTag {
        tag: u8,
        offset: usize,
        context: &'static str,
    },
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;

impl CodecError {
    pub fn unknown_serializer(discriminator: i64) -> Self {
        Self::UnknownSerializer { discriminator }
    }

    pub fn unregistered_type(type_name: impl Into<String>) -> Self {
        Self::UnregisteredType {
            type_name: type_name.into(),
        }
    }

    pub fn duplicate_registration(discriminator: i64, type_name: impl Into<String>) -> Self {
        Self::DuplicateRegistration {
            discriminator,
            type_name: type_name.into(),
        }
    }

    pub fn type_mismatch(
        discriminator: i64,
        registered: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            discriminator,
            registered: registered.into(),
            requested: requested.into(),
        }
    }

    pub fn invalid_tag(tag: u8, offset: usize, context: &'static str) -> Self {
        Self::InvalidTag {
            tag,
            offset,
            context,
        }
    }

    /// Errors caused by malformed input rather than local misuse
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            CodecError::Truncated { .. }
                | CodecError::InvalidUtf8 { .. }
                | CodecError::InvalidLength { .. }
                | CodecError::InvalidTag { .. }
                | CodecError::UnknownSerializer { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CodecError::UnknownSerializer { .. } => "unknown_serializer",
            CodecError::UnregisteredType { .. } => "unregistered_type",
            CodecError::DuplicateRegistration { .. } => "duplicate_registration",
            CodecError::TypeMismatch { .. } => "type_mismatch",
            CodecError::Truncated { .. } => "truncated",
            CodecError::InvalidUtf8 { .. } => "invalid_utf8",
            CodecError::InvalidLength { .. } => "invalid_length",
            CodecError::InvalidTag { .. } => "invalid_tag",
        }
    }
}
