//! Lifetime error types
//!
//! Errors raised while registering against, or unwinding, a lifetime scope.

use thiserror::Error;

/// Lifetime scope errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifetimeError {
    /// Mutation of a scope that has already started terminating
    #[error("Lifetime {lifetime_id} is already terminated")]
    AlreadyTerminated { lifetime_id: u32 },

    /// One or more cleanup actions panicked during termination
    #[error(
        "Lifetime {lifetime_id} terminated with {} failed cleanup action(s): {}",
        .failures.len(),
        .failures.join("; ")
    )]
    CleanupFailed {
        lifetime_id: u32,
        failures: Vec<String>,
    },
}

/// Result type alias for lifetime operations
pub type Result<T> = std::result::Result<T, LifetimeError>;

impl LifetimeError {
    /// Create an already-terminated error
    pub fn already_terminated(lifetime_id: u32) -> Self {
        Self::AlreadyTerminated { lifetime_id }
    }

    /// Create a cleanup-failed error
    pub fn cleanup_failed(lifetime_id: u32, failures: Vec<String>) -> Self {
        Self::CleanupFailed {
            lifetime_id,
            failures,
        }
    }

    /// Check if this error rejects a registration on a dead scope
    pub fn is_already_terminated(&self) -> bool {
        matches!(self, LifetimeError::AlreadyTerminated { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            LifetimeError::AlreadyTerminated { .. } => "already_terminated",
            LifetimeError::CleanupFailed { .. } => "cleanup_failed",
        }
    }
}
