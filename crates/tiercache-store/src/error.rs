//! Backing store error types.
//!
//! Only two failure classes cross the store boundary: the store could not be
//! reached (or dropped the connection), or an operation exceeded its bound.

use std::time::Duration;

/// Errors returned by a [`BackingStore`](crate::BackingStore).
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Connection refused, dropped, or the command failed on the wire.
    #[error("Backing store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The operation did not complete within its bound.
    #[error("Backing store operation '{operation}' timed out after {after:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
        /// The bound that was exceeded.
        after: Duration,
    },
}

impl StoreError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Returns `true` if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Short label used for metrics and log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "remote_unavailable",
            Self::Timeout { .. } => "remote_timeout",
        }
    }
}
