//! # Common Error Kinds
//!
//! The cross-subsystem error taxonomy. Individual crates define richer
//! errors and convert into these kinds at subsystem boundaries.

use thiserror::Error;

/// Disposition-level error kinds shared across subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Malformed wire data, bad signature, or out-of-range indices. The
    /// offending message is dropped; the connection stays open.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A lookup found no value; the caller may retry.
    #[error("not ready")]
    NotReady,

    /// The operation outlived its deadline.
    #[error("timeout")]
    Timeout,

    /// The surrounding scope was cancelled. Propagates silently.
    #[error("cancelled")]
    Cancelled,

    /// Unreadable persistent state or a violated invariant. The owning actor
    /// logs and terminates.
    #[error("fatal corruption: {0}")]
    FatalCorruption(String),
}

impl CoreError {
    #[must_use]
    pub fn proto(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation(reason.into())
    }

    /// Cancellation is a status, not a failure to report.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
