//! Error types for the harness.

use thiserror::Error;

use crate::operation::OperationId;

/// Result type alias using [`HarnessError`].
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Top-level error type for all harness errors.
///
/// `InvalidArgument`, `EmptySequence`, `Stalled` and `InvalidState` mean the
/// harness itself was misused. They are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// An argument was outside its allowed range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A draw was requested from an entropy sequence with no values.
    #[error("Entropy sequence is empty: configure at least one value before drawing")]
    EmptySequence,

    /// An awaited operation settled in failure.
    #[error("Operation {operation} rejected: {reason}")]
    OperationRejected {
        /// The operation that rejected.
        operation: OperationId,
        /// Rejection reason supplied by the settling code.
        reason: String,
    },

    /// The timer queue drained before the awaited condition held.
    #[error("Virtual clock stalled at {now}ms: no scheduled callbacks left to fire")]
    Stalled {
        /// Virtual time at which the queue drained.
        now: u64,
    },

    /// The harness was driven into a state it refuses to continue from.
    #[error("Invalid harness state: {0}")]
    InvalidState(String),
}

impl HarnessError {
    /// Build an [`HarnessError::OperationRejected`].
    pub fn rejected(operation: OperationId, reason: impl Into<String>) -> Self {
        Self::OperationRejected {
            operation,
            reason: reason.into(),
        }
    }

    /// Whether this error reports a rejected operation rather than harness misuse.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::OperationRejected { .. })
    }
}
