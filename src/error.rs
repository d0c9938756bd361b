//! Store-level error taxonomy and per-dispatch outcomes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Error reported by one store for one dispatch attempt.
///
/// These never reach callers directly: the coordinator absorbs them into the
/// ledger and surfaces them only through a terminal operation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreError {
    /// Network failure or timeout; the write may be retried.
    #[error("transient store error: {message}")]
    Transient {
        /// Store-provided detail.
        message: String,
    },
    /// A unique key already exists.
    ///
    /// `idempotent` is true when the existing row is exactly what this write
    /// would have produced, in which case the write counts as applied.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        /// Store-provided detail.
        message: String,
        /// Whether the conflicting row equals the intended one.
        idempotent: bool,
    },
    /// A row this write depends on does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was missing.
        message: String,
    },
    /// The payload can never be accepted by this store.
    #[error("rejected payload: {message}")]
    Rejected {
        /// Why the payload was refused.
        message: String,
    },
    /// An inverse write failed.
    #[error("compensation failed: {message}")]
    CompensationFailure {
        /// Last inverse-write error.
        message: String,
    },
    /// Retry budget ran out.
    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Error text of the final attempt.
        last: String,
    },
    /// The sub-task was never (re)dispatched because its operation stopped.
    #[error("aborted: {message}")]
    Aborted {
        /// Reason for the abort.
        message: String,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::Transient`].
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Shorthand for [`StoreError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Shorthand for [`StoreError::Rejected`].
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    /// Shorthand for [`StoreError::Aborted`].
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// True only for errors worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// True for errors that abort dependents without touching retry budget.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Terminal result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The write (or read) took effect. Carries the store output: the looked
    /// up row for reads, or the pre-image needed to undo a write.
    Succeeded(Value),
    /// Try again later.
    FailedRetryable(StoreError),
    /// Do not try again.
    FailedPermanent(StoreError),
}

impl Outcome {
    /// Classifies an adapter result.
    ///
    /// An idempotent constraint violation means an earlier attempt of the same
    /// insert already landed. It succeeds with an empty pre-image, so a later
    /// rollback still removes the row.
    pub fn from_result(result: Result<Value, StoreError>) -> Self {
        match result {
            Ok(output) => Self::Succeeded(output),
            Err(StoreError::ConstraintViolation {
                idempotent: true, ..
            }) => Self::Succeeded(json!({ "previous": Value::Null })),
            Err(err) if err.is_retryable() => Self::FailedRetryable(err),
            Err(err) => Self::FailedPermanent(err),
        }
    }

    /// True for [`Outcome::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}
