//! Runtime event stream payloads.

use crate::types::{MutationSeq, OperationId, Phase, Target};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// A new operation was opened and its intent made durable.
    Accepted {
        operation_id: OperationId,
    },
    /// One attempt was handed to a store worker.
    Dispatched {
        operation_id: OperationId,
        target: Target,
        phase: Phase,
        /// Attempt number within `phase`.
        attempt: u32,
    },
    /// A store worker reported back.
    SubTaskSettled {
        operation_id: OperationId,
        target: Target,
        phase: Phase,
        succeeded: bool,
    },
    /// Every store applied the operation.
    Committed {
        operation_id: OperationId,
    },
    /// The operation failed and was fully undone.
    RolledBack {
        operation_id: OperationId,
    },
    /// The operation failed and left stores needing reconciliation.
    Abandoned {
        operation_id: OperationId,
    },
    /// Persistence has reached at least this journal sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        seq: MutationSeq,
    },
}
