//! Ledger mutation model and persistence wrappers.

use serde::{Deserialize, Serialize};

use crate::{
    core::{
        ledger::{LedgerEntry, OperationPhase},
        subtask::SubTask,
    },
    operation::OperationResult,
    types::{MutationSeq, OperationId, TimestampMs},
};

/// Version number for serialized [`StoredMutationEnvelope`] payloads.
pub const MUTATION_FORMAT_VERSION: u16 = 1;

/// Immutable ledger change appended to the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerMutation {
    /// A new entry was accepted. Carries the full intent record.
    Opened {
        /// Entry as opened, all sub-tasks pending.
        entry: LedgerEntry,
    },
    /// A sub-task changed. Carries its complete post-state.
    SubTaskRecorded {
        operation_id: OperationId,
        subtask: SubTask,
    },
    /// The coordinator moved the entry to a non-terminal phase.
    PhaseChanged {
        operation_id: OperationId,
        phase: OperationPhase,
    },
    /// The entry reached a terminal phase and was archived.
    Finalized {
        operation_id: OperationId,
        phase: OperationPhase,
        /// Result returned to callers and to re-submissions.
        result: OperationResult,
        at_ms: TimestampMs,
    },
}

impl LedgerMutation {
    /// Operation the mutation belongs to.
    pub fn operation_id(&self) -> &OperationId {
        match self {
            Self::Opened { entry } => &entry.operation.operation_id,
            Self::SubTaskRecorded { operation_id, .. }
            | Self::PhaseChanged { operation_id, .. }
            | Self::Finalized { operation_id, .. } => operation_id,
        }
    }

    /// Small integer stored alongside the payload for ad-hoc queries.
    pub fn kind_code(&self) -> i64 {
        match self {
            Self::Opened { .. } => 1,
            Self::SubTaskRecorded { .. } => 2,
            Self::PhaseChanged { .. } => 3,
            Self::Finalized { .. } => 4,
        }
    }
}

/// Journal row metadata plus mutation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMutation {
    pub seq: MutationSeq,
    /// Mutation timestamp in milliseconds.
    pub ts_ms: TimestampMs,
    pub mutation: LedgerMutation,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMutationEnvelope {
    pub format_version: u16,
    pub stored: StoredMutation,
}

impl StoredMutationEnvelope {
    /// Constructs an envelope using [`MUTATION_FORMAT_VERSION`].
    pub fn new(stored: StoredMutation) -> Self {
        Self {
            format_version: MUTATION_FORMAT_VERSION,
            stored,
        }
    }
}
