use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Outcome, StoreError},
    types::{OperationId, StoreKind, Target},
};

/// Dispatch status of one sub-task (or of its compensation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Handed to a store worker.
    InFlight,
    /// Store applied the write.
    Succeeded,
    /// Last attempt failed; a retry may follow.
    FailedRetryable,
    /// Will never be attempted again.
    FailedPermanent,
}

impl SubTaskStatus {
    /// Succeeded and FailedPermanent are never left.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedPermanent)
    }

    /// Allowed status moves. Everything else is rejected by the ledger.
    pub fn can_transition_to(self, next: SubTaskStatus) -> bool {
        use SubTaskStatus::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (Pending, FailedPermanent)
                | (InFlight, Succeeded)
                | (InFlight, FailedRetryable)
                | (InFlight, FailedPermanent)
                | (FailedRetryable, InFlight)
                | (FailedRetryable, FailedPermanent)
        )
    }
}

/// Progress of the inverse write for a succeeded sub-task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationProgress {
    /// Compensation status; uses the same transition rules as the forward write.
    pub status: SubTaskStatus,
    /// Inverse-write attempts made so far.
    pub attempt_count: u32,
    /// Last inverse-write error.
    pub last_error: Option<StoreError>,
}

/// One store-targeted unit of work belonging to an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    /// Owning operation (back-reference).
    pub operation_id: OperationId,
    /// Write this sub-task performs.
    pub target: Target,
    /// Targets that must succeed before this one is dispatched.
    pub depends_on: Vec<Target>,
    /// Forward status.
    pub status: SubTaskStatus,
    /// Forward attempts made so far.
    pub attempt_count: u32,
    /// Last forward error.
    pub last_error: Option<StoreError>,
    /// Store output of the successful attempt.
    pub output: Option<Value>,
    /// Inverse write progress, once compensation started.
    pub compensation: Option<CompensationProgress>,
}

impl SubTask {
    /// New pending sub-task.
    pub fn new(operation_id: OperationId, target: Target, depends_on: Vec<Target>) -> Self {
        Self {
            operation_id,
            target,
            depends_on,
            status: SubTaskStatus::Pending,
            attempt_count: 0,
            last_error: None,
            output: None,
            compensation: None,
        }
    }

    /// Store role of the target.
    pub fn store_kind(&self) -> StoreKind {
        self.target.store()
    }

    /// True when the sub-task mutated its store. Reads never need undoing.
    pub fn needs_compensation(&self) -> bool {
        self.status == SubTaskStatus::Succeeded && !self.target.is_read()
    }

    /// Compensation status, if compensation started.
    pub fn compensation_status(&self) -> Option<SubTaskStatus> {
        self.compensation.as_ref().map(|c| c.status)
    }
}

/// Change requested through [`crate::core::ledger::Ledger::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubTaskUpdate {
    /// Forward attempt handed to a worker.
    Dispatched,
    /// Forward attempt finished.
    Settled(Outcome),
    /// Never to be dispatched again.
    Aborted(StoreError),
    /// Inverse attempt handed to a worker.
    CompensationDispatched,
    /// Inverse attempt finished.
    CompensationSettled(Outcome),
}

pub(crate) fn status_of(outcome: &Outcome) -> SubTaskStatus {
    match outcome {
        Outcome::Succeeded(_) => SubTaskStatus::Succeeded,
        Outcome::FailedRetryable(_) => SubTaskStatus::FailedRetryable,
        Outcome::FailedPermanent(_) => SubTaskStatus::FailedPermanent,
    }
}
