use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    compensate::ReconciliationEntry,
    core::{
        plan::build_subtasks,
        subtask::{status_of, CompensationProgress, SubTask, SubTaskStatus, SubTaskUpdate},
    },
    error::{Outcome, StoreError},
    journal::{LedgerMutation, StoredMutation},
    operation::{Operation, OperationResult},
    types::{now_ms, MutationSeq, OperationId, Phase, Target, TimestampMs},
};

/// Coordinator phase of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    /// Entry accepted, nothing dispatched.
    Open,
    /// Sub-tasks are being dispatched and retried.
    Dispatching,
    /// A sub-task failed permanently; applied stores are being undone.
    Compensating,
    /// Every sub-task succeeded.
    Committed,
    /// Every applied store was undone.
    RolledBack,
    /// Some applied store could not be undone.
    Abandoned,
}

impl OperationPhase {
    /// Committed, RolledBack and Abandoned.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Abandoned)
    }

    /// Allowed phase moves.
    pub fn can_transition_to(self, next: OperationPhase) -> bool {
        use OperationPhase::*;
        matches!(
            (self, next),
            (Open, Dispatching)
                | (Open, Compensating)
                | (Dispatching, Committed)
                | (Dispatching, Compensating)
                | (Compensating, RolledBack)
                | (Compensating, Abandoned)
        )
    }
}

/// State derived from sub-task statuses and the terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    /// Nothing applied yet.
    Open,
    /// Some, not all, sub-tasks applied.
    PartiallyApplied,
    /// Every sub-task applied.
    Committed,
    /// Every applied sub-task was undone.
    RolledBack,
    /// An applied sub-task could not be undone.
    Abandoned,
}

/// Ledger record of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Accepted operation.
    pub operation: Operation,
    /// Coordinator phase.
    pub phase: OperationPhase,
    /// Sub-tasks in template order.
    pub subtasks: Vec<SubTask>,
    /// Terminal result, once finalized.
    pub result: Option<OperationResult>,
    /// Acceptance time.
    pub opened_at_ms: TimestampMs,
    /// Finalization time.
    pub finalized_at_ms: Option<TimestampMs>,
}

impl LedgerEntry {
    /// Idempotency key of the entry.
    pub fn operation_id(&self) -> &OperationId {
        &self.operation.operation_id
    }

    /// Sub-task for `target`, if the target applies to this operation.
    pub fn subtask(&self, target: Target) -> Option<&SubTask> {
        self.subtasks.iter().find(|s| s.target == target)
    }

    /// Derived operation state.
    pub fn state(&self) -> OperationState {
        match self.phase {
            OperationPhase::RolledBack => return OperationState::RolledBack,
            OperationPhase::Abandoned => return OperationState::Abandoned,
            _ => {}
        }
        if self.all_succeeded() {
            OperationState::Committed
        } else if self
            .subtasks
            .iter()
            .any(|s| s.status == SubTaskStatus::Succeeded)
        {
            OperationState::PartiallyApplied
        } else {
            OperationState::Open
        }
    }

    /// True once the phase is terminal.
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// True when every sub-task succeeded.
    pub fn all_succeeded(&self) -> bool {
        !self.subtasks.is_empty()
            && self
                .subtasks
                .iter()
                .all(|s| s.status == SubTaskStatus::Succeeded)
    }

    /// Pending sub-tasks whose prerequisites all succeeded.
    pub fn ready_targets(&self) -> Vec<Target> {
        self.subtasks
            .iter()
            .filter(|s| s.status == SubTaskStatus::Pending)
            .filter(|s| {
                s.depends_on.iter().all(|dep| {
                    self.subtask(*dep)
                        .is_none_or(|d| d.status == SubTaskStatus::Succeeded)
                })
            })
            .map(|s| s.target)
            .collect()
    }

    /// Transitive dependents of `target` that have not been dispatched yet.
    pub fn pending_dependents(&self, target: Target) -> Vec<Target> {
        let mut out: Vec<Target> = Vec::new();
        let mut frontier = vec![target];
        while let Some(current) = frontier.pop() {
            for s in &self.subtasks {
                if s.depends_on.contains(&current) && !out.contains(&s.target) {
                    out.push(s.target);
                    frontier.push(s.target);
                }
            }
        }
        out.retain(|t| {
            self.subtask(*t)
                .is_some_and(|s| s.status == SubTaskStatus::Pending)
        });
        out
    }

    /// True while any forward write is with a worker.
    pub fn any_in_flight(&self) -> bool {
        self.subtasks
            .iter()
            .any(|s| s.status == SubTaskStatus::InFlight)
    }

    /// First permanent failure that was not an abort, for reporting.
    pub fn first_failure(&self) -> Option<(Target, &StoreError)> {
        let failed = || {
            self.subtasks
                .iter()
                .filter(|s| s.status == SubTaskStatus::FailedPermanent)
                .filter_map(|s| s.last_error.as_ref().map(|e| (s.target, e)))
        };
        failed()
            .find(|(_, e)| !matches!(e, StoreError::Aborted { .. }))
            .or_else(|| failed().next())
    }

    /// Outputs of the succeeded prerequisites of `target`.
    pub fn prerequisite_outputs(&self, target: Target) -> Vec<(Target, Value)> {
        let Some(subtask) = self.subtask(target) else {
            return Vec::new();
        };
        subtask
            .depends_on
            .iter()
            .filter_map(|dep| self.subtask(*dep))
            .filter_map(|d| d.output.clone().map(|out| (d.target, out)))
            .collect()
    }
}

/// Ledger operation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The operation id was never opened.
    #[error("unknown operation {0}")]
    UnknownOperation(OperationId),
    /// The operation id is already in the ledger.
    #[error("operation {0} already opened")]
    AlreadyOpen(OperationId),
    /// The entry is archived and can no longer change.
    #[error("operation {0} already finalized")]
    AlreadyFinalized(OperationId),
    /// The target does not apply to the operation.
    #[error("operation {operation_id} has no sub-task for {target}")]
    UnknownSubTask {
        /// Owning operation.
        operation_id: OperationId,
        /// Requested target.
        target: Target,
    },
    /// Non-monotonic status change.
    #[error("illegal {phase:?} transition for {operation_id}/{target}: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Owning operation.
        operation_id: OperationId,
        /// Sub-task target.
        target: Target,
        /// Forward write or compensation.
        phase: Phase,
        /// Current status.
        from: SubTaskStatus,
        /// Requested status.
        to: SubTaskStatus,
    },
    /// Phase change not allowed by the coordinator state machine.
    #[error("illegal phase change for {operation_id}: {from:?} -> {to:?}")]
    IllegalPhase {
        /// Owning operation.
        operation_id: OperationId,
        /// Current phase.
        from: OperationPhase,
        /// Requested phase.
        to: OperationPhase,
    },
}

/// Serializable image of the whole ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshotV1 {
    /// Next journal sequence to assign.
    pub next_seq: MutationSeq,
    /// Entries still in progress, sorted by id.
    pub active: Vec<LedgerEntry>,
    /// Terminal entries, sorted by id.
    pub archived: Vec<LedgerEntry>,
}

/// Authoritative in-memory ledger, journaled mutation by mutation.
///
/// Only the coordinator mutates it. Every successful mutation is appended to
/// an internal pending list that the runtime drains into the persistence sink.
#[derive(Debug, Default)]
pub struct Ledger {
    active: HashMap<OperationId, LedgerEntry>,
    archived: HashMap<OperationId, LedgerEntry>,
    pending: Vec<StoredMutation>,
    next_seq: MutationSeq,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            ..Self::default()
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshotV1) -> Self {
        let mut ledger = Self {
            next_seq: snapshot.next_seq.max(1),
            ..Self::default()
        };
        for entry in snapshot.active {
            ledger.active.insert(entry.operation_id().clone(), entry);
        }
        for entry in snapshot.archived {
            ledger.archived.insert(entry.operation_id().clone(), entry);
        }
        ledger
    }

    pub fn export_snapshot(&self) -> LedgerSnapshotV1 {
        let mut active: Vec<LedgerEntry> = self.active.values().cloned().collect();
        active.sort_by(|a, b| a.operation_id().cmp(b.operation_id()));
        let mut archived: Vec<LedgerEntry> = self.archived.values().cloned().collect();
        archived.sort_by(|a, b| a.operation_id().cmp(b.operation_id()));
        LedgerSnapshotV1 {
            next_seq: self.next_seq,
            active,
            archived,
        }
    }

    /// Accepts a new operation and records its intent with all sub-tasks pending.
    pub fn open(&mut self, operation: Operation) -> Result<&LedgerEntry, LedgerError> {
        let id = operation.operation_id.clone();
        if self.contains(&id) {
            return Err(LedgerError::AlreadyOpen(id));
        }
        let entry = LedgerEntry {
            subtasks: build_subtasks(&operation),
            operation,
            phase: OperationPhase::Open,
            result: None,
            opened_at_ms: now_ms(),
            finalized_at_ms: None,
        };
        self.commit(LedgerMutation::Opened { entry })?;
        self.active.get(&id).ok_or(LedgerError::UnknownOperation(id))
    }

    /// Records one sub-task change, rejecting non-monotonic transitions.
    pub fn record(
        &mut self,
        operation_id: &OperationId,
        target: Target,
        update: SubTaskUpdate,
    ) -> Result<&SubTask, LedgerError> {
        let entry = self.active_entry(operation_id)?;
        let current = entry
            .subtask(target)
            .ok_or_else(|| LedgerError::UnknownSubTask {
                operation_id: operation_id.clone(),
                target,
            })?
            .clone();
        let next = advance(current, update)?;
        self.commit(LedgerMutation::SubTaskRecorded {
            operation_id: operation_id.clone(),
            subtask: next,
        })?;
        self.active
            .get(operation_id)
            .and_then(|e| e.subtask(target))
            .ok_or_else(|| LedgerError::UnknownSubTask {
                operation_id: operation_id.clone(),
                target,
            })
    }

    /// Moves an active entry to a non-terminal phase.
    pub fn set_phase(
        &mut self,
        operation_id: &OperationId,
        phase: OperationPhase,
    ) -> Result<(), LedgerError> {
        let from = self.active_entry(operation_id)?.phase;
        if phase.is_terminal() || !from.can_transition_to(phase) {
            return Err(LedgerError::IllegalPhase {
                operation_id: operation_id.clone(),
                from,
                to: phase,
            });
        }
        self.commit(LedgerMutation::PhaseChanged {
            operation_id: operation_id.clone(),
            phase,
        })
    }

    /// Stores the terminal result and archives the entry.
    pub fn finalize(
        &mut self,
        operation_id: &OperationId,
        result: OperationResult,
    ) -> Result<&LedgerEntry, LedgerError> {
        let from = self.active_entry(operation_id)?.phase;
        let to = match &result {
            OperationResult::Committed(_) => OperationPhase::Committed,
            OperationResult::RolledBack(_) => OperationPhase::RolledBack,
            OperationResult::Abandoned(_) => OperationPhase::Abandoned,
            OperationResult::Accepted(_) => from,
        };
        if !to.is_terminal() || !from.can_transition_to(to) {
            return Err(LedgerError::IllegalPhase {
                operation_id: operation_id.clone(),
                from,
                to,
            });
        }
        self.commit(LedgerMutation::Finalized {
            operation_id: operation_id.clone(),
            phase: to,
            result,
            at_ms: now_ms(),
        })?;
        self.archived
            .get(operation_id)
            .ok_or_else(|| LedgerError::UnknownOperation(operation_id.clone()))
    }

    /// Cloned entry, active or archived.
    pub fn snapshot(&self, operation_id: &OperationId) -> Result<LedgerEntry, LedgerError> {
        self.get(operation_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownOperation(operation_id.clone()))
    }

    pub fn get(&self, operation_id: &OperationId) -> Option<&LedgerEntry> {
        self.active
            .get(operation_id)
            .or_else(|| self.archived.get(operation_id))
    }

    pub fn contains(&self, operation_id: &OperationId) -> bool {
        self.active.contains_key(operation_id) || self.archived.contains_key(operation_id)
    }

    pub fn is_active(&self, operation_id: &OperationId) -> bool {
        self.active.contains_key(operation_id)
    }

    /// Ids of in-progress entries, sorted.
    pub fn active_ids(&self) -> Vec<OperationId> {
        let mut ids: Vec<OperationId> = self.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// In-progress entries, sorted by id.
    pub fn active_entries(&self) -> Vec<&LedgerEntry> {
        let mut entries: Vec<&LedgerEntry> = self.active.values().collect();
        entries.sort_by(|a, b| a.operation_id().cmp(b.operation_id()));
        entries
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn archived_len(&self) -> usize {
        self.archived.len()
    }

    /// Abandoned operations, oldest first.
    pub fn reconciliation_report(&self) -> Vec<ReconciliationEntry> {
        let mut out: Vec<ReconciliationEntry> = self
            .archived
            .values()
            .filter_map(|e| match &e.result {
                Some(OperationResult::Abandoned(entry)) => Some(entry.clone()),
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| {
            a.abandoned_at_ms
                .cmp(&b.abandoned_at_ms)
                .then_with(|| a.operation_id.cmp(&b.operation_id))
        });
        out
    }

    pub fn drain_pending(&mut self) -> Vec<StoredMutation> {
        std::mem::take(&mut self.pending)
    }

    pub fn latest_seq(&self) -> MutationSeq {
        self.next_seq.saturating_sub(1)
    }

    /// Re-applies a journaled mutation during recovery without re-journaling it.
    pub fn apply_replayed(&mut self, stored: StoredMutation) -> Result<(), LedgerError> {
        self.apply(&stored.mutation)?;
        self.next_seq = self.next_seq.max(stored.seq.saturating_add(1));
        Ok(())
    }

    fn active_entry(&self, operation_id: &OperationId) -> Result<&LedgerEntry, LedgerError> {
        match self.active.get(operation_id) {
            Some(entry) => Ok(entry),
            None if self.archived.contains_key(operation_id) => {
                Err(LedgerError::AlreadyFinalized(operation_id.clone()))
            }
            None => Err(LedgerError::UnknownOperation(operation_id.clone())),
        }
    }

    fn commit(&mut self, mutation: LedgerMutation) -> Result<(), LedgerError> {
        self.apply(&mutation)?;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(StoredMutation {
            seq,
            ts_ms: now_ms(),
            mutation,
        });
        Ok(())
    }

    fn apply(&mut self, mutation: &LedgerMutation) -> Result<(), LedgerError> {
        match mutation {
            LedgerMutation::Opened { entry } => {
                let id = entry.operation_id().clone();
                if self.contains(&id) {
                    return Err(LedgerError::AlreadyOpen(id));
                }
                self.active.insert(id, entry.clone());
            }
            LedgerMutation::SubTaskRecorded {
                operation_id,
                subtask,
            } => {
                let entry = self
                    .active
                    .get_mut(operation_id)
                    .ok_or_else(|| LedgerError::UnknownOperation(operation_id.clone()))?;
                let slot = entry
                    .subtasks
                    .iter_mut()
                    .find(|s| s.target == subtask.target)
                    .ok_or_else(|| LedgerError::UnknownSubTask {
                        operation_id: operation_id.clone(),
                        target: subtask.target,
                    })?;
                *slot = subtask.clone();
            }
            LedgerMutation::PhaseChanged {
                operation_id,
                phase,
            } => {
                let entry = self
                    .active
                    .get_mut(operation_id)
                    .ok_or_else(|| LedgerError::UnknownOperation(operation_id.clone()))?;
                entry.phase = *phase;
            }
            LedgerMutation::Finalized {
                operation_id,
                phase,
                result,
                at_ms,
            } => {
                let mut entry = self
                    .active
                    .remove(operation_id)
                    .ok_or_else(|| LedgerError::UnknownOperation(operation_id.clone()))?;
                entry.phase = *phase;
                entry.result = Some(result.clone());
                entry.finalized_at_ms = Some(*at_ms);
                self.archived.insert(operation_id.clone(), entry);
            }
        }
        Ok(())
    }
}

fn check(
    subtask: &SubTask,
    phase: Phase,
    from: SubTaskStatus,
    to: SubTaskStatus,
) -> Result<(), LedgerError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(LedgerError::IllegalTransition {
            operation_id: subtask.operation_id.clone(),
            target: subtask.target,
            phase,
            from,
            to,
        })
    }
}

fn advance(mut subtask: SubTask, update: SubTaskUpdate) -> Result<SubTask, LedgerError> {
    match update {
        SubTaskUpdate::Dispatched => {
            check(&subtask, Phase::Forward, subtask.status, SubTaskStatus::InFlight)?;
            subtask.status = SubTaskStatus::InFlight;
            subtask.attempt_count += 1;
        }
        SubTaskUpdate::Settled(outcome) => {
            let to = status_of(&outcome);
            check(&subtask, Phase::Forward, subtask.status, to)?;
            subtask.status = to;
            match outcome {
                Outcome::Succeeded(output) => subtask.output = Some(output),
                Outcome::FailedRetryable(err) | Outcome::FailedPermanent(err) => {
                    subtask.last_error = Some(err);
                }
            }
        }
        SubTaskUpdate::Aborted(err) => {
            check(
                &subtask,
                Phase::Forward,
                subtask.status,
                SubTaskStatus::FailedPermanent,
            )?;
            subtask.status = SubTaskStatus::FailedPermanent;
            subtask.last_error = Some(err);
        }
        SubTaskUpdate::CompensationDispatched => {
            let from = subtask
                .compensation_status()
                .unwrap_or(SubTaskStatus::Pending);
            if subtask.status != SubTaskStatus::Succeeded {
                return Err(LedgerError::IllegalTransition {
                    operation_id: subtask.operation_id.clone(),
                    target: subtask.target,
                    phase: Phase::Compensate,
                    from,
                    to: SubTaskStatus::InFlight,
                });
            }
            check(&subtask, Phase::Compensate, from, SubTaskStatus::InFlight)?;
            let progress = subtask.compensation.get_or_insert(CompensationProgress {
                status: SubTaskStatus::Pending,
                attempt_count: 0,
                last_error: None,
            });
            progress.status = SubTaskStatus::InFlight;
            progress.attempt_count += 1;
        }
        SubTaskUpdate::CompensationSettled(outcome) => {
            let to = status_of(&outcome);
            let from = subtask
                .compensation_status()
                .unwrap_or(SubTaskStatus::Pending);
            check(&subtask, Phase::Compensate, from, to)?;
            if let Some(progress) = subtask.compensation.as_mut() {
                progress.status = to;
                if let Outcome::FailedRetryable(err) | Outcome::FailedPermanent(err) = outcome {
                    progress.last_error = Some(err);
                }
            }
        }
    }
    Ok(subtask)
}
