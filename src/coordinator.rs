//! Synchronous coordinator state machine.
//!
//! [`Coordinator`] owns the ledger and the retry queue and decides what to do
//! next; it never performs I/O itself. Every entry point appends [`Effect`]s
//! that the runtime carries out: dispatching attempts to store workers and
//! answering callers once an operation reaches a terminal phase.

use std::sync::Arc;

use rand::{rngs::StdRng, SeedableRng};
use serde_json::{Map, Value};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{
    adapter::DispatchRequest,
    compensate::{CompensationResult, Compensator, ReconciliationEntry},
    core::{
        ledger::{Ledger, LedgerEntry, LedgerError, OperationPhase},
        subtask::{SubTaskStatus, SubTaskUpdate},
    },
    error::{Outcome, StoreError},
    journal::StoredMutation,
    operation::{CommitSummary, Operation, OperationResult},
    persist::PersistError,
    retry::{policy::RetryConfig, scheduler::RetryKey, scheduler::RetryScheduler},
    types::{now_ms, OperationId, Phase, Target},
};

/// Caller-facing coordinator failure.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// No ledger entry exists for the id.
    #[error("unknown operation {0}")]
    UnknownOperation(OperationId),
    /// The id was already used for a different request.
    #[error("operation id {0} was already used for a different request")]
    IdempotencyConflict(OperationId),
    /// The payload was refused before anything was journaled.
    #[error("operation {operation_id} is invalid: {reason}")]
    InvalidOperation {
        operation_id: OperationId,
        reason: String,
    },
    /// Cancellation is only possible before compensation starts.
    #[error("operation {operation_id} cannot be cancelled in phase {phase:?}")]
    NotCancellable {
        /// Target of the cancellation.
        operation_id: OperationId,
        /// Phase at the time of the request.
        phase: OperationPhase,
    },
    /// Ledger rejected a mutation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Journal write failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// The runtime task is gone.
    #[error("coordinator runtime is not running")]
    ChannelClosed,
}

/// Work the runtime must carry out on behalf of the coordinator.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Hand one attempt to the worker pool of the target's store.
    Dispatch(DispatchRequest),
    /// The operation reached a terminal phase; wake its waiters.
    Finished {
        /// Finished operation.
        operation_id: OperationId,
        /// Stored terminal result.
        result: OperationResult,
    },
}

/// How [`Coordinator::admit`] handled a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The id is already terminal; this is its stored result.
    Finished(OperationResult),
    /// The id is in progress; the caller should wait on it.
    Attached(OperationId),
    /// A new entry was opened. Make it durable, then call
    /// [`Coordinator::start`].
    Opened(OperationId),
}

/// Single-mutator owner of the ledger, the retry queue and the policies.
#[derive(Debug)]
pub struct Coordinator {
    ledger: Ledger,
    scheduler: RetryScheduler,
    retry: RetryConfig,
    compensator: Compensator,
    rng: StdRng,
}

impl Coordinator {
    pub fn new(ledger: Ledger, retry: RetryConfig) -> Self {
        Self::with_rng(ledger, retry, StdRng::from_entropy())
    }

    /// Deterministic jitter, for tests.
    pub fn with_seed(ledger: Ledger, retry: RetryConfig, seed: u64) -> Self {
        Self::with_rng(ledger, retry, StdRng::seed_from_u64(seed))
    }

    fn with_rng(ledger: Ledger, retry: RetryConfig, rng: StdRng) -> Self {
        Self {
            ledger,
            scheduler: RetryScheduler::new(),
            retry,
            compensator: Compensator::new(),
            rng,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Journal mutations produced since the last call.
    pub fn drain_mutations(&mut self) -> Vec<StoredMutation> {
        self.ledger.drain_pending()
    }

    /// Earliest scheduled retry.
    pub fn next_retry_at(&mut self) -> Option<Instant> {
        self.scheduler.next_due()
    }

    /// Number of retries waiting in the queue.
    pub fn scheduled_retries(&self) -> usize {
        self.scheduler.len()
    }

    pub fn snapshot(&self, operation_id: &OperationId) -> Result<LedgerEntry, CoordinatorError> {
        self.ledger
            .snapshot(operation_id)
            .map_err(|_| CoordinatorError::UnknownOperation(operation_id.clone()))
    }

    pub fn reconciliation_report(&self) -> Vec<ReconciliationEntry> {
        self.ledger.reconciliation_report()
    }

    /// Deduplicates a submission by idempotency key and opens a new entry
    /// when the key is unseen.
    pub fn admit(&mut self, operation: Operation) -> Result<Admission, CoordinatorError> {
        let id = operation.operation_id.clone();
        if let Err(reason) = operation.validate() {
            warn!(operation_id = %id, %reason, "operation rejected at admission");
            return Err(CoordinatorError::InvalidOperation {
                operation_id: id,
                reason,
            });
        }
        if let Some(existing) = self.ledger.get(&id) {
            if !existing.operation.same_request(&operation) {
                warn!(operation_id = %id, "idempotency key reused for a different request");
                return Err(CoordinatorError::IdempotencyConflict(id));
            }
            return Ok(match &existing.result {
                Some(result) => {
                    debug!(operation_id = %id, "resubmission of finished operation");
                    Admission::Finished(result.clone())
                }
                None => {
                    debug!(operation_id = %id, "resubmission attached to running operation");
                    Admission::Attached(id)
                }
            });
        }

        let entry = self.ledger.open(operation)?;
        info!(
            operation_id = %id,
            sensor_id = entry.operation.sensor_id,
            kind = ?entry.operation.kind(),
            subtasks = entry.subtasks.len(),
            "operation opened"
        );
        Ok(Admission::Opened(id))
    }

    /// Moves an opened entry to dispatching and sends its ready sub-tasks.
    pub fn start(
        &mut self,
        operation_id: &OperationId,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) -> Result<(), CoordinatorError> {
        let phase = self.active_phase(operation_id)?;
        if phase == OperationPhase::Open {
            self.ledger
                .set_phase(operation_id, OperationPhase::Dispatching)?;
        }
        self.advance(operation_id, now, effects)
    }

    /// Picks every active entry back up after a restart.
    ///
    /// Attempts that were in flight when the process stopped count as
    /// transient failures; retries lost with the in-memory queue are
    /// rescheduled immediately.
    pub fn resume(&mut self, now: Instant, effects: &mut Vec<Effect>) -> Result<usize, CoordinatorError> {
        let ids = self.ledger.active_ids();
        for id in &ids {
            let Some(entry) = self.ledger.get(id) else {
                continue;
            };
            let interrupted: Vec<(Target, Phase)> = entry
                .subtasks
                .iter()
                .flat_map(|s| {
                    let forward = (s.status == SubTaskStatus::InFlight).then_some((s.target, Phase::Forward));
                    let inverse = (s.compensation_status() == Some(SubTaskStatus::InFlight))
                        .then_some((s.target, Phase::Compensate));
                    forward.into_iter().chain(inverse)
                })
                .collect();
            let waiting: Vec<(Target, Phase)> = entry
                .subtasks
                .iter()
                .flat_map(|s| {
                    let forward = (s.status == SubTaskStatus::FailedRetryable).then_some((s.target, Phase::Forward));
                    let inverse = (s.compensation_status() == Some(SubTaskStatus::FailedRetryable))
                        .then_some((s.target, Phase::Compensate));
                    forward.into_iter().chain(inverse)
                })
                .collect();

            info!(
                operation_id = %id,
                phase = ?entry.phase,
                interrupted = interrupted.len(),
                "resuming operation"
            );

            for (target, phase) in waiting {
                self.schedule_retry(id, target, phase, Duration::ZERO, now);
            }
            for (target, phase) in interrupted {
                let outcome = Outcome::FailedRetryable(StoreError::transient("interrupted by restart"));
                self.on_outcome(id, target, phase, outcome, now, effects)?;
            }
            if self.ledger.is_active(id) {
                self.start(id, now, effects)?;
            }
        }
        Ok(ids.len())
    }

    /// Records the result of one attempt and reacts to it.
    ///
    /// Late results for finished operations, or for attempts the ledger no
    /// longer considers in flight, are dropped.
    pub fn on_outcome(
        &mut self,
        operation_id: &OperationId,
        target: Target,
        phase: Phase,
        outcome: Outcome,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) -> Result<(), CoordinatorError> {
        let Some(entry) = self.ledger.get(operation_id).filter(|e| !e.is_terminal()) else {
            debug!(operation_id = %operation_id, %target, "late outcome for finished operation");
            return Ok(());
        };
        let Some(subtask) = entry.subtask(target) else {
            return Err(LedgerError::UnknownSubTask {
                operation_id: operation_id.clone(),
                target,
            }
            .into());
        };
        let compensating = entry.phase == OperationPhase::Compensating;
        let policy = self.retry.policy_for(target.store()).clone();

        match phase {
            Phase::Forward => {
                if subtask.status != SubTaskStatus::InFlight {
                    debug!(operation_id = %operation_id, %target, status = ?subtask.status, "stale forward outcome");
                    return Ok(());
                }
                let attempts = subtask.attempt_count;
                let settled = match outcome {
                    Outcome::FailedRetryable(err) if compensating => {
                        Outcome::FailedPermanent(StoreError::aborted(format!(
                            "operation is compensating; last attempt: {err}"
                        )))
                    }
                    Outcome::FailedRetryable(err) if !policy.allows_another(attempts) => {
                        warn!(operation_id = %operation_id, %target, attempts, error = %err, "retry budget exhausted");
                        Outcome::FailedPermanent(StoreError::Exhausted {
                            attempts,
                            last: err.to_string(),
                        })
                    }
                    other => other,
                };

                let retry_after = match &settled {
                    Outcome::FailedRetryable(err) => {
                        let delay = policy.delay_after(attempts, &mut self.rng);
                        debug!(operation_id = %operation_id, %target, attempt = attempts, error = %err, delay_ms = delay.as_millis() as u64, "scheduling retry");
                        Some(delay)
                    }
                    _ => None,
                };
                let not_found = matches!(&settled, Outcome::FailedPermanent(err) if err.is_not_found());
                if let Outcome::FailedPermanent(err) = &settled {
                    warn!(operation_id = %operation_id, %target, attempt = attempts, error = %err, "sub-task failed permanently");
                }

                self.ledger
                    .record(operation_id, target, SubTaskUpdate::Settled(settled))?;
                if let Some(delay) = retry_after {
                    self.schedule_retry(operation_id, target, Phase::Forward, delay, now);
                }
                if not_found {
                    self.abort_dependents(operation_id, target)?;
                }
            }
            Phase::Compensate => {
                if subtask.compensation_status() != Some(SubTaskStatus::InFlight) {
                    debug!(operation_id = %operation_id, %target, "stale compensation outcome");
                    return Ok(());
                }
                let attempts = subtask
                    .compensation
                    .as_ref()
                    .map_or(0, |c| c.attempt_count);
                let settled = match outcome {
                    Outcome::FailedRetryable(err) if !policy.allows_another(attempts) => {
                        Outcome::FailedPermanent(StoreError::Exhausted {
                            attempts,
                            last: err.to_string(),
                        })
                    }
                    Outcome::FailedPermanent(err) => {
                        Outcome::FailedPermanent(StoreError::CompensationFailure {
                            message: err.to_string(),
                        })
                    }
                    other => other,
                };
                match &settled {
                    Outcome::Succeeded(_) => {
                        debug!(operation_id = %operation_id, %target, "compensation applied");
                    }
                    Outcome::FailedRetryable(err) => {
                        debug!(operation_id = %operation_id, %target, attempt = attempts, error = %err, "compensation will be retried");
                    }
                    Outcome::FailedPermanent(err) => {
                        warn!(operation_id = %operation_id, %target, attempt = attempts, error = %err, "compensation failed permanently");
                    }
                }
                let retry_after = matches!(settled, Outcome::FailedRetryable(_))
                    .then(|| policy.delay_after(attempts, &mut self.rng));

                self.ledger.record(
                    operation_id,
                    target,
                    SubTaskUpdate::CompensationSettled(settled),
                )?;
                if let Some(delay) = retry_after {
                    self.schedule_retry(operation_id, target, Phase::Compensate, delay, now);
                }
            }
        }

        self.advance(operation_id, now, effects)
    }

    /// Dispatches every retry due at `now`.
    pub fn on_tick(&mut self, now: Instant, effects: &mut Vec<Effect>) -> Result<usize, CoordinatorError> {
        let due = self.scheduler.drain(now);
        let mut dispatched = 0;
        for key in due {
            let Some(entry) = self.ledger.get(&key.operation_id).filter(|e| !e.is_terminal()) else {
                continue;
            };
            let Some(subtask) = entry.subtask(key.target) else {
                continue;
            };
            let ready = match key.phase {
                Phase::Forward => {
                    entry.phase == OperationPhase::Dispatching
                        && subtask.status == SubTaskStatus::FailedRetryable
                }
                Phase::Compensate => {
                    subtask.compensation_status() == Some(SubTaskStatus::FailedRetryable)
                }
            };
            if !ready {
                continue;
            }
            match key.phase {
                Phase::Forward => self.dispatch_forward(&key.operation_id, key.target, effects)?,
                Phase::Compensate => {
                    self.dispatch_compensation(&key.operation_id, key.target, effects)?;
                }
            }
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Stops an in-progress operation and rolls back what it applied.
    pub fn cancel(
        &mut self,
        operation_id: &OperationId,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) -> Result<(), CoordinatorError> {
        self.abort(operation_id, "cancelled by caller", now, effects)
    }

    /// Same as [`Coordinator::cancel`] with a caller-chosen reason.
    pub fn abort(
        &mut self,
        operation_id: &OperationId,
        reason: &str,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) -> Result<(), CoordinatorError> {
        let phase = match self.ledger.get(operation_id) {
            Some(entry) => entry.phase,
            None => return Err(CoordinatorError::UnknownOperation(operation_id.clone())),
        };
        if !matches!(phase, OperationPhase::Open | OperationPhase::Dispatching) {
            return Err(CoordinatorError::NotCancellable {
                operation_id: operation_id.clone(),
                phase,
            });
        }
        info!(operation_id = %operation_id, ?phase, reason, "operation aborted");
        self.begin_compensation(operation_id, reason)?;
        self.advance(operation_id, now, effects)
    }

    fn active_phase(&self, operation_id: &OperationId) -> Result<OperationPhase, CoordinatorError> {
        match self.ledger.get(operation_id) {
            Some(entry) if !entry.is_terminal() => Ok(entry.phase),
            Some(_) => Err(LedgerError::AlreadyFinalized(operation_id.clone()).into()),
            None => Err(CoordinatorError::UnknownOperation(operation_id.clone())),
        }
    }

    /// Drives the entry as far as it can go without new outcomes.
    fn advance(
        &mut self,
        operation_id: &OperationId,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) -> Result<(), CoordinatorError> {
        let Some(entry) = self.ledger.get(operation_id).filter(|e| !e.is_terminal()) else {
            return Ok(());
        };

        let phase = entry.phase;
        match phase {
            OperationPhase::Open => Ok(()),
            OperationPhase::Dispatching => {
                if entry.all_succeeded() {
                    return self.commit(operation_id, effects);
                }
                let failed = entry
                    .subtasks
                    .iter()
                    .any(|s| s.status == SubTaskStatus::FailedPermanent);
                if failed {
                    self.begin_compensation(operation_id, "sub-task failed permanently")?;
                    return self.advance(operation_id, now, effects);
                }
                for target in entry.ready_targets() {
                    self.dispatch_forward(operation_id, target, effects)?;
                }
                Ok(())
            }
            OperationPhase::Compensating => self.drive_compensation(operation_id, effects),
            OperationPhase::Committed | OperationPhase::RolledBack | OperationPhase::Abandoned => {
                Ok(())
            }
        }
    }

    fn commit(&mut self, operation_id: &OperationId, effects: &mut Vec<Effect>) -> Result<(), CoordinatorError> {
        let entry = self.active_entry(operation_id)?;
        let result = OperationResult::Committed(CommitSummary {
            operation_id: operation_id.clone(),
            sensor_id: entry.operation.sensor_id,
            kind: entry.operation.kind(),
            applied: entry.subtasks.iter().map(|s| s.target).collect(),
            sensor: sensor_view(entry),
        });
        self.finish(operation_id, result, effects)
    }

    /// Enters compensation: forward retries are cancelled and sub-tasks that
    /// were never dispatched, or were waiting for a retry, are aborted.
    fn begin_compensation(&mut self, operation_id: &OperationId, reason: &str) -> Result<(), CoordinatorError> {
        self.ledger
            .set_phase(operation_id, OperationPhase::Compensating)?;
        let cancelled = self.scheduler.cancel_operation(operation_id, Phase::Forward);
        let doomed: Vec<Target> = self
            .active_entry(operation_id)?
            .subtasks
            .iter()
            .filter(|s| matches!(s.status, SubTaskStatus::Pending | SubTaskStatus::FailedRetryable))
            .map(|s| s.target)
            .collect();
        info!(
            operation_id = %operation_id,
            reason,
            aborted = doomed.len(),
            cancelled_retries = cancelled,
            "compensation started"
        );
        for target in doomed {
            self.ledger.record(
                operation_id,
                target,
                SubTaskUpdate::Aborted(StoreError::aborted(reason)),
            )?;
        }
        Ok(())
    }

    fn drive_compensation(&mut self, operation_id: &OperationId, effects: &mut Vec<Effect>) -> Result<(), CoordinatorError> {
        let entry = self.active_entry(operation_id)?;
        if entry.any_in_flight() {
            return Ok(());
        }
        for target in self.compensator.plan(entry) {
            self.dispatch_compensation(operation_id, target, effects)?;
        }

        let entry = self.active_entry(operation_id)?;
        let Some(concluded) = self.compensator.conclude(entry, now_ms()) else {
            return Ok(());
        };
        let result = match concluded {
            CompensationResult::RolledBack(report) => OperationResult::RolledBack(report),
            CompensationResult::Abandoned(reconciliation) => {
                warn!(
                    operation_id = %operation_id,
                    stores = ?reconciliation.stores_in_inconsistent_state,
                    reason = %reconciliation.reason,
                    "operation abandoned; manual reconciliation required"
                );
                OperationResult::Abandoned(reconciliation)
            }
        };
        self.finish(operation_id, result, effects)
    }

    fn finish(
        &mut self,
        operation_id: &OperationId,
        result: OperationResult,
        effects: &mut Vec<Effect>,
    ) -> Result<(), CoordinatorError> {
        self.scheduler.cancel_operation(operation_id, Phase::Forward);
        self.scheduler.cancel_operation(operation_id, Phase::Compensate);
        let entry = self.ledger.finalize(operation_id, result)?;
        info!(operation_id = %operation_id, phase = ?entry.phase, "operation finished");
        if let Some(result) = entry.result.clone() {
            effects.push(Effect::Finished {
                operation_id: operation_id.clone(),
                result,
            });
        }
        Ok(())
    }

    fn abort_dependents(&mut self, operation_id: &OperationId, target: Target) -> Result<(), CoordinatorError> {
        let dependents = self.active_entry(operation_id)?.pending_dependents(target);
        for dependent in dependents {
            debug!(operation_id = %operation_id, %dependent, prerequisite = %target, "aborting dependent");
            self.ledger.record(
                operation_id,
                dependent,
                SubTaskUpdate::Aborted(StoreError::aborted(format!(
                    "prerequisite {target} not found"
                ))),
            )?;
        }
        Ok(())
    }

    fn dispatch_forward(
        &mut self,
        operation_id: &OperationId,
        target: Target,
        effects: &mut Vec<Effect>,
    ) -> Result<(), CoordinatorError> {
        let attempt = self
            .ledger
            .record(operation_id, target, SubTaskUpdate::Dispatched)?
            .attempt_count;
        let entry = self.active_entry(operation_id)?;
        debug!(operation_id = %operation_id, %target, attempt, "dispatching");
        effects.push(Effect::Dispatch(DispatchRequest {
            operation: Arc::new(entry.operation.clone()),
            target,
            phase: Phase::Forward,
            attempt,
            prerequisites: entry.prerequisite_outputs(target),
            forward_output: None,
        }));
        Ok(())
    }

    fn dispatch_compensation(
        &mut self,
        operation_id: &OperationId,
        target: Target,
        effects: &mut Vec<Effect>,
    ) -> Result<(), CoordinatorError> {
        let subtask = self
            .ledger
            .record(operation_id, target, SubTaskUpdate::CompensationDispatched)?;
        let attempt = subtask.compensation.as_ref().map_or(1, |c| c.attempt_count);
        let forward_output = subtask.output.clone();
        let entry = self.active_entry(operation_id)?;
        debug!(operation_id = %operation_id, %target, attempt, "dispatching compensation");
        effects.push(Effect::Dispatch(DispatchRequest {
            operation: Arc::new(entry.operation.clone()),
            target,
            phase: Phase::Compensate,
            attempt,
            prerequisites: entry.prerequisite_outputs(target),
            forward_output,
        }));
        Ok(())
    }

    fn schedule_retry(&mut self, operation_id: &OperationId, target: Target, phase: Phase, delay: Duration, now: Instant) {
        self.scheduler.schedule(
            RetryKey {
                operation_id: operation_id.clone(),
                target,
                phase,
            },
            delay,
            now,
        );
    }

    fn active_entry(&self, operation_id: &OperationId) -> Result<&LedgerEntry, CoordinatorError> {
        self.ledger
            .get(operation_id)
            .filter(|e| !e.is_terminal())
            .ok_or_else(|| CoordinatorError::UnknownOperation(operation_id.clone()))
    }
}

/// Merges the lookup outputs of a committed reading with the reading itself.
fn sensor_view(entry: &LedgerEntry) -> Option<Value> {
    let reading = entry.operation.reading()?;
    let mut view = Map::new();
    for target in [Target::SensorLookup, Target::MetadataLookup] {
        if let Some(Value::Object(fields)) = entry.subtask(target).and_then(|s| s.output.as_ref()) {
            view.extend(fields.clone());
        }
    }
    view.insert("reading".to_string(), serde_json::to_value(reading).ok()?);
    Some(Value::Object(view))
}
