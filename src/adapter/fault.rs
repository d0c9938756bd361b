use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::{
    adapter::{DispatchRequest, StoreAdapter},
    error::{Outcome, StoreError},
    types::{OperationId, Phase, StoreKind, Target},
};

/// Injected behaviour for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail with a transient error without reaching the store.
    Transient,
    /// Fail permanently with the given error without reaching the store.
    Permanent(StoreError),
    /// Sleep, then pass through to the wrapped store.
    Delay(Duration),
}

/// One observed adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub operation_id: OperationId,
    pub target: Target,
    pub phase: Phase,
    /// Attempt number the coordinator assigned.
    pub attempt: u32,
    /// Whether the call returned success.
    pub succeeded: bool,
}

/// Wraps an adapter with per-target scripted faults and a call log.
///
/// Scripted faults are consumed one per attempt, in order; a sticky fault
/// applies to every attempt until cleared.
pub struct FaultyStore {
    inner: Arc<dyn StoreAdapter>,
    scripts: Mutex<HashMap<(Target, Phase), VecDeque<Fault>>>,
    sticky: Mutex<HashMap<(Target, Phase), Fault>>,
    calls: Mutex<Vec<CallRecord>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn StoreAdapter>) -> Self {
        Self {
            inner,
            scripts: Mutex::new(HashMap::new()),
            sticky: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues faults for the next attempts of `(target, phase)`.
    pub fn script(&self, target: Target, phase: Phase, faults: impl IntoIterator<Item = Fault>) {
        self.scripts
            .lock()
            .entry((target, phase))
            .or_default()
            .extend(faults);
    }

    /// Applies `fault` to every attempt of `(target, phase)`.
    pub fn always(&self, target: Target, phase: Phase, fault: Fault) {
        self.sticky.lock().insert((target, phase), fault);
    }

    pub fn clear(&self) {
        self.scripts.lock().clear();
        self.sticky.lock().clear();
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().clone()
    }

    /// Calls made for `(target, phase)`.
    pub fn call_count(&self, target: Target, phase: Phase) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.target == target && c.phase == phase)
            .count()
    }

    /// Successful calls made for `(target, phase)`.
    pub fn success_count(&self, target: Target, phase: Phase) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.target == target && c.phase == phase && c.succeeded)
            .count()
    }

    fn next_fault(&self, target: Target, phase: Phase) -> Option<Fault> {
        let scripted = self
            .scripts
            .lock()
            .get_mut(&(target, phase))
            .and_then(VecDeque::pop_front);
        scripted.or_else(|| self.sticky.lock().get(&(target, phase)).cloned())
    }

    async fn call(&self, request: &DispatchRequest) -> Outcome {
        let outcome = match self.next_fault(request.target, request.phase) {
            Some(Fault::Transient) => Outcome::FailedRetryable(StoreError::transient(format!(
                "injected fault on {} attempt {}",
                request.target, request.attempt
            ))),
            Some(Fault::Permanent(err)) => Outcome::FailedPermanent(err),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                self.pass_through(request).await
            }
            None => self.pass_through(request).await,
        };
        self.calls.lock().push(CallRecord {
            operation_id: request.operation_id().clone(),
            target: request.target,
            phase: request.phase,
            attempt: request.attempt,
            succeeded: outcome.is_success(),
        });
        outcome
    }

    async fn pass_through(&self, request: &DispatchRequest) -> Outcome {
        match request.phase {
            Phase::Forward => self.inner.apply(request).await,
            Phase::Compensate => self.inner.compensate(request).await,
        }
    }
}

#[async_trait]
impl StoreAdapter for FaultyStore {
    fn kind(&self) -> StoreKind {
        self.inner.kind()
    }

    async fn apply(&self, request: &DispatchRequest) -> Outcome {
        self.call(request).await
    }

    async fn compensate(&self, request: &DispatchRequest) -> Outcome {
        self.call(request).await
    }
}
