use std::sync::Arc;

use hashbrown::HashMap;
use tokio::{
    sync::{mpsc, Semaphore},
    time::Duration,
};

use crate::{
    adapter::{DispatchRequest, StoreAdapter, StoreRegistry},
    error::{Outcome, StoreError},
    types::{OperationId, Phase, StoreKind, Target},
};

/// Result of one attempt, sent back to the event loop.
#[derive(Debug, Clone)]
pub struct Completion {
    pub operation_id: OperationId,
    pub target: Target,
    pub phase: Phase,
    pub outcome: Outcome,
}

/// Runs attempts on tokio tasks, at most `workers_per_store` at a time for
/// each store kind. A slow store never starves the others.
pub struct WorkerPool {
    registry: StoreRegistry,
    permits: HashMap<StoreKind, Arc<Semaphore>>,
    timeout: Duration,
    completions: mpsc::UnboundedSender<Completion>,
}

impl WorkerPool {
    pub fn new(
        registry: StoreRegistry,
        workers_per_store: usize,
        timeout: Duration,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Self {
        let permits = StoreKind::ALL
            .iter()
            .map(|kind| (*kind, Arc::new(Semaphore::new(workers_per_store.max(1)))))
            .collect();
        Self {
            registry,
            permits,
            timeout,
            completions,
        }
    }

    /// Starts one attempt; the outcome arrives on the completion channel.
    pub fn dispatch(&self, request: DispatchRequest) {
        let kind = request.store();
        let adapter = self.registry.get(kind);
        let permits = self.permits.get(&kind).cloned();
        let timeout = self.timeout;
        let completions = self.completions.clone();

        tokio::spawn(async move {
            let outcome = match (adapter, permits) {
                (Some(adapter), Some(permits)) => match permits.acquire_owned().await {
                    Ok(_permit) => attempt(adapter.as_ref(), &request, timeout).await,
                    Err(_) => Outcome::FailedRetryable(StoreError::transient("worker pool closed")),
                },
                _ => Outcome::FailedPermanent(StoreError::rejected(format!(
                    "no adapter registered for {kind}"
                ))),
            };
            let _ = completions.send(Completion {
                operation_id: request.operation_id().clone(),
                target: request.target,
                phase: request.phase,
                outcome,
            });
        });
    }
}

async fn attempt(adapter: &dyn StoreAdapter, request: &DispatchRequest, timeout: Duration) -> Outcome {
    let call = async {
        match request.phase {
            Phase::Forward => adapter.apply(request).await,
            Phase::Compensate => adapter.compensate(request).await,
        }
    };
    match tokio::time::timeout(timeout, call).await {
        Ok(outcome) => outcome,
        Err(_) => Outcome::FailedRetryable(StoreError::transient(format!(
            "{} attempt {} timed out after {}ms",
            request.target,
            request.attempt,
            timeout.as_millis()
        ))),
    }
}
