use std::sync::Arc;

use hashbrown::HashMap;
use tokio::{
    sync::{broadcast, mpsc, oneshot, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::{
    adapter::StoreRegistry,
    compensate::ReconciliationEntry,
    config::{CoordinatorConfig, PersistConfig},
    coordinator::{Admission, Coordinator, CoordinatorError, Effect},
    core::ledger::{Ledger, LedgerEntry, LedgerSnapshotV1},
    journal::StoredMutation,
    operation::{Operation, OperationResult},
    persist::{LedgerSink, PersistError},
    types::{MutationSeq, OperationId},
};

use super::{
    events::CoordinatorEvent,
    pool::{Completion, WorkerPool},
};

/// Cloneable caller-side handle to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<CoordinatorEvent>,
}

type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

enum Command {
    Submit {
        operation: Operation,
        detached: bool,
        resp: Reply<OperationResult>,
    },
    Wait {
        operation_id: OperationId,
        resp: Reply<OperationResult>,
    },
    Snapshot {
        operation_id: OperationId,
        resp: Reply<LedgerEntry>,
    },
    Cancel {
        operation_id: OperationId,
        resp: Reply<()>,
    },
    Reconciliation {
        resp: Reply<Vec<ReconciliationEntry>>,
    },
    Flush {
        resp: Reply<MutationSeq>,
    },
    Checkpoint {
        resp: Reply<()>,
    },
    Shutdown {
        resp: Reply<()>,
    },
}

enum PersistMsg {
    Mutations(Vec<StoredMutation>),
    Reconciliation(ReconciliationEntry),
    Flush {
        resp: oneshot::Sender<Result<MutationSeq, PersistError>>,
    },
    Checkpoint {
        snapshot: LedgerSnapshotV1,
        last_seq: MutationSeq,
        compact: bool,
        resp: oneshot::Sender<Result<(), PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Starts the coordinator loop on the current tokio runtime.
///
/// `ledger` is usually the result of
/// [`crate::persist::sqlite::SqliteLedgerSink::load_ledger`]; any entry still
/// active in it is resumed before the first command is served.
pub fn spawn_coordinator(
    ledger: Ledger,
    registry: StoreRegistry,
    sink: Option<Box<dyn LedgerSink>>,
    config: CoordinatorConfig,
) -> CoordinatorHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_queue_bound.max(1));
    let (events_tx, _) = broadcast::channel::<CoordinatorEvent>(1024);
    let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<Completion>();

    let missing = registry.missing_kinds();
    if !missing.is_empty() {
        warn!(?missing, "no adapter registered for some store kinds");
    }

    let (persist_tx, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) =
            mpsc::channel::<PersistMsg>(config.persist.persist_queue_bound.max(1));
        let (durable_tx, durable_rx) =
            mpsc::unbounded_channel::<Result<MutationSeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.persist.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let mut driver = Driver {
        coordinator: Coordinator::new(ledger, config.retry.clone()),
        pool: WorkerPool::new(
            registry,
            config.workers_per_store,
            Duration::from_millis(config.dispatch_timeout_ms),
            completion_tx,
        ),
        waiters: HashMap::new(),
        events_tx: events_tx.clone(),
        persist_tx,
        persist: config.persist,
        mutations_since_snapshot: 0,
    };

    tokio::spawn(async move {
        let mut effects = Vec::new();
        match driver.coordinator.resume(Instant::now(), &mut effects) {
            Ok(0) => {}
            Ok(resumed) => debug!(resumed, "resumed active operations"),
            Err(err) => warn!(error = %err, "resume failed"),
        }
        driver.settle(effects).await;

        loop {
            let next_retry = driver.coordinator.next_retry_at();
            let retry_deadline =
                next_retry.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if driver.handle_command(cmd).await {
                        break;
                    }
                }
                completion = completion_rx.recv() => {
                    if let Some(completion) = completion {
                        driver.on_completion(completion).await;
                    }
                }
                _ = tokio::time::sleep_until(retry_deadline), if next_retry.is_some() => {
                    let mut effects = Vec::new();
                    if let Err(err) = driver.coordinator.on_tick(Instant::now(), &mut effects) {
                        warn!(error = %err, "retry dispatch failed");
                    }
                    driver.settle(effects).await;
                }
                durable = next_durable(&mut durable_rx) => {
                    match durable {
                        Some(Ok(seq)) => {
                            let _ = driver.events_tx.send(CoordinatorEvent::DurableUpTo { seq });
                        }
                        Some(Err(err)) => warn!(error = %err, "journal append failed"),
                        None => durable_rx = None,
                    }
                }
            }
        }
    });

    CoordinatorHandle { cmd_tx, events_tx }
}

impl CoordinatorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events_tx.subscribe()
    }

    /// Submits an operation and waits for its terminal result.
    ///
    /// Re-submitting a finished id returns the stored result without touching
    /// any store; re-submitting a running id waits on the running operation.
    pub async fn submit(&self, operation: Operation) -> Result<OperationResult, CoordinatorError> {
        self.call(|resp| Command::Submit {
            operation,
            detached: false,
            resp,
        })
        .await
    }

    /// Submits an operation and returns [`OperationResult::Accepted`] once its
    /// intent is durable. Finished ids still return their stored result.
    pub async fn submit_detached(&self, operation: Operation) -> Result<OperationResult, CoordinatorError> {
        self.call(|resp| Command::Submit {
            operation,
            detached: true,
            resp,
        })
        .await
    }

    pub async fn wait(&self, operation_id: impl Into<OperationId>) -> Result<OperationResult, CoordinatorError> {
        let operation_id = operation_id.into();
        self.call(|resp| Command::Wait { operation_id, resp }).await
    }

    pub async fn snapshot(&self, operation_id: impl Into<OperationId>) -> Result<LedgerEntry, CoordinatorError> {
        let operation_id = operation_id.into();
        self.call(|resp| Command::Snapshot { operation_id, resp }).await
    }

    /// Stops an operation that has not started compensating and rolls it back.
    pub async fn cancel(&self, operation_id: impl Into<OperationId>) -> Result<(), CoordinatorError> {
        let operation_id = operation_id.into();
        self.call(|resp| Command::Cancel { operation_id, resp }).await
    }

    pub async fn reconciliation_report(&self) -> Result<Vec<ReconciliationEntry>, CoordinatorError> {
        self.call(|resp| Command::Reconciliation { resp }).await
    }

    /// Waits until every journaled mutation so far is durable.
    pub async fn flush(&self) -> Result<MutationSeq, CoordinatorError> {
        self.call(|resp| Command::Flush { resp }).await
    }

    pub async fn checkpoint(&self) -> Result<(), CoordinatorError> {
        self.call(|resp| Command::Checkpoint { resp }).await
    }

    /// Flushes the journal and stops the loop. Callers still waiting get
    /// [`CoordinatorError::ChannelClosed`].
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        self.call(|resp| Command::Shutdown { resp }).await
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        rx.await.map_err(|_| CoordinatorError::ChannelClosed)?
    }
}

struct Driver {
    coordinator: Coordinator,
    pool: WorkerPool,
    waiters: HashMap<OperationId, Vec<Reply<OperationResult>>>,
    events_tx: broadcast::Sender<CoordinatorEvent>,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    persist: PersistConfig,
    mutations_since_snapshot: usize,
}

impl Driver {
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Submit {
                operation,
                detached,
                resp,
            } => self.submit(operation, detached, resp).await,
            Command::Wait { operation_id, resp } => {
                match self.coordinator.ledger().get(&operation_id) {
                    Some(entry) => match &entry.result {
                        Some(result) => {
                            let _ = resp.send(Ok(result.clone()));
                        }
                        None => self.waiters.entry(operation_id).or_default().push(resp),
                    },
                    None => {
                        let _ = resp.send(Err(CoordinatorError::UnknownOperation(operation_id)));
                    }
                }
            }
            Command::Snapshot { operation_id, resp } => {
                let _ = resp.send(self.coordinator.snapshot(&operation_id));
            }
            Command::Cancel { operation_id, resp } => {
                let mut effects = Vec::new();
                let out = self
                    .coordinator
                    .cancel(&operation_id, Instant::now(), &mut effects);
                self.settle(effects).await;
                let _ = resp.send(out);
            }
            Command::Reconciliation { resp } => {
                let _ = resp.send(Ok(self.coordinator.reconciliation_report()));
            }
            Command::Flush { resp } => {
                let _ = resp.send(self.flush().await);
            }
            Command::Checkpoint { resp } => {
                let _ = resp.send(self.checkpoint().await);
            }
            Command::Shutdown { resp } => {
                let out = match self.persist_tx.clone() {
                    Some(tx) => {
                        self.enqueue_mutations().await;
                        let (done_tx, done_rx) = oneshot::channel();
                        if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                            Err(CoordinatorError::ChannelClosed)
                        } else {
                            done_rx.await.map_err(|_| CoordinatorError::ChannelClosed)
                        }
                    }
                    None => Ok(()),
                };
                let _ = resp.send(out);
                return true;
            }
        }
        false
    }

    async fn submit(&mut self, operation: Operation, detached: bool, resp: Reply<OperationResult>) {
        let id = operation.operation_id.clone();
        match self.coordinator.admit(operation) {
            Err(err) => {
                let _ = resp.send(Err(err));
            }
            Ok(Admission::Finished(result)) => {
                let _ = resp.send(Ok(result));
            }
            Ok(Admission::Attached(id)) => {
                if detached {
                    let _ = resp.send(Ok(OperationResult::Accepted(id)));
                } else {
                    self.waiters.entry(id).or_default().push(resp);
                }
            }
            Ok(Admission::Opened(_)) => {
                let mut effects = Vec::new();
                // Intent must be durable before any store sees the operation.
                if let Err(err) = self.flush().await {
                    warn!(operation_id = %id, error = %err, "intent not durable; aborting operation");
                    if let Err(abort_err) = self.coordinator.abort(
                        &id,
                        "intent record could not be persisted",
                        Instant::now(),
                        &mut effects,
                    ) {
                        warn!(operation_id = %id, error = %abort_err, "abort failed");
                    }
                    self.settle(effects).await;
                    let _ = resp.send(Err(err));
                    return;
                }

                let _ = self.events_tx.send(CoordinatorEvent::Accepted {
                    operation_id: id.clone(),
                });
                if detached {
                    let _ = resp.send(Ok(OperationResult::Accepted(id.clone())));
                } else {
                    self.waiters.entry(id.clone()).or_default().push(resp);
                }
                if let Err(err) = self.coordinator.start(&id, Instant::now(), &mut effects) {
                    warn!(operation_id = %id, error = %err, "start failed");
                }
                self.settle(effects).await;
            }
        }
    }

    async fn on_completion(&mut self, completion: Completion) {
        let Completion {
            operation_id,
            target,
            phase,
            outcome,
        } = completion;
        let _ = self.events_tx.send(CoordinatorEvent::SubTaskSettled {
            operation_id: operation_id.clone(),
            target,
            phase,
            succeeded: outcome.is_success(),
        });

        let mut effects = Vec::new();
        if let Err(err) = self.coordinator.on_outcome(
            &operation_id,
            target,
            phase,
            outcome,
            Instant::now(),
            &mut effects,
        ) {
            warn!(operation_id = %operation_id, %target, error = %err, "outcome rejected");
        }
        self.settle(effects).await;
    }

    async fn settle(&mut self, effects: Vec<Effect>) {
        self.enqueue_mutations().await;

        for effect in effects {
            match effect {
                Effect::Dispatch(request) => {
                    let _ = self.events_tx.send(CoordinatorEvent::Dispatched {
                        operation_id: request.operation_id().clone(),
                        target: request.target,
                        phase: request.phase,
                        attempt: request.attempt,
                    });
                    self.pool.dispatch(request);
                }
                Effect::Finished {
                    operation_id,
                    result,
                } => {
                    let event = match &result {
                        OperationResult::Committed(_) => CoordinatorEvent::Committed {
                            operation_id: operation_id.clone(),
                        },
                        OperationResult::RolledBack(_) => CoordinatorEvent::RolledBack {
                            operation_id: operation_id.clone(),
                        },
                        OperationResult::Abandoned(entry) => {
                            if let Some(tx) = &self.persist_tx {
                                if tx.send(PersistMsg::Reconciliation(entry.clone())).await.is_err() {
                                    warn!(operation_id = %operation_id, "reconciliation entry not persisted");
                                }
                            }
                            CoordinatorEvent::Abandoned {
                                operation_id: operation_id.clone(),
                            }
                        }
                        OperationResult::Accepted(_) => continue,
                    };
                    let _ = self.events_tx.send(event);
                    for waiter in self.waiters.remove(&operation_id).unwrap_or_default() {
                        let _ = waiter.send(Ok(result.clone()));
                    }
                }
            }
        }

        self.maybe_auto_checkpoint().await;
    }

    async fn enqueue_mutations(&mut self) {
        let mutations = self.coordinator.drain_mutations();
        if mutations.is_empty() {
            return;
        }
        self.mutations_since_snapshot += mutations.len();
        match &self.persist_tx {
            Some(tx) => {
                if tx.send(PersistMsg::Mutations(mutations)).await.is_err() {
                    warn!("persistence worker stopped; mutations dropped");
                }
            }
            None => {
                let _ = self.events_tx.send(CoordinatorEvent::DurableUpTo {
                    seq: self.coordinator.ledger().latest_seq(),
                });
            }
        }
    }

    async fn flush(&mut self) -> Result<MutationSeq, CoordinatorError> {
        self.enqueue_mutations().await;
        let Some(tx) = self.persist_tx.clone() else {
            return Ok(self.coordinator.ledger().latest_seq());
        };
        let (flush_tx, flush_rx) = oneshot::channel();
        tx.send(PersistMsg::Flush { resp: flush_tx })
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?;
        flush_rx
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?
            .map_err(CoordinatorError::from)
    }

    async fn checkpoint(&mut self) -> Result<(), CoordinatorError> {
        self.enqueue_mutations().await;
        let Some(tx) = self.persist_tx.clone() else {
            return Ok(());
        };
        let snapshot = self.coordinator.ledger().export_snapshot();
        let last_seq = self.coordinator.ledger().latest_seq();
        let (cp_tx, cp_rx) = oneshot::channel();
        tx.send(PersistMsg::Checkpoint {
            snapshot,
            last_seq,
            compact: self.persist.compact_after_snapshot,
            resp: cp_tx,
        })
        .await
        .map_err(|_| CoordinatorError::ChannelClosed)?;
        cp_rx
            .await
            .map_err(|_| CoordinatorError::ChannelClosed)?
            .map_err(CoordinatorError::from)?;
        self.mutations_since_snapshot = 0;
        Ok(())
    }

    async fn maybe_auto_checkpoint(&mut self) {
        if self.persist.snapshot_every_mutations == 0
            || self.mutations_since_snapshot < self.persist.snapshot_every_mutations
            || self.persist_tx.is_none()
        {
            return;
        }
        if let Err(err) = self.checkpoint().await {
            warn!(error = %err, "automatic checkpoint failed");
        }
    }
}

async fn next_durable(
    rx: &mut Option<mpsc::UnboundedReceiver<Result<MutationSeq, PersistError>>>,
) -> Option<Result<MutationSeq, PersistError>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn spawn_persistence_worker(
    sink: Box<dyn LedgerSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<MutationSeq, PersistError>>,
    config: PersistConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    let latency = Duration::from_millis(config.batch_max_latency_ms);
    tokio::spawn(async move {
        let mut buf = Vec::<StoredMutation>::new();
        let mut deadline = Instant::now() + latency;
        let mut last_durable: MutationSeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Mutations(mutations) => {
                            buf.extend(mutations);
                            if buf.len() >= config.batch_max_ops {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                                deadline = Instant::now() + latency;
                            }
                        }
                        PersistMsg::Reconciliation(entry) => {
                            let result = match flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await {
                                Ok(()) => run_blocking(&sink, move |sink| sink.append_reconciliation(&entry)).await,
                                Err(err) => Err(err),
                            };
                            if let Err(err) = result {
                                warn!(error = %err, "reconciliation append failed");
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Checkpoint { snapshot, last_seq, compact, resp } => {
                            let result = match flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await {
                                Ok(()) => run_blocking(&sink, move |sink| {
                                    sink.write_snapshot(&snapshot, last_seq)?;
                                    if compact {
                                        let _ = sink.compact_through(last_seq)?;
                                    }
                                    Ok(())
                                }).await,
                                Err(err) => Err(err),
                            };
                            let _ = resp.send(result);
                            deadline = Instant::now() + latency;
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + latency;
                }
            }
        }
    });
}

async fn run_blocking<T, F>(sink: &Arc<Mutex<Box<dyn LedgerSink>>>, f: F) -> Result<T, PersistError>
where
    T: Send + 'static,
    F: FnOnce(&mut Box<dyn LedgerSink>) -> Result<T, PersistError> + Send + 'static,
{
    let sink_ref = Arc::clone(sink);
    tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        f(&mut *sink)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn LedgerSink>>>,
    buf: &mut Vec<StoredMutation>,
    last_durable: &mut MutationSeq,
    durable_tx: &mpsc::UnboundedSender<Result<MutationSeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            run_blocking(sink, |sink| sink.flush()).await?;
        }
        return Ok(());
    }

    let mutations = std::mem::take(buf);
    let append_res = run_blocking(sink, move |sink| {
        let seq = sink.append_mutations(&mutations)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err}"))));
            Err(err)
        }
    }
}
