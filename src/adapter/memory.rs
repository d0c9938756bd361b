use std::collections::BTreeMap;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    adapter::{
        write::{plan_forward, plan_inverse, pre_image, Write},
        DispatchRequest, StoreAdapter,
    },
    error::{Outcome, StoreError},
    types::{OperationId, Phase, StoreKind, Target},
};

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<&'static str, BTreeMap<String, Value>>,
    applied: HashMap<(OperationId, Target, Phase), Outcome>,
    writes: u64,
}

/// In-memory stand-in for one external store.
///
/// Rows are JSON values keyed by natural key. Successful attempts are
/// remembered per `(operation_id, target, phase)`, so a redelivered attempt
/// returns the recorded outcome without writing again.
#[derive(Debug)]
pub struct MemoryStore {
    kind: StoreKind,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(kind: StoreKind) -> Self {
        Self {
            kind,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Cloned row, if present.
    pub fn row(&self, table: &str, key: &str) -> Option<Value> {
        self.state
            .lock()
            .tables
            .get(table)
            .and_then(|t| t.get(key))
            .cloned()
    }

    /// All rows of `table`, in key order.
    pub fn rows(&self, table: &str) -> Vec<(String, Value)> {
        self.state
            .lock()
            .tables
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Writes a row directly, bypassing dedup.
    pub fn seed(&self, table: &'static str, key: impl Into<String>, row: Value) {
        self.state
            .lock()
            .tables
            .entry(table)
            .or_default()
            .insert(key.into(), row);
    }

    /// Number of mutating writes executed.
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }

    fn run(&self, request: &DispatchRequest, write: Result<Option<Write>, StoreError>) -> Outcome {
        let dedup_key = (
            request.operation_id().clone(),
            request.target,
            request.phase,
        );
        let mut state = self.state.lock();
        if let Some(done) = state.applied.get(&dedup_key) {
            return done.clone();
        }

        let result = write.and_then(|w| match w {
            Some(w) => execute(&mut state, w),
            None => Ok(Value::Null),
        });
        let outcome = Outcome::from_result(result);
        if outcome.is_success() && !request.target.is_read() {
            state.applied.insert(dedup_key, outcome.clone());
        }
        outcome
    }
}

fn execute(state: &mut MemoryState, write: Write) -> Result<Value, StoreError> {
    match write {
        Write::Insert { table, key, row } => {
            let rows = state.tables.entry(table).or_default();
            if let Some(existing) = rows.get(&key) {
                return Err(StoreError::ConstraintViolation {
                    message: format!("{table}/{key} already exists"),
                    idempotent: *existing == row,
                });
            }
            rows.insert(key, row);
            state.writes += 1;
            Ok(pre_image(None))
        }
        Write::Upsert { table, key, row } => {
            let previous = state.tables.entry(table).or_default().insert(key, row);
            state.writes += 1;
            Ok(pre_image(previous))
        }
        Write::Delete {
            table,
            key,
            must_exist,
        } => {
            let previous = state.tables.entry(table).or_default().remove(&key);
            if previous.is_none() && must_exist {
                return Err(StoreError::not_found(format!("{table}/{key}")));
            }
            state.writes += 1;
            Ok(pre_image(previous))
        }
        Write::Lookup { table, key } => state
            .tables
            .get(table)
            .and_then(|t| t.get(&key))
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("{table}/{key}"))),
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    async fn apply(&self, request: &DispatchRequest) -> Outcome {
        self.run(request, plan_forward(request).map(Some))
    }

    async fn compensate(&self, request: &DispatchRequest) -> Outcome {
        self.run(request, plan_inverse(request))
    }
}
