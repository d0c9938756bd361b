//! Store adapter boundary, one implementation per external store kind.

/// Scripted fault injection around any adapter.
pub mod fault;
/// In-memory stub stores.
pub mod memory;
/// Translation of sub-tasks into keyed table writes.
pub mod write;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde_json::Value;

use crate::{
    error::Outcome,
    operation::Operation,
    types::{OperationId, Phase, StoreKind, Target},
};

/// Everything a store needs to perform one attempt of one sub-task.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Operation the sub-task belongs to.
    pub operation: Arc<Operation>,
    /// Write to perform.
    pub target: Target,
    /// Forward write or its inverse.
    pub phase: Phase,
    /// 1-based attempt number within `phase`.
    pub attempt: u32,
    /// Outputs of succeeded prerequisite sub-tasks.
    pub prerequisites: Vec<(Target, Value)>,
    /// Output of the forward write; set for compensations.
    pub forward_output: Option<Value>,
}

impl DispatchRequest {
    pub fn operation_id(&self) -> &OperationId {
        &self.operation.operation_id
    }

    pub fn store(&self) -> StoreKind {
        self.target.store()
    }

    /// Output of prerequisite `target`, if it was a prerequisite.
    pub fn prerequisite(&self, target: Target) -> Option<&Value> {
        self.prerequisites
            .iter()
            .find(|(t, _)| *t == target)
            .map(|(_, v)| v)
    }
}

/// Narrow interface to one external store.
///
/// Implementations must be idempotent under redelivery: applying the same
/// `(operation_id, target)` twice must not write twice. Each call makes exactly
/// one write attempt; retrying is the coordinator's job.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Store role served by this adapter.
    fn kind(&self) -> StoreKind;

    /// Performs the forward write of `request.target`.
    async fn apply(&self, request: &DispatchRequest) -> Outcome;

    /// Undoes a previously succeeded forward write.
    async fn compensate(&self, request: &DispatchRequest) -> Outcome;
}

/// Adapter instances keyed by store kind, built once at process start.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    adapters: HashMap<StoreKind, Arc<dyn StoreAdapter>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry of fresh [`memory::MemoryStore`]s for every kind.
    pub fn in_memory() -> Self {
        StoreKind::ALL.iter().fold(Self::new(), |registry, kind| {
            registry.with(Arc::new(memory::MemoryStore::new(*kind)))
        })
    }

    /// Builder form of [`StoreRegistry::register`].
    pub fn with(mut self, adapter: Arc<dyn StoreAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Installs `adapter` for its kind, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn StoreAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: StoreKind) -> Option<Arc<dyn StoreAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Kinds with no adapter installed.
    pub fn missing_kinds(&self) -> Vec<StoreKind> {
        StoreKind::ALL
            .iter()
            .copied()
            .filter(|k| !self.adapters.contains_key(k))
            .collect()
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<StoreKind> = self.adapters.keys().copied().collect();
        kinds.sort();
        f.debug_struct("StoreRegistry").field("kinds", &kinds).finish()
    }
}
