//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::retry::policy::RetryConfig;

/// Journal batching and snapshot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Mutations buffered before a forced append.
    pub batch_max_ops: usize,
    /// Longest a buffered mutation waits before it is appended.
    pub batch_max_latency_ms: u64,
    /// Capacity of the queue into the persistence worker.
    pub persist_queue_bound: usize,
    /// Automatic snapshot interval in journaled mutations; 0 disables it.
    pub snapshot_every_mutations: usize,
    /// Delete journal rows covered by a fresh snapshot.
    pub compact_after_snapshot: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            batch_max_ops: 64,
            batch_max_latency_ms: 50,
            persist_queue_bound: 1024,
            snapshot_every_mutations: 5000,
            compact_after_snapshot: false,
        }
    }
}

/// Everything [`crate::runtime::handle::spawn_coordinator`] needs besides the
/// adapters and the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Concurrent attempts allowed per store kind.
    pub workers_per_store: usize,
    /// Capacity of the caller command queue.
    pub command_queue_bound: usize,
    /// Attempts running longer than this count as transient failures.
    pub dispatch_timeout_ms: u64,
    /// Backoff policies per store kind.
    pub retry: RetryConfig,
    /// Journal settings.
    pub persist: PersistConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workers_per_store: 8,
            command_queue_bound: 256,
            dispatch_timeout_ms: 5_000,
            retry: RetryConfig::default(),
            persist: PersistConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
