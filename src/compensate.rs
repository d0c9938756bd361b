//! Compensation planning and the operator-facing reconciliation report.

use serde::{Deserialize, Serialize};

use crate::{
    core::{ledger::LedgerEntry, subtask::SubTaskStatus},
    operation::RollbackReport,
    types::{OperationId, SensorId, StoreKind, Target, TimestampMs},
};

/// One abandoned operation whose stores hold data that could not be undone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    /// Abandoned operation.
    pub operation_id: OperationId,
    /// Sensor it touched.
    pub sensor_id: SensorId,
    /// When the coordinator gave up.
    pub abandoned_at_ms: TimestampMs,
    /// Stores holding stale writes, deduplicated and sorted.
    pub stores_in_inconsistent_state: Vec<StoreKind>,
    /// Targets whose compensation failed.
    pub targets: Vec<Target>,
    /// Original failure plus the compensation errors.
    pub reason: String,
}

/// How compensation of one operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationResult {
    /// Every applied store was undone.
    RolledBack(RollbackReport),
    /// At least one compensation failed permanently.
    Abandoned(ReconciliationEntry),
}

/// Decides which sub-tasks to undo and when compensation is finished.
///
/// Compensations across stores are independent, so there is no ordering
/// between them. Retries of failed compensations go through the retry
/// scheduler like forward writes, under the same per-store policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Compensator;

impl Compensator {
    pub fn new() -> Self {
        Self
    }

    /// Succeeded writes whose inverse has not been started yet.
    pub fn plan(&self, entry: &LedgerEntry) -> Vec<Target> {
        entry
            .subtasks
            .iter()
            .filter(|s| s.needs_compensation() && s.compensation.is_none())
            .map(|s| s.target)
            .collect()
    }

    /// Final result once no forward write is in flight and every inverse settled.
    pub fn conclude(&self, entry: &LedgerEntry, now_ms: TimestampMs) -> Option<CompensationResult> {
        if entry.any_in_flight() {
            return None;
        }

        let compensable = entry.subtasks.iter().filter(|s| s.needs_compensation());
        let mut compensated = Vec::new();
        let mut failed = Vec::new();
        for subtask in compensable {
            match subtask.compensation_status() {
                Some(SubTaskStatus::Succeeded) => compensated.push(subtask.target),
                Some(SubTaskStatus::FailedPermanent) => failed.push(subtask),
                _ => return None,
            }
        }

        let cause = entry
            .first_failure()
            .map(|(target, err)| format!("{target}: {err}"))
            .unwrap_or_else(|| "cancelled".to_string());

        if failed.is_empty() {
            return Some(CompensationResult::RolledBack(RollbackReport {
                operation_id: entry.operation_id().clone(),
                sensor_id: entry.operation.sensor_id,
                reason: cause,
                compensated,
            }));
        }

        let mut stores: Vec<StoreKind> = failed.iter().map(|s| s.store_kind()).collect();
        stores.sort();
        stores.dedup();
        let details: Vec<String> = failed
            .iter()
            .map(|s| {
                let err = s
                    .compensation
                    .as_ref()
                    .and_then(|c| c.last_error.as_ref())
                    .map(ToString::to_string)
                    .unwrap_or_default();
                format!("{}: {err}", s.target)
            })
            .collect();

        Some(CompensationResult::Abandoned(ReconciliationEntry {
            operation_id: entry.operation_id().clone(),
            sensor_id: entry.operation.sensor_id,
            abandoned_at_ms: now_ms,
            stores_in_inconsistent_state: stores,
            targets: failed.iter().map(|s| s.target).collect(),
            reason: format!("{cause}; compensation failed for {}", details.join(", ")),
        }))
    }
}
