/// SQLite journal, snapshot and reconciliation tables.
pub mod sqlite;

use crate::{
    compensate::ReconciliationEntry,
    core::ledger::{LedgerError, LedgerSnapshotV1},
    journal::StoredMutation,
    types::MutationSeq,
};

/// Persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// SQLite call failed.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Envelope (de)serialization failed.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Replayed mutation did not fit the ledger.
    #[error("replay: {0}")]
    Ledger(#[from] LedgerError),
    /// Anything else: version mismatches, worker join errors, closed queues.
    #[error("{0}")]
    Message(String),
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable destination of ledger mutations.
///
/// Called from a blocking worker thread; implementations may block.
pub trait LedgerSink: Send {
    /// Appends mutations in sequence order, returning the highest appended seq.
    fn append_mutations(&mut self, mutations: &[StoredMutation]) -> PersistResult<MutationSeq>;

    /// Forces appended data to stable storage.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }

    /// Stores a full ledger image covering everything through `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &LedgerSnapshotV1, _last_seq: MutationSeq) -> PersistResult<()> {
        Ok(())
    }

    /// Drops journal rows up to and including `seq`.
    fn compact_through(&mut self, _seq: MutationSeq) -> PersistResult<usize> {
        Ok(0)
    }

    /// Appends one row to the operator reconciliation report.
    fn append_reconciliation(&mut self, _entry: &ReconciliationEntry) -> PersistResult<()> {
        Ok(())
    }
}
