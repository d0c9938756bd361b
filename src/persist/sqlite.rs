//! SQLite-backed append-only ledger journal.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{
    compensate::ReconciliationEntry,
    core::ledger::{Ledger, LedgerSnapshotV1},
    journal::{StoredMutation, StoredMutationEnvelope, MUTATION_FORMAT_VERSION},
    types::{now_ms, MutationSeq},
};

use super::{LedgerSink, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: LedgerSnapshotV1,
}

/// SQLite implementation of [`crate::persist::LedgerSink`].
pub struct SqliteLedgerSink {
    conn: Connection,
}

impl SqliteLedgerSink {
    /// Opens or creates a journal at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the ledger from the latest snapshot plus the journal tail.
    #[tracing::instrument(skip(self))]
    pub fn load_ledger(&self) -> PersistResult<Ledger> {
        let mut ledger = match self.load_latest_snapshot()? {
            Some(snapshot) => Ledger::from_snapshot(snapshot),
            None => Ledger::new(),
        };

        let tail = self.load_mutations_after(ledger.latest_seq())?;
        let replayed = tail.len();
        for stored in tail {
            ledger.apply_replayed(stored)?;
        }
        tracing::debug!(
            replayed,
            active = ledger.active_len(),
            archived = ledger.archived_len(),
            "ledger loaded"
        );
        Ok(ledger)
    }

    /// Loads mutations strictly after `seq`.
    pub fn load_mutations_after(&self, seq: MutationSeq) -> PersistResult<Vec<StoredMutation>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, ts_ms, payload FROM mutations WHERE seq > ?1 ORDER BY seq ASC")?;

        let rows = stmt.query_map(params![seq as i64], |row| {
            let seq: i64 = row.get(0)?;
            let ts_ms: i64 = row.get(1)?;
            let payload: Vec<u8> = row.get(2)?;
            let mut stored = decode_mutation_payload(&payload).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    payload.len(),
                    rusqlite::types::Type::Blob,
                    Box::new(std::io::Error::other(err)),
                )
            })?;
            stored.seq = seq as MutationSeq;
            stored.ts_ms = ts_ms as u64;
            Ok(stored)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Writes a snapshot covering `last_seq`.
    #[tracing::instrument(skip(self, snapshot))]
    pub fn write_snapshot(
        &mut self,
        snapshot: &LedgerSnapshotV1,
        last_seq: MutationSeq,
    ) -> PersistResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, now_ms() as i64, payload],
        )?;
        Ok(())
    }

    /// Deletes mutations up to and including `seq`.
    #[tracing::instrument(skip(self))]
    pub fn compact_through(&mut self, seq: MutationSeq) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM mutations WHERE seq <= ?1", params![seq as i64])?;
        Ok(count)
    }

    pub fn latest_seq(&self) -> PersistResult<MutationSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM mutations", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as MutationSeq)
    }

    /// Persisted reconciliation report, oldest first.
    pub fn load_reconciliation_report(&self) -> PersistResult<Vec<ReconciliationEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM reconciliation ORDER BY abandoned_at_ms ASC, id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;

        let mut out = Vec::new();
        for payload in rows {
            out.push(serde_json::from_slice(&payload?)?);
        }
        Ok(out)
    }

    fn load_latest_snapshot(&self) -> PersistResult<Option<LedgerSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported snapshot format version: {}",
                env.format_version
            )));
        }
        Ok(Some(env.snapshot))
    }
}

impl LedgerSink for SqliteLedgerSink {
    #[tracing::instrument(skip_all, fields(count = mutations.len()))]
    fn append_mutations(&mut self, mutations: &[StoredMutation]) -> PersistResult<MutationSeq> {
        if mutations.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO mutations(seq, ts_ms, kind, operation_id, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stored in mutations {
                let payload = serde_json::to_vec(&StoredMutationEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    stored.mutation.kind_code(),
                    stored.mutation.operation_id().as_str(),
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        Ok(mutations.last().map(|m| m.seq).unwrap_or(0))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &LedgerSnapshotV1, last_seq: MutationSeq) -> PersistResult<()> {
        SqliteLedgerSink::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: MutationSeq) -> PersistResult<usize> {
        SqliteLedgerSink::compact_through(self, seq)
    }

    #[tracing::instrument(skip_all, fields(operation_id = %entry.operation_id))]
    fn append_reconciliation(&mut self, entry: &ReconciliationEntry) -> PersistResult<()> {
        let stores: Vec<&str> = entry
            .stores_in_inconsistent_state
            .iter()
            .map(|k| k.as_str())
            .collect();
        self.conn.execute(
            "INSERT OR IGNORE INTO reconciliation(operation_id, sensor_id, abandoned_at_ms, stores, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.operation_id.as_str(),
                entry.sensor_id as i64,
                entry.abandoned_at_ms as i64,
                stores.join(","),
                serde_json::to_vec(entry)?,
            ],
        )?;
        Ok(())
    }
}

fn decode_mutation_payload(payload: &[u8]) -> Result<StoredMutation, String> {
    let envelope: StoredMutationEnvelope = serde_json::from_slice(payload)
        .map_err(|e| format!("mutation payload decode failed: {e}"))?;
    if envelope.format_version != MUTATION_FORMAT_VERSION {
        return Err(format!(
            "unsupported mutation format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.stored)
}
