//! # redb-backed Transaction Log
//!
//! The append-only, replayable record of every committed graph mutation.
//!
//! The log receives the same notifications a live graph does
//! (`on_start`, `on_add`, `on_delete`, `on_commit`, `on_rollback`) but
//! persists the deltas instead of applying them:
//! - Deltas of the active transaction are buffered under a mutex
//! - `on_commit` writes one postcard-encoded record in a single redb
//!   transaction, so a record is either fully durable or absent
//! - `on_rollback` discards the buffer; rolled back work is never counted
//!
//! Readers use redb MVCC and observe records up to the last durable index.

use crate::sink::ChangeSink;
use crate::{Quad, QuadFsError};
use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Table for records: index(u64) -> postcard TransactionRecord
const TRANSACTIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("transactions");

// =============================================================================
// RECORDS
// =============================================================================

/// Attribution of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    /// User supplied message; empty when none was given.
    pub commit_message: String,
    /// Operation description generated by the caller, e.g. `mkdir /a/b`.
    pub system_message: String,
    pub user_id: String,
    pub user_name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl TransactionHeader {
    /// Header stamped with the current time.
    #[must_use]
    pub fn now(
        commit_message: impl Into<String>,
        system_message: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            commit_message: commit_message.into(),
            system_message: system_message.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// One quad change, in the order it was notified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuadDelta {
    Add(Quad),
    Delete(Quad),
}

/// A committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub index: u64,
    pub header: TransactionHeader,
    pub deltas: Vec<QuadDelta>,
}

#[derive(Debug)]
struct PendingTransaction {
    header: TransactionHeader,
    deltas: Vec<QuadDelta>,
}

// =============================================================================
// TRANSACTION LOG
// =============================================================================

/// Durable, append-only transaction log.
pub struct TransactionLog {
    db: Database,
    /// Single append point; holds the buffered deltas of the active transaction.
    pending: Mutex<Option<PendingTransaction>>,
    /// Number of durable records.
    committed: AtomicU64,
}

impl std::fmt::Debug for TransactionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLog")
            .field("size", &self.size())
            .field("active", &self.pending.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl TransactionLog {
    /// Open or create a log at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QuadFsError> {
        let db = Database::create(path.as_ref())
            .map_err(|e| QuadFsError::io("open transaction log", e))?;
        Self::init(db)
    }

    /// Create a log that lives only in memory.
    pub fn in_memory() -> Result<Self, QuadFsError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| QuadFsError::io("create in-memory transaction log", e))?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, QuadFsError> {
        // Initialize table if it doesn't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| QuadFsError::io("begin log init", e))?;
            let _ = write_txn
                .open_table(TRANSACTIONS)
                .map_err(|e| QuadFsError::io("open log table", e))?;
            write_txn
                .commit()
                .map_err(|e| QuadFsError::io("commit log init", e))?;
        }

        let committed = {
            let read_txn = db
                .begin_read()
                .map_err(|e| QuadFsError::io("begin log read", e))?;
            let table = read_txn
                .open_table(TRANSACTIONS)
                .map_err(|e| QuadFsError::io("open log table", e))?;
            table
                .len()
                .map_err(|e| QuadFsError::io("count log records", e))?
        };

        tracing::debug!(size = committed, "transaction log opened");

        Ok(Self {
            db,
            pending: Mutex::new(None),
            committed: AtomicU64::new(committed),
        })
    }

    /// Number of fully committed transactions.
    pub fn size(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    /// Whether a transaction is currently being recorded.
    pub fn is_active(&self) -> bool {
        self.pending.lock().is_some()
    }

    // ===== CHANGE NOTIFICATIONS =====

    /// Begin recording a transaction.
    pub fn on_start(&self, header: &TransactionHeader) -> Result<(), QuadFsError> {
        let mut pending = self.pending.lock();
        if pending.is_some() {
            return Err(QuadFsError::InvalidArgument(
                "a transaction is already being recorded".to_string(),
            ));
        }
        *pending = Some(PendingTransaction {
            header: header.clone(),
            deltas: Vec::new(),
        });
        Ok(())
    }

    pub fn on_add(&self, quad: &Quad) -> Result<(), QuadFsError> {
        self.push(QuadDelta::Add(quad.clone()))
    }

    pub fn on_delete(&self, quad: &Quad) -> Result<(), QuadFsError> {
        self.push(QuadDelta::Delete(quad.clone()))
    }

    fn push(&self, delta: QuadDelta) -> Result<(), QuadFsError> {
        let mut pending = self.pending.lock();
        let txn = pending.as_mut().ok_or_else(|| {
            QuadFsError::InvalidArgument("no transaction is being recorded".to_string())
        })?;
        txn.deltas.push(delta);
        Ok(())
    }

    /// Durably append the active transaction.
    ///
    /// On failure the buffered deltas are dropped, exactly as if
    /// `on_rollback` had been called; committed records are untouched.
    pub fn on_commit(&self) -> Result<u64, QuadFsError> {
        let mut pending = self.pending.lock();
        let txn = pending.take().ok_or_else(|| {
            QuadFsError::InvalidArgument("no transaction is being recorded".to_string())
        })?;

        let index = self.size();
        let record = TransactionRecord {
            index,
            header: txn.header,
            deltas: txn.deltas,
        };
        let bytes = postcard::to_allocvec(&record)
            .map_err(|e| QuadFsError::Serialization(e.to_string()))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| QuadFsError::io("begin log append", e))?;
        {
            let mut table = write_txn
                .open_table(TRANSACTIONS)
                .map_err(|e| QuadFsError::io("open log table", e))?;
            table
                .insert(index, bytes.as_slice())
                .map_err(|e| QuadFsError::io("append log record", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| QuadFsError::io("commit log record", e))?;

        // Publish only after the record is durable.
        self.committed.store(index + 1, Ordering::Release);
        tracing::debug!(
            index,
            deltas = record.deltas.len(),
            user = %record.header.user_id,
            "transaction recorded"
        );
        Ok(index)
    }

    /// Discard the active transaction. A no-op when nothing is active.
    pub fn on_rollback(&self) -> Result<(), QuadFsError> {
        if let Some(txn) = self.pending.lock().take() {
            tracing::debug!(deltas = txn.deltas.len(), "transaction discarded");
        }
        Ok(())
    }

    // ===== READING & REPLAY =====

    /// Fetch a committed record.
    pub fn record(&self, index: u64) -> Result<TransactionRecord, QuadFsError> {
        if index >= self.size() {
            return Err(QuadFsError::NotFound(format!("transaction {}", index)));
        }
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| QuadFsError::io("begin log read", e))?;
        let table = read_txn
            .open_table(TRANSACTIONS)
            .map_err(|e| QuadFsError::io("open log table", e))?;
        let bytes = table
            .get(index)
            .map_err(|e| QuadFsError::io("read log record", e))?
            .ok_or_else(|| QuadFsError::NotFound(format!("transaction {}", index)))?;
        postcard::from_bytes(bytes.value()).map_err(|e| QuadFsError::Serialization(e.to_string()))
    }

    /// Replay one transaction into `listener` with the notification
    /// sequence it was recorded with.
    pub fn read(&self, index: u64, listener: &mut ChangeSink<'_>) -> Result<(), QuadFsError> {
        let record = self.record(index)?;
        listener.on_start(&record.header)?;
        for delta in &record.deltas {
            match delta {
                QuadDelta::Add(quad) => listener.on_add(quad)?,
                QuadDelta::Delete(quad) => listener.on_delete(quad)?,
            }
        }
        listener.on_commit()
    }

    /// Replay `0..size()` sampled at call time. Returns the number replayed.
    pub fn replay(&self, listener: &mut ChangeSink<'_>) -> Result<u64, QuadFsError> {
        self.replay_prefix(self.size(), listener)
    }

    /// Replay the first `count` records, capped at `size()`.
    pub fn replay_prefix(
        &self,
        count: u64,
        listener: &mut ChangeSink<'_>,
    ) -> Result<u64, QuadFsError> {
        let count = count.min(self.size());
        for index in 0..count {
            self.read(index, listener)?;
        }
        Ok(count)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::graph::{QuadSet, QuadStore};
    use crate::Term;
    use tempfile::tempdir;

    fn quad(s: &str, o: &str) -> Quad {
        Quad::new(Term::iri(s), Term::iri("urn:p"), Term::literal(o))
    }

    fn header(message: &str) -> TransactionHeader {
        TransactionHeader::now(message, "test", "u1", "User One")
    }

    #[test]
    fn commit_increments_size_by_one() {
        let log = TransactionLog::in_memory().expect("log");
        assert_eq!(log.size(), 0);

        log.on_start(&header("first")).expect("start");
        log.on_add(&quad("urn:a", "1")).expect("add");
        assert_eq!(log.on_commit().expect("commit"), 0);
        assert_eq!(log.size(), 1);
    }

    #[test]
    fn rollback_is_never_counted() {
        let log = TransactionLog::in_memory().expect("log");
        log.on_start(&header("discard me")).expect("start");
        log.on_add(&quad("urn:a", "1")).expect("add");
        log.on_rollback().expect("rollback");
        assert_eq!(log.size(), 0);
        assert!(!log.is_active());
        assert!(log.record(0).unwrap_err().is_not_found());
    }

    #[test]
    fn deltas_outside_transaction_are_rejected() {
        let log = TransactionLog::in_memory().expect("log");
        assert!(matches!(
            log.on_add(&quad("urn:a", "1")),
            Err(QuadFsError::InvalidArgument(_))
        ));
        assert!(log.on_commit().is_err());
    }

    #[test]
    fn nested_start_is_rejected() {
        let log = TransactionLog::in_memory().expect("log");
        log.on_start(&header("outer")).expect("start");
        assert!(log.on_start(&header("inner")).is_err());
    }

    #[test]
    fn record_keeps_header_and_delta_order() {
        let log = TransactionLog::in_memory().expect("log");
        log.on_start(&header("msg")).expect("start");
        log.on_add(&quad("urn:a", "1")).expect("add");
        log.on_delete(&quad("urn:a", "1")).expect("delete");
        log.on_add(&quad("urn:b", "2")).expect("add");
        log.on_commit().expect("commit");

        let record = log.record(0).expect("record");
        assert_eq!(record.index, 0);
        assert_eq!(record.header.commit_message, "msg");
        assert_eq!(record.header.user_id, "u1");
        assert_eq!(
            record.deltas,
            vec![
                QuadDelta::Add(quad("urn:a", "1")),
                QuadDelta::Delete(quad("urn:a", "1")),
                QuadDelta::Add(quad("urn:b", "2")),
            ]
        );
    }

    #[test]
    fn replay_reconstructs_graph() {
        let log = TransactionLog::in_memory().expect("log");
        log.on_start(&header("one")).expect("start");
        log.on_add(&quad("urn:a", "1")).expect("add");
        log.on_add(&quad("urn:b", "2")).expect("add");
        log.on_commit().expect("commit");
        log.on_start(&header("two")).expect("start");
        log.on_delete(&quad("urn:a", "1")).expect("delete");
        log.on_commit().expect("commit");

        let mut graph = QuadSet::new();
        let replayed = log
            .replay(&mut ChangeSink::apply(&mut graph))
            .expect("replay");
        assert_eq!(replayed, 2);
        assert_eq!(graph.len(), 1);
        assert!(graph.contains(&quad("urn:b", "2")));
    }

    #[test]
    fn replay_prefix_stops_at_the_requested_record() {
        let log = TransactionLog::in_memory().expect("log");
        for value in ["1", "2", "3"] {
            log.on_start(&header(value)).expect("start");
            log.on_add(&quad("urn:a", value)).expect("add");
            log.on_commit().expect("commit");
        }

        let mut graph = QuadSet::new();
        let replayed = log
            .replay_prefix(2, &mut ChangeSink::apply(&mut graph))
            .expect("replay");
        assert_eq!(replayed, 2);
        assert_eq!(graph.len(), 2);
        assert!(!graph.contains(&quad("urn:a", "3")));

        let mut all = QuadSet::new();
        assert_eq!(
            log.replay_prefix(10, &mut ChangeSink::apply(&mut all))
                .expect("replay"),
            3
        );
    }

    #[test]
    fn replay_into_another_log_copies_records() {
        let source = TransactionLog::in_memory().expect("log");
        source.on_start(&header("one")).expect("start");
        source.on_add(&quad("urn:a", "1")).expect("add");
        source.on_commit().expect("commit");

        let target = TransactionLog::in_memory().expect("log");
        source
            .replay(&mut ChangeSink::Append(&target))
            .expect("replay");
        assert_eq!(target.size(), 1);
        assert_eq!(
            target.record(0).expect("record").deltas,
            source.record(0).expect("record").deltas
        );
    }

    #[test]
    fn persistence() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("log.redb");

        // Create and populate
        {
            let log = TransactionLog::open(&path).expect("open log");
            log.on_start(&header("kept")).expect("start");
            log.on_add(&quad("urn:a", "1")).expect("add");
            log.on_commit().expect("commit");
            log.on_start(&header("dropped")).expect("start");
            log.on_add(&quad("urn:b", "2")).expect("add");
            // never committed
        }

        // Reopen and verify
        {
            let log = TransactionLog::open(&path).expect("open log");
            assert_eq!(log.size(), 1);
            assert_eq!(log.record(0).expect("record").header.commit_message, "kept");
        }
    }
}
