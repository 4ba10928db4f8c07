//! # Transactional Dataset
//!
//! Multi-reader / single-writer quad store fed by the transaction log.
//!
//! - Readers take an `Arc` snapshot of the committed `QuadSet`; they never
//!   block writers and never see an intermediate state.
//! - One writer at a time holds the writer lock, acquired with a bounded
//!   wait. Its changes live in an overlay until commit.
//! - Every effective change is notified to the log through a
//!   `ChangeSink::Append`. Commit makes the log record durable first and
//!   only then swaps the new snapshot in.
//! - Dropping an uncommitted `WriteTxn` rolls it back.
//!
//! On open, the committed graph is rebuilt by replaying the whole log.

use crate::graph::{QuadPattern, QuadSet, QuadStore};
use crate::sink::ChangeSink;
use crate::storage::{TransactionHeader, TransactionLog};
use crate::{Quad, QuadFsError};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// DATASET
// =============================================================================

/// The live graph plus its log.
pub struct Dataset {
    snapshot: RwLock<Arc<QuadSet>>,
    writer: Mutex<()>,
    log: Arc<TransactionLog>,
    write_timeout: Duration,
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("quads", &self.snapshot.read().len())
            .field("log", &self.log)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl Dataset {
    /// Open a dataset over `log`, replaying every committed record.
    pub fn open(log: Arc<TransactionLog>, write_timeout: Duration) -> Result<Self, QuadFsError> {
        let mut graph = QuadSet::new();
        let replayed = log.replay(&mut ChangeSink::apply(&mut graph))?;
        tracing::info!(
            transactions = replayed,
            quads = graph.len(),
            "dataset rebuilt from transaction log"
        );
        Ok(Self {
            snapshot: RwLock::new(Arc::new(graph)),
            writer: Mutex::new(()),
            log,
            write_timeout,
        })
    }

    /// The committed state at call time.
    pub fn begin_read(&self) -> Arc<QuadSet> {
        Arc::clone(&self.snapshot.read())
    }

    /// Start a write transaction, waiting at most the configured timeout
    /// for the writer lock.
    pub fn begin_write(&self, header: TransactionHeader) -> Result<WriteTxn<'_>, QuadFsError> {
        let guard = self.lock_writer()?;

        let mut sink = ChangeSink::Append(self.log.as_ref());
        sink.on_start(&header)?;

        Ok(WriteTxn {
            dataset: self,
            _guard: guard,
            base: self.begin_read(),
            added: BTreeSet::new(),
            removed: BTreeSet::new(),
            sink,
            finished: false,
        })
    }

    /// The committed state together with the number of log records it
    /// reflects. Waits for an in-flight commit to finish.
    pub fn consistent_read(&self) -> Result<(Arc<QuadSet>, u64), QuadFsError> {
        let _guard = self.lock_writer()?;
        Ok((self.begin_read(), self.log.size()))
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>, QuadFsError> {
        self.writer.try_lock_for(self.write_timeout).ok_or_else(|| {
            QuadFsError::Timeout(format!(
                "writer lock not acquired within {} ms",
                self.write_timeout.as_millis()
            ))
        })
    }

    pub fn log(&self) -> &Arc<TransactionLog> {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// WRITE TRANSACTION
// =============================================================================

/// An active write transaction.
///
/// Reads through the transaction see the committed base plus this
/// transaction's own changes.
pub struct WriteTxn<'a> {
    dataset: &'a Dataset,
    _guard: MutexGuard<'a, ()>,
    base: Arc<QuadSet>,
    added: BTreeSet<Quad>,
    removed: BTreeSet<Quad>,
    sink: ChangeSink<'a>,
    finished: bool,
}

impl WriteTxn<'_> {
    /// Add a quad. Returns false (and notifies nothing) if it was present.
    pub fn add(&mut self, quad: Quad) -> Result<bool, QuadFsError> {
        if self.contains(&quad) {
            return Ok(false);
        }
        self.sink.on_add(&quad)?;
        if !self.removed.remove(&quad) {
            self.added.insert(quad);
        }
        Ok(true)
    }

    /// Delete a quad. Returns false (and notifies nothing) if it was absent.
    pub fn delete(&mut self, quad: &Quad) -> Result<bool, QuadFsError> {
        if !self.contains(quad) {
            return Ok(false);
        }
        self.sink.on_delete(quad)?;
        if !self.added.remove(quad) {
            self.removed.insert(quad.clone());
        }
        Ok(true)
    }

    /// Delete every quad matching the pattern. Returns how many went.
    pub fn delete_matching(&mut self, pattern: &QuadPattern) -> Result<usize, QuadFsError> {
        let doomed = self.find(pattern);
        for quad in &doomed {
            self.delete(quad)?;
        }
        Ok(doomed.len())
    }

    /// Whether this transaction changed anything.
    pub fn is_dirty(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Make the log record durable, then publish the new snapshot.
    ///
    /// If the log append fails nothing is published and the error is
    /// returned; the log treats the transaction as rolled back.
    pub fn commit(self) -> Result<(), QuadFsError> {
        self.commit_with(|| Ok(()))
    }

    /// Like [`commit`](Self::commit), but runs `before_publish` once the
    /// log record is durable and before any reader can see the new
    /// snapshot. The writer lock is held throughout.
    ///
    /// The snapshot is published even if `before_publish` fails, since the
    /// log already holds the transaction; its error is then returned.
    pub fn commit_with<F>(mut self, before_publish: F) -> Result<(), QuadFsError>
    where
        F: FnOnce() -> Result<(), QuadFsError>,
    {
        self.finished = true;
        if let Err(e) = self.sink.on_commit() {
            tracing::error!(error = %e, "commit failed, transaction rolled back");
            return Err(e);
        }
        let hooked = before_publish();

        let added = std::mem::take(&mut self.added);
        let removed = std::mem::take(&mut self.removed);
        // Release our reference so make_mut only clones when readers still
        // hold the old snapshot.
        self.base = Arc::new(QuadSet::new());

        let mut snapshot = self.dataset.snapshot.write();
        let graph = Arc::make_mut(&mut *snapshot);
        for quad in &removed {
            graph.remove(quad);
        }
        for quad in added {
            graph.insert(quad);
        }
        hooked
    }

    /// Discard every change made in this transaction.
    pub fn abort(mut self) -> Result<(), QuadFsError> {
        self.finished = true;
        self.sink.on_rollback()
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.sink.on_rollback() {
                tracing::warn!(error = %e, "rollback of dropped transaction failed");
            } else {
                tracing::debug!("uncommitted transaction rolled back on drop");
            }
        }
    }
}

impl QuadStore for WriteTxn<'_> {
    fn contains(&self, quad: &Quad) -> bool {
        self.added.contains(quad) || (!self.removed.contains(quad) && self.base.contains(quad))
    }

    fn find(&self, pattern: &QuadPattern) -> Vec<Quad> {
        let mut found: BTreeSet<Quad> = self
            .base
            .find(pattern)
            .into_iter()
            .filter(|q| !self.removed.contains(q))
            .collect();
        found.extend(self.added.iter().filter(|q| pattern.matches(q)).cloned());
        found.into_iter().collect()
    }

    fn len(&self) -> usize {
        self.base.len() + self.added.len() - self.removed.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================
