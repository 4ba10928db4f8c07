//! # Store Module
//!
//! Wires the log, dataset, permission index, blob store and filesystem
//! together over one of two backends:
//! - `InMemory`: everything volatile (tests, scratch use)
//! - `Persistent`: a data directory holding `log.redb`, `permissions.redb`
//!   and `blobs/`
//!
//! Opening a persistent store replays the log to rebuild the graph and
//! rebuilds the resource arena from the graph.

use crate::dataset::Dataset;
use crate::export::{canonical_checksum, export_canonical, write_nquads};
use crate::filtered::PermissionFilteredGraph;
use crate::graph::{QuadPattern, QuadSet, QuadStore};
use crate::permissions::PermissionIndex;
use crate::primitives::{DEFAULT_ROOT_IRI, DEFAULT_WRITE_TIMEOUT_MS, FS_BLOB_ID, FS_CHECKSUM};
use crate::query::{self, QueryResults};
use crate::sink::ChangeSink;
use crate::storage::{BlobStore, LocalBlobStore, MemoryBlobStore, TransactionLog};
use crate::vfs::VirtualFileSystem;
use crate::{Principal, QuadFsError, Term};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// File name of the transaction log inside a data directory.
pub const LOG_FILE: &str = "log.redb";
/// File name of the grant table inside a data directory.
pub const PERMISSIONS_FILE: &str = "permissions.redb";
/// Blob directory inside a data directory.
pub const BLOB_DIR: &str = "blobs";

// =============================================================================
// OPTIONS
// =============================================================================

/// Where a store keeps its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    InMemory,
    Persistent { data_dir: PathBuf },
}

impl StorageBackend {
    #[must_use]
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self::Persistent {
            data_dir: data_dir.into(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::InMemory => "memory",
            Self::Persistent { .. } => "persistent",
        }
    }
}

/// Tunables applied when opening a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub root_iri: String,
    pub write_timeout: Duration,
    /// Refuse blob writes and deletes.
    pub read_only_blobs: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            root_iri: DEFAULT_ROOT_IRI.to_string(),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            read_only_blobs: false,
        }
    }
}

// =============================================================================
// REPORTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatus {
    pub backend: String,
    pub data_dir: Option<String>,
    pub root_iri: String,
    pub quads: usize,
    pub log_entries: u64,
    pub blobs_read_only: bool,
    /// BLAKE3 digest of the canonical export of the live graph.
    pub checksum: String,
}

/// Result of an integrity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub log_entries: u64,
    pub live_checksum: String,
    pub replayed_checksum: String,
    pub blobs_checked: usize,
    /// Blob ids that are missing or whose digest no longer matches.
    pub blob_failures: Vec<String>,
}

impl VerifyReport {
    /// The live graph equals a replay of the log and every blob checks out.
    pub fn is_consistent(&self) -> bool {
        self.live_checksum == self.replayed_checksum && self.blob_failures.is_empty()
    }
}

// =============================================================================
// STORE
// =============================================================================

/// An opened store.
#[derive(Debug)]
pub struct Store {
    backend: StorageBackend,
    vfs: VirtualFileSystem,
}

impl Store {
    /// Open a store on `backend`.
    pub fn open(backend: StorageBackend, options: &StoreOptions) -> Result<Self, QuadFsError> {
        let (log, permissions, blobs) = match &backend {
            StorageBackend::InMemory => {
                let blobs = if options.read_only_blobs {
                    MemoryBlobStore::read_only()
                } else {
                    MemoryBlobStore::new()
                };
                (
                    TransactionLog::in_memory()?,
                    PermissionIndex::in_memory()?,
                    Arc::new(blobs) as Arc<dyn BlobStore>,
                )
            }
            StorageBackend::Persistent { data_dir } => {
                std::fs::create_dir_all(data_dir)
                    .map_err(|e| QuadFsError::io("create data directory", e))?;
                let blob_dir = data_dir.join(BLOB_DIR);
                let blobs = if options.read_only_blobs {
                    LocalBlobStore::open_read_only(&blob_dir)?
                } else {
                    LocalBlobStore::open(&blob_dir)?
                };
                (
                    TransactionLog::open(data_dir.join(LOG_FILE))?,
                    PermissionIndex::open(data_dir.join(PERMISSIONS_FILE))?,
                    Arc::new(blobs) as Arc<dyn BlobStore>,
                )
            }
        };

        let dataset = Arc::new(Dataset::open(Arc::new(log), options.write_timeout)?);
        let graph = PermissionFilteredGraph::new(dataset, Arc::new(permissions));
        let vfs = VirtualFileSystem::open(graph, blobs, &options.root_iri)?;

        tracing::info!(
            backend = backend.name(),
            root = %options.root_iri,
            "store opened"
        );
        Ok(Self { backend, vfs })
    }

    /// Volatile store with default options.
    pub fn in_memory() -> Result<Self, QuadFsError> {
        Self::open(StorageBackend::InMemory, &StoreOptions::default())
    }

    /// Persistent store in `data_dir` with default options.
    pub fn persistent(data_dir: impl AsRef<Path>) -> Result<Self, QuadFsError> {
        Self::open(
            StorageBackend::persistent(data_dir.as_ref()),
            &StoreOptions::default(),
        )
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    pub fn vfs(&self) -> &VirtualFileSystem {
        &self.vfs
    }

    pub fn graph(&self) -> &PermissionFilteredGraph {
        self.vfs.graph()
    }

    pub fn permissions(&self) -> &Arc<PermissionIndex> {
        self.vfs.graph().permissions()
    }

    pub fn log(&self) -> &Arc<TransactionLog> {
        self.vfs.graph().dataset().log()
    }

    /// Run a read-only query as `principal`; only quads the principal can
    /// read take part.
    pub fn query(&self, principal: &Principal, text: &str) -> Result<QueryResults, QuadFsError> {
        let txn = self.graph().begin_read(principal);
        query::execute(&txn, text)
    }

    pub fn status(&self) -> Result<StoreStatus, QuadFsError> {
        let snapshot = self.graph().dataset().begin_read();
        Ok(StoreStatus {
            backend: self.backend.name().to_string(),
            data_dir: match &self.backend {
                StorageBackend::Persistent { data_dir } => Some(data_dir.display().to_string()),
                StorageBackend::InMemory => None,
            },
            root_iri: self.vfs.root_iri().to_string(),
            quads: snapshot.len(),
            log_entries: self.log().size(),
            blobs_read_only: self.vfs.blobs().is_read_only(),
            checksum: canonical_checksum(&snapshot)?,
        })
    }

    /// Canonical export of the whole graph, unfiltered.
    pub fn export_canonical(&self) -> Result<Vec<u8>, QuadFsError> {
        export_canonical(&self.graph().dataset().begin_read())
    }

    /// N-Quads of everything `principal` can read.
    pub fn export_nquads(
        &self,
        principal: &Principal,
        out: &mut dyn Write,
    ) -> Result<u64, QuadFsError> {
        let txn = self.graph().begin_read(principal);
        let visible: QuadSet = txn.find(&QuadPattern::any()).into_iter().collect();
        write_nquads(&visible, out)
    }

    /// Replay the log into a fresh graph and compare it with the live one,
    /// then re-hash every referenced blob.
    ///
    /// The live graph and the replayed prefix are taken at the same commit
    /// boundary, so concurrent writers do not cause false mismatches.
    pub fn verify(&self) -> Result<VerifyReport, QuadFsError> {
        let (live, committed) = self.graph().dataset().consistent_read()?;
        let mut replayed = QuadSet::new();
        let log_entries = self
            .log()
            .replay_prefix(committed, &mut ChangeSink::apply(&mut replayed))?;

        let mut blobs_checked = 0;
        let mut blob_failures = Vec::new();
        for quad in live.find(&QuadPattern::default_graph().predicate(Term::iri(FS_BLOB_ID))) {
            let Some(id) = quad.object.as_literal() else {
                continue;
            };
            let expected = live
                .find(
                    &QuadPattern::default_graph()
                        .subject(quad.subject.clone())
                        .predicate(Term::iri(FS_CHECKSUM)),
                )
                .into_iter()
                .find_map(|q| q.object.as_literal().map(str::to_string));
            blobs_checked += 1;
            match self.vfs.blobs().verify(id) {
                Ok(info) if expected.as_deref().is_none_or(|c| c == info.checksum) => {}
                Ok(_) => {
                    tracing::warn!(blob = %id, "blob digest mismatch");
                    blob_failures.push(id.to_string());
                }
                Err(e) => {
                    tracing::warn!(blob = %id, error = %e, "blob unreadable");
                    blob_failures.push(id.to_string());
                }
            }
        }
        blob_failures.sort();
        blob_failures.dedup();

        Ok(VerifyReport {
            log_entries,
            live_checksum: canonical_checksum(&live)?,
            replayed_checksum: canonical_checksum(&replayed)?,
            blobs_checked,
            blob_failures,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::CommitContext;
    use crate::access::AccessLevel;

    fn admin() -> CommitContext {
        CommitContext::new(Principal::admin("root", "Root"))
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = Store::persistent(dir.path()).expect("open");
            store.vfs().mkdir(&admin(), "/docs").expect("mkdir");
            store
                .vfs()
                .write(&admin(), "/docs/readme", &mut &b"persisted"[..])
                .expect("write");
            store
                .vfs()
                .set_permission(&admin().principal, "/docs", "alice", AccessLevel::Read)
                .expect("grant");
        }

        let store = Store::persistent(dir.path()).expect("reopen");
        let alice = Principal::new("alice", "Alice");
        let mut out = Vec::new();
        store
            .vfs()
            .read(&alice, "/docs/readme", &mut out, 0, None)
            .expect("read after reopen");
        assert_eq!(out, b"persisted");
        // Root creation, mkdir and write.
        assert_eq!(store.log().size(), 3);
    }

    #[test]
    fn status_reports_counts() {
        let store = Store::in_memory().expect("open");
        let before = store.status().expect("status");
        store.vfs().mkdir(&admin(), "/a").expect("mkdir");
        let after = store.status().expect("status");
        assert_eq!(after.backend, "memory");
        assert_eq!(after.log_entries, before.log_entries + 1);
        assert!(after.quads > before.quads);
        assert_ne!(after.checksum, before.checksum);
    }

    #[test]
    fn verify_is_consistent_after_mutations() {
        let store = Store::in_memory().expect("open");
        let vfs = store.vfs();
        vfs.mkdir(&admin(), "/x/y").expect("mkdir");
        vfs.write(&admin(), "/x/y/f", &mut &b"abc"[..]).expect("write");
        vfs.copy(&admin(), "/x", "/z", false).expect("copy");
        vfs.delete(&admin(), "/x").expect("delete");

        let report = store.verify().expect("verify");
        assert!(report.is_consistent(), "{:?}", report);
        assert_eq!(report.blobs_checked, 1);
    }

    #[test]
    fn verify_stays_consistent_under_concurrent_writes() {
        let store = Arc::new(Store::in_memory().expect("open"));
        store.vfs().mkdir(&admin(), "/busy").expect("mkdir");
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..40 {
                    store
                        .vfs()
                        .write(&admin(), &format!("/busy/f{}", i), &mut &b"x"[..])
                        .expect("write");
                }
            })
        };
        for _ in 0..20 {
            let report = store.verify().expect("verify");
            assert!(report.is_consistent(), "{:?}", report);
        }
        writer.join().expect("join");
        assert!(store.verify().expect("verify").is_consistent());
    }

    #[test]
    fn query_is_filtered_by_principal() {
        let store = Store::in_memory().expect("open");
        store.vfs().mkdir(&admin(), "/private").expect("mkdir");
        let text = "SELECT ?d WHERE { ?d a fs:Directory }";

        let all = store.query(&admin().principal, text).expect("query");
        assert_eq!(all.len(), 2);
        let anon = store.query(&Principal::anonymous(), text).expect("query");
        assert!(anon.is_empty());
    }

    #[test]
    fn read_only_blobs_reject_writes() {
        let options = StoreOptions {
            read_only_blobs: true,
            ..StoreOptions::default()
        };
        let store = Store::open(StorageBackend::InMemory, &options).expect("open");
        store.vfs().mkdir(&admin(), "/d").expect("mkdir");
        assert!(matches!(
            store.vfs().write(&admin(), "/d/f", &mut &b"x"[..]),
            Err(QuadFsError::UnsupportedOperation(_))
        ));
        assert!(store.vfs().stat(&admin().principal, "/d/f").is_err());
    }

    #[test]
    fn nquads_export_hides_unreadable() {
        let store = Store::in_memory().expect("open");
        store.vfs().mkdir(&admin(), "/hidden").expect("mkdir");
        let mut all = Vec::new();
        let mut anon = Vec::new();
        assert!(store.export_nquads(&admin().principal, &mut all).expect("export") > 0);
        assert_eq!(
            store
                .export_nquads(&Principal::anonymous(), &mut anon)
                .expect("export"),
            0
        );
    }
}
