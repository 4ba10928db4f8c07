//! # quadfs-core
//!
//! A permission-enforcing, transaction-logged quad store with a blob store,
//! presented as a hierarchical filesystem.
//!
//! ## Layers
//!
//! - `storage`: content-addressed-by-id blob store and the durable
//!   transaction log
//! - `dataset`: multi-reader / single-writer graph rebuilt from the log
//! - `permissions`: grants over a resource containment arena, resolved by
//!   walking ancestors
//! - `filtered`: read transactions that only expose what a principal can
//!   read
//! - `vfs`: paths, files and directories over graph nodes and blobs
//! - `store`: wires the above over an in-memory or on-disk backend
//!
//! ## Constraints
//!
//! - No async, no network dependencies
//! - Ordered collections only; replaying the log rebuilds the same graph
//! - Every mutation carries the acting principal and an optional commit
//!   message into its log record

// =============================================================================
// MODULES
// =============================================================================

pub mod access;
pub mod dataset;
pub mod export;
pub mod filtered;
pub mod graph;
pub mod path;
pub mod permissions;
pub mod primitives;
pub mod query;
pub mod sink;
pub mod storage;
pub mod store;
pub mod types;
pub mod vfs;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use types::{CommitContext, Principal, Quad, QuadFsError, Term};

pub use access::{AccessLevel, AccessView};
pub use dataset::{Dataset, WriteTxn};
pub use export::{
    CanonicalHeader, canonical_checksum, export_canonical, import_canonical, verify_canonical,
    write_nquads,
};
pub use filtered::{FilteredReadTxn, FilteredWriteTxn, PermissionFilteredGraph};
pub use graph::{GraphMatch, QuadPattern, QuadSet, QuadStore};
pub use path::VfsPath;
pub use permissions::{PermissionEvent, PermissionIndex, PermissionListener};
pub use query::{QueryResults, SelectQuery, SparqlJson};
pub use sink::ChangeSink;
pub use storage::{
    BlobInfo, BlobStore, LocalBlobStore, MemoryBlobStore, QuadDelta, TransactionHeader,
    TransactionLog, TransactionRecord,
};
pub use store::{StorageBackend, Store, StoreOptions, StoreStatus, VerifyReport};
pub use vfs::{FileInfo, TransferOutcome, VirtualFileSystem, WriteOutcome};
