//! # Storage
//!
//! Durable components owned exclusively by the store:
//! - `blob`: binary payloads keyed by opaque blob ids
//! - `txn_log`: the append-only record of committed graph mutations

pub mod blob;
pub mod txn_log;

pub use blob::{BlobInfo, BlobStore, LocalBlobStore, MemoryBlobStore, new_blob_id, validate_blob_id};
pub use txn_log::{QuadDelta, TransactionHeader, TransactionLog, TransactionRecord};
