//! # Blob Storage
//!
//! Binary payloads stored under opaque, randomly generated ids.
//!
//! Writes stream the input once, hashing (BLAKE3) and counting bytes as
//! they go, so a payload is never buffered whole by the local store. A
//! local write lands in a staging file first and is published by an atomic
//! rename; readers never see a partial blob.
//!
//! Ids have the form `blob-<32 hex chars>`. They are not derived from the
//! content, so identical payloads written twice get two ids.

use crate::QuadFsError;
use crate::primitives::{BLOB_ID_PREFIX, BLOB_ID_RANDOM_LENGTH, BLOB_STAGING_DIR, COPY_BUFFER_SIZE};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// BLOB INFO & IDS
// =============================================================================

/// Identity, size and digest of a stored payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub id: String,
    pub size: u64,
    /// Lowercase hex BLAKE3 digest of the exact bytes written.
    pub checksum: String,
}

/// Allocate a fresh blob id.
pub fn new_blob_id() -> String {
    format!("{}{}", BLOB_ID_PREFIX, uuid::Uuid::new_v4().simple())
}

/// Reject ids that were not produced by [`new_blob_id`].
///
/// A valid id is always a safe single path component.
pub fn validate_blob_id(id: &str) -> Result<(), QuadFsError> {
    let valid = id.strip_prefix(BLOB_ID_PREFIX).is_some_and(|random| {
        random.len() == BLOB_ID_RANDOM_LENGTH
            && random
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    });
    if valid {
        Ok(())
    } else {
        Err(QuadFsError::InvalidArgument(format!(
            "malformed blob id: {:?}",
            id
        )))
    }
}

fn check_range(start: u64, end: Option<u64>) -> Result<(), QuadFsError> {
    match end {
        Some(end) if start > end => Err(QuadFsError::InvalidArgument(format!(
            "range start {} is after end {}",
            start, end
        ))),
        _ => Ok(()),
    }
}

// =============================================================================
// DIGESTING
// =============================================================================

/// Writer that digests and counts everything passed through it.
struct DigestWriter<W> {
    inner: W,
    hasher: blake3::Hasher,
    size: u64,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            size: 0,
        }
    }

    fn finish(self, id: String) -> (W, BlobInfo) {
        let info = BlobInfo {
            id,
            size: self.size,
            checksum: self.hasher.finalize().to_hex().to_string(),
        };
        (self.inner, info)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Stream `input` into `output` in bounded chunks.
fn pump(input: &mut dyn Read, output: &mut dyn Write) -> Result<(), QuadFsError> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(QuadFsError::io("read blob input", e)),
        };
        output
            .write_all(&buf[..n])
            .map_err(|e| QuadFsError::io("write blob", e))?;
    }
}

// =============================================================================
// BLOBSTORE TRAIT
// =============================================================================

/// Storage for binary payloads.
pub trait BlobStore: Send + Sync {
    /// Consume `input` once and store it under a fresh id.
    fn write(&self, input: &mut dyn Read) -> Result<BlobInfo, QuadFsError>;

    /// Stream bytes `[start, end)` of a blob into `sink`; `end = None`
    /// reads to EOF. Returns the number of bytes written to `sink`.
    fn read(
        &self,
        id: &str,
        sink: &mut dyn Write,
        start: u64,
        end: Option<u64>,
    ) -> Result<u64, QuadFsError>;

    /// Remove a blob. Returns false if it did not exist.
    fn delete(&self, id: &str) -> Result<bool, QuadFsError>;

    fn exists(&self, id: &str) -> Result<bool, QuadFsError>;

    fn is_read_only(&self) -> bool;

    /// Re-read a blob and recompute its size and digest.
    fn verify(&self, id: &str) -> Result<BlobInfo, QuadFsError> {
        let mut digest = DigestWriter::new(io::sink());
        self.read(id, &mut digest, 0, None)?;
        Ok(digest.finish(id.to_string()).1)
    }
}

// =============================================================================
// LOCAL BLOB STORE
// =============================================================================

/// Blobs as files under a root directory, sharded by the first two
/// characters of the random part of the id.
#[derive(Debug)]
pub struct LocalBlobStore {
    root: PathBuf,
    read_only: bool,
}

impl LocalBlobStore {
    /// Open or create a writable store at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, QuadFsError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(BLOB_STAGING_DIR))
            .map_err(|e| QuadFsError::io("create blob directory", e))?;
        tracing::debug!(root = %root.display(), "blob store opened");
        Ok(Self {
            root,
            read_only: false,
        })
    }

    /// Open an existing store that refuses writes and deletes.
    pub fn open_read_only(root: impl AsRef<Path>) -> Result<Self, QuadFsError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(QuadFsError::NotFound(format!(
                "blob directory {}",
                root.display()
            )));
        }
        Ok(Self {
            root,
            read_only: true,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        let shard = id
            .get(BLOB_ID_PREFIX.len()..BLOB_ID_PREFIX.len() + 2)
            .unwrap_or("00");
        self.root.join(shard).join(id)
    }

    fn refuse_if_read_only(&self, operation: &str) -> Result<(), QuadFsError> {
        if self.read_only {
            return Err(QuadFsError::UnsupportedOperation(format!(
                "{} on a read-only blob store",
                operation
            )));
        }
        Ok(())
    }
}

impl BlobStore for LocalBlobStore {
    fn write(&self, input: &mut dyn Read) -> Result<BlobInfo, QuadFsError> {
        self.refuse_if_read_only("write")?;

        let id = new_blob_id();
        let staged = tempfile::NamedTempFile::new_in(self.root.join(BLOB_STAGING_DIR))
            .map_err(|e| QuadFsError::io("create staging file", e))?;

        let mut digest = DigestWriter::new(staged);
        pump(input, &mut digest)?;
        let (staged, info) = digest.finish(id);
        staged
            .as_file()
            .sync_all()
            .map_err(|e| QuadFsError::io("sync staging file", e))?;

        let path = self.blob_path(&info.id);
        if let Some(shard) = path.parent() {
            fs::create_dir_all(shard).map_err(|e| QuadFsError::io("create blob shard", e))?;
        }
        // Dropping an unpersisted staging file deletes it, so an error on
        // any path above leaves nothing behind.
        staged
            .persist(&path)
            .map_err(|e| QuadFsError::io("publish blob", e.error))?;

        tracing::debug!(id = %info.id, size = info.size, "blob written");
        Ok(info)
    }

    fn read(
        &self,
        id: &str,
        sink: &mut dyn Write,
        start: u64,
        end: Option<u64>,
    ) -> Result<u64, QuadFsError> {
        validate_blob_id(id)?;
        check_range(start, end)?;

        let mut file = match File::open(self.blob_path(id)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(QuadFsError::NotFound(format!("blob {}", id)));
            }
            Err(e) => return Err(QuadFsError::io("open blob", e)),
        };
        file.seek(SeekFrom::Start(start))
            .map_err(|e| QuadFsError::io("seek blob", e))?;

        let limit = end.map_or(u64::MAX, |end| end - start);
        let mut reader = file.take(limit);
        io::copy(&mut reader, sink).map_err(|e| QuadFsError::io("read blob", e))
    }

    fn delete(&self, id: &str) -> Result<bool, QuadFsError> {
        self.refuse_if_read_only("delete")?;
        validate_blob_id(id)?;
        match fs::remove_file(self.blob_path(id)) {
            Ok(()) => {
                tracing::debug!(id, "blob deleted");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(QuadFsError::io("delete blob", e)),
        }
    }

    fn exists(&self, id: &str) -> Result<bool, QuadFsError> {
        validate_blob_id(id)?;
        Ok(self.blob_path(id).is_file())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

// =============================================================================
// MEMORY BLOB STORE
// =============================================================================

/// Blobs held in memory; used by in-memory stores and tests.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Arc<[u8]>>>,
    read_only: bool,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes and deletes.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            read_only: true,
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, input: &mut dyn Read) -> Result<BlobInfo, QuadFsError> {
        if self.read_only {
            return Err(QuadFsError::UnsupportedOperation(
                "write on a read-only blob store".to_string(),
            ));
        }
        let mut digest = DigestWriter::new(Vec::new());
        pump(input, &mut digest)?;
        let (bytes, info) = digest.finish(new_blob_id());
        self.blobs.write().insert(info.id.clone(), bytes.into());
        Ok(info)
    }

    fn read(
        &self,
        id: &str,
        sink: &mut dyn Write,
        start: u64,
        end: Option<u64>,
    ) -> Result<u64, QuadFsError> {
        validate_blob_id(id)?;
        check_range(start, end)?;
        let bytes = self
            .blobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| QuadFsError::NotFound(format!("blob {}", id)))?;

        let len = bytes.len() as u64;
        let from = start.min(len) as usize;
        let to = end.map_or(len, |end| end.min(len)) as usize;
        let slice = &bytes[from..to];
        sink.write_all(slice)
            .map_err(|e| QuadFsError::io("read blob", e))?;
        Ok(slice.len() as u64)
    }

    fn delete(&self, id: &str) -> Result<bool, QuadFsError> {
        if self.read_only {
            return Err(QuadFsError::UnsupportedOperation(
                "delete on a read-only blob store".to_string(),
            ));
        }
        validate_blob_id(id)?;
        Ok(self.blobs.write().remove(id).is_some())
    }

    fn exists(&self, id: &str) -> Result<bool, QuadFsError> {
        validate_blob_id(id)?;
        Ok(self.blobs.read().contains_key(id))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

// =============================================================================
// TESTS
// =============================================================================
