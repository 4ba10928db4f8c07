//! # Primitives
//!
//! Hardcoded constants and vocabulary for the quadfs store.
//!
//! These are compiled into the binary and immutable at runtime:
//! 1. **Vocabulary**: the IRIs the virtual filesystem writes into the graph.
//! 2. **Limits**: bounds on paths, queries and I/O buffers.
//! 3. **Formats**: magic bytes and identifiers for persisted data.

// =============================================================================
// VOCABULARY
// =============================================================================

/// Namespace of the filesystem vocabulary.
pub const FS_NS: &str = "http://quadfs.dev/ns/fs#";

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
pub const XSD_LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

/// Class of container nodes.
pub const FS_DIRECTORY: &str = "http://quadfs.dev/ns/fs#Directory";
/// Class of file nodes.
pub const FS_FILE: &str = "http://quadfs.dev/ns/fs#File";
/// Parent -> child containment edge.
pub const FS_CONTAINS: &str = "http://quadfs.dev/ns/fs#contains";
pub const FS_CREATED_BY: &str = "http://quadfs.dev/ns/fs#createdBy";
pub const FS_MODIFIED_BY: &str = "http://quadfs.dev/ns/fs#modifiedBy";
pub const FS_DATE_CREATED: &str = "http://quadfs.dev/ns/fs#dateCreated";
pub const FS_DATE_MODIFIED: &str = "http://quadfs.dev/ns/fs#dateModified";
pub const FS_FILE_SIZE: &str = "http://quadfs.dev/ns/fs#fileSize";
pub const FS_BLOB_ID: &str = "http://quadfs.dev/ns/fs#blobId";
pub const FS_CHECKSUM: &str = "http://quadfs.dev/ns/fs#checksum";

/// Default root IRI of the virtual filesystem.
pub const DEFAULT_ROOT_IRI: &str = "http://localhost/quadfs";

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum number of segments in a filesystem path.
pub const MAX_PATH_DEPTH: usize = 64;

/// Maximum byte length of one path segment.
pub const MAX_SEGMENT_LENGTH: usize = 255;

/// Buffer size for streaming blob copies.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Default bound on waiting for the dataset writer lock.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 30_000;

/// Maximum byte length of a query text.
pub const MAX_QUERY_LENGTH: usize = 16 * 1024;

/// Maximum number of triple patterns in one query.
pub const MAX_QUERY_PATTERNS: usize = 32;

/// Row cap applied when a query carries no LIMIT.
pub const DEFAULT_QUERY_LIMIT: usize = 10_000;

/// Candidate quads one query may examine before evaluation is abandoned.
pub const MAX_QUERY_STEPS: usize = 1_000_000;

// =============================================================================
// FORMATS
// =============================================================================

/// Prefix of every blob identifier.
pub const BLOB_ID_PREFIX: &str = "blob-";

/// Length of the random part of a blob identifier (uuid, simple form).
pub const BLOB_ID_RANDOM_LENGTH: usize = 32;

/// Subdirectory of a local blob store used to stage in-flight writes.
pub const BLOB_STAGING_DIR: &str = "tmp";
