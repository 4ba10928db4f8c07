//! # Virtual Filesystem
//!
//! A `/`-delimited path space over graph nodes and blob references.
//!
//! ## Graph Layout
//!
//! Every entry is an opaque node IRI (`{root}/node/{uuid}`) carrying
//! `rdf:type fs:Directory|fs:File`, an `rdfs:label` with its name and
//! authorship/timestamp properties. Files also carry `fs:blobId`,
//! `fs:fileSize` and `fs:checksum`. A parent points at each child with
//! `fs:contains`. The root directory node is the configured root IRI.
//!
//! ## Authorisation
//!
//! Structural lookups read the unfiltered graph; access is checked here
//! against the `PermissionIndex`:
//! - entries the principal cannot `List` are reported as not found
//! - reading content needs `Read`
//! - creating, replacing, moving and deleting need `Write`
//!
//! The root directory is listable by everyone.
//!
//! ## Transactions
//!
//! Each mutation runs in one filtered write transaction attributed to the
//! caller's `CommitContext`, producing exactly one log record. The
//! permission arena is updated only after the commit succeeds.

use crate::access::{AccessLevel, AccessView};
use crate::filtered::{FilteredWriteTxn, PermissionFilteredGraph};
use crate::graph::{QuadPattern, QuadStore};
use crate::path::VfsPath;
use crate::primitives::{
    FS_BLOB_ID, FS_CHECKSUM, FS_CONTAINS, FS_CREATED_BY, FS_DATE_CREATED, FS_DATE_MODIFIED,
    FS_DIRECTORY, FS_FILE, FS_FILE_SIZE, FS_MODIFIED_BY, MAX_PATH_DEPTH, RDF_TYPE, RDFS_LABEL,
    XSD_DATE_TIME, XSD_LONG,
};
use crate::storage::{BlobInfo, BlobStore};
use crate::{CommitContext, Principal, Quad, QuadFsError, Term};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::sync::Arc;

/// Identity recorded for changes the filesystem makes on its own behalf.
pub const SYSTEM_USER: &str = "system";

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Projection of one entry, recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub is_directory: bool,
    /// Byte length for files, 0 for directories.
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub is_readable: bool,
    pub is_writeable: bool,
    /// Id of the user that created the entry.
    pub owner: Option<String>,
    pub checksum: Option<String>,
    pub blob_id: Option<String>,
}

/// Outcome of a copy or move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub info: FileInfo,
    /// True if an existing destination was overwritten.
    pub replaced: bool,
}

/// Outcome of a file write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub blob: BlobInfo,
    /// True if the file existed when the write was linked.
    pub replaced: bool,
}

/// Arena updates applied while the graph transaction commits.
#[derive(Debug)]
enum ArenaChange {
    Attach { child: String, parent: String },
    Reparent { child: String, parent: String },
    Remove(String),
    GrantCreator { resource: String, subject: String },
}

// =============================================================================
// GRAPH HELPERS
// =============================================================================

fn iri(value: &str) -> Term {
    Term::iri(value)
}

fn contains_edge(parent: &str, child: &str) -> Quad {
    Quad::new(iri(parent), iri(FS_CONTAINS), iri(child))
}

fn first_object(view: &dyn QuadStore, node: &str, predicate: &str) -> Option<Term> {
    view.find(
        &QuadPattern::default_graph()
            .subject(iri(node))
            .predicate(iri(predicate)),
    )
    .into_iter()
    .next()
    .map(|q| q.object)
}

fn literal_of(view: &dyn QuadStore, node: &str, predicate: &str) -> Option<String> {
    first_object(view, node, predicate).and_then(|t| t.as_literal().map(str::to_string))
}

fn datetime_of(view: &dyn QuadStore, node: &str, predicate: &str) -> Option<DateTime<Utc>> {
    literal_of(view, node, predicate)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn is_directory(view: &dyn QuadStore, node: &str) -> bool {
    view.contains(&Quad::new(iri(node), iri(RDF_TYPE), iri(FS_DIRECTORY)))
}

fn child_named(view: &dyn QuadStore, parent: &str, name: &str) -> Option<String> {
    view.find(
        &QuadPattern::default_graph()
            .predicate(iri(RDFS_LABEL))
            .object(Term::literal(name)),
    )
    .into_iter()
    .filter_map(|q| q.subject.as_iri().map(str::to_string))
    .find(|child| view.contains(&contains_edge(parent, child)))
}

fn children(view: &dyn QuadStore, parent: &str) -> Vec<String> {
    view.find(
        &QuadPattern::default_graph()
            .subject(iri(parent))
            .predicate(iri(FS_CONTAINS)),
    )
    .into_iter()
    .filter_map(|q| q.object.as_iri().map(str::to_string))
    .collect()
}

fn parent_of(view: &dyn QuadStore, node: &str) -> Option<String> {
    view.find(
        &QuadPattern::default_graph()
            .predicate(iri(FS_CONTAINS))
            .object(iri(node)),
    )
    .into_iter()
    .find_map(|q| q.subject.as_iri().map(str::to_string))
}

/// `node` and all its descendants, parents before children.
fn subtree(view: &dyn QuadStore, node: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = BTreeSet::new();
    let mut stack = vec![node.to_string()];
    while let Some(current) = stack.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        stack.extend(children(view, &current));
        out.push(current);
    }
    out
}

fn now_literal() -> Term {
    Term::typed(
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        XSD_DATE_TIME,
    )
}

// =============================================================================
// VIRTUAL FILESYSTEM
// =============================================================================

/// Path-shaped operations over the filtered graph and the blob store.
pub struct VirtualFileSystem {
    graph: PermissionFilteredGraph,
    blobs: Arc<dyn BlobStore>,
    root: String,
}

impl std::fmt::Debug for VirtualFileSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualFileSystem")
            .field("root", &self.root)
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}

impl VirtualFileSystem {
    /// Open the filesystem rooted at `root_iri`, creating the root
    /// directory node if needed and rebuilding the permission arena from
    /// the graph's containment edges.
    pub fn open(
        graph: PermissionFilteredGraph,
        blobs: Arc<dyn BlobStore>,
        root_iri: &str,
    ) -> Result<Self, QuadFsError> {
        let root = root_iri.trim_end_matches('/').to_string();
        if root.is_empty() {
            return Err(QuadFsError::InvalidArgument(
                "root IRI must not be empty".to_string(),
            ));
        }
        let vfs = Self { graph, blobs, root };
        vfs.ensure_root()?;
        vfs.reindex();
        Ok(vfs)
    }

    pub fn root_iri(&self) -> &str {
        &self.root
    }

    pub fn graph(&self) -> &PermissionFilteredGraph {
        &self.graph
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    fn ensure_root(&self) -> Result<(), QuadFsError> {
        if is_directory(&*self.graph.dataset().begin_read(), &self.root) {
            return Ok(());
        }
        let ctx = CommitContext::new(Principal::admin(SYSTEM_USER, SYSTEM_USER))
            .with_message("initialize filesystem");
        let mut txn = self.graph.begin_write(&ctx, "mkdir /")?;
        let now = now_literal();
        let root = iri(&self.root);
        txn.add(Quad::new(root.clone(), iri(RDF_TYPE), iri(FS_DIRECTORY)))?;
        txn.add(Quad::new(root.clone(), iri(RDFS_LABEL), Term::literal("")))?;
        txn.add(Quad::new(
            root.clone(),
            iri(FS_CREATED_BY),
            Term::literal(SYSTEM_USER),
        ))?;
        txn.add(Quad::new(root.clone(), iri(FS_DATE_CREATED), now.clone()))?;
        txn.add(Quad::new(root, iri(FS_DATE_MODIFIED), now))?;
        txn.commit()?;
        tracing::info!(root = %self.root, "filesystem root created");
        Ok(())
    }

    /// Rebuild the permission arena from `fs:contains` edges.
    pub fn reindex(&self) {
        let snapshot = self.graph.dataset().begin_read();
        let links = snapshot
            .find(&QuadPattern::default_graph().predicate(iri(FS_CONTAINS)))
            .into_iter()
            .filter_map(|q| match (q.subject, q.object) {
                (Term::Iri(parent), Term::Iri(child)) => Some((child, parent)),
                _ => None,
            });
        self.graph.permissions().rebuild_structure(links);
    }

    // ===== ACCESS =====

    fn access_level(&self, principal: &Principal, node: &str) -> AccessLevel {
        let level = self.graph.permissions().resolve_principal(principal, node);
        if node == self.root {
            level.max(AccessLevel::List)
        } else {
            level
        }
    }

    /// Entries the principal cannot list are reported as missing.
    fn require(
        &self,
        principal: &Principal,
        node: &str,
        path: &VfsPath,
        required: AccessLevel,
    ) -> Result<AccessLevel, QuadFsError> {
        let level = self.access_level(principal, node);
        if level.implies(required) {
            Ok(level)
        } else if level.can_list() {
            Err(QuadFsError::PermissionDenied(format!(
                "{} requires {} access",
                path, required
            )))
        } else {
            Err(QuadFsError::NotFound(path.to_string()))
        }
    }

    fn lookup(&self, view: &dyn QuadStore, path: &VfsPath) -> Result<String, QuadFsError> {
        let mut current = self.root.clone();
        for name in path.segments() {
            current = child_named(view, &current, name)
                .ok_or_else(|| QuadFsError::NotFound(path.to_string()))?;
        }
        Ok(current)
    }

    fn describe(
        &self,
        view: &dyn QuadStore,
        principal: &Principal,
        node: &str,
        path: &VfsPath,
    ) -> FileInfo {
        let level = self.access_level(principal, node);
        let is_directory = is_directory(view, node);
        let (checksum, blob_id) = if is_directory {
            (None, None)
        } else {
            (
                literal_of(view, node, FS_CHECKSUM),
                literal_of(view, node, FS_BLOB_ID),
            )
        };
        FileInfo {
            path: path.to_string(),
            is_directory,
            size: literal_of(view, node, FS_FILE_SIZE)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            created: datetime_of(view, node, FS_DATE_CREATED),
            modified: datetime_of(view, node, FS_DATE_MODIFIED),
            is_readable: level.can_read(),
            is_writeable: level.can_write(),
            owner: literal_of(view, node, FS_CREATED_BY),
            checksum,
            blob_id,
        }
    }

    fn describe_committed(&self, principal: &Principal, node: &str, path: &VfsPath) -> FileInfo {
        let txn = self.graph.begin_read(principal);
        self.describe(txn.raw(), principal, node, path)
    }

    // ===== READ OPERATIONS =====

    /// Describe the entry at `path`.
    pub fn stat(&self, principal: &Principal, path: &str) -> Result<FileInfo, QuadFsError> {
        let path = VfsPath::parse(path)?;
        let txn = self.graph.begin_read(principal);
        let node = self.lookup(txn.raw(), &path)?;
        self.require(principal, &node, &path, AccessLevel::List)?;
        Ok(self.describe(txn.raw(), principal, &node, &path))
    }

    /// Children of the directory at `path` the principal can list, by name.
    pub fn list(&self, principal: &Principal, path: &str) -> Result<Vec<FileInfo>, QuadFsError> {
        let path = VfsPath::parse(path)?;
        let txn = self.graph.begin_read(principal);
        let view = txn.raw();
        let node = self.lookup(view, &path)?;
        self.require(principal, &node, &path, AccessLevel::List)?;
        if !is_directory(view, &node) {
            return Err(QuadFsError::NotADirectory(path.to_string()));
        }

        let mut entries: Vec<FileInfo> = children(view, &node)
            .into_iter()
            .filter(|child| self.access_level(principal, child).can_list())
            .filter_map(|child| {
                let name = literal_of(view, &child, RDFS_LABEL)?;
                Some(self.describe(view, principal, &child, &path.child(&name)))
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Stream bytes `[start, end)` of the file at `path` into `sink`.
    pub fn read(
        &self,
        principal: &Principal,
        path: &str,
        sink: &mut dyn Write,
        start: u64,
        end: Option<u64>,
    ) -> Result<u64, QuadFsError> {
        let path = VfsPath::parse(path)?;
        let blob_id = {
            let txn = self.graph.begin_read(principal);
            let view = txn.raw();
            let node = self.lookup(view, &path)?;
            self.require(principal, &node, &path, AccessLevel::Read)?;
            if is_directory(view, &node) {
                return Err(QuadFsError::IsADirectory(path.to_string()));
            }
            literal_of(view, &node, FS_BLOB_ID)
                .ok_or_else(|| QuadFsError::NotFound(format!("content of {}", path)))?
        };
        self.blobs.read(&blob_id, sink, start, end)
    }

    /// Capabilities of `principal` on the entry at `path`. Top-level
    /// directories are reported as workspaces.
    pub fn access(&self, principal: &Principal, path: &str) -> Result<AccessView, QuadFsError> {
        let path = VfsPath::parse(path)?;
        let txn = self.graph.begin_read(principal);
        let node = self.lookup(txn.raw(), &path)?;
        let level = self.require(principal, &node, &path, AccessLevel::List)?;
        if path.depth() == 1 && is_directory(txn.raw(), &node) {
            Ok(AccessView::workspace(node, level))
        } else {
            Ok(AccessView::resource(node, level))
        }
    }

    /// Direct grants on the entry at `path`; requires `Manage`.
    pub fn permissions_of(
        &self,
        principal: &Principal,
        path: &str,
    ) -> Result<Vec<(String, AccessLevel)>, QuadFsError> {
        let path = VfsPath::parse(path)?;
        let txn = self.graph.begin_read(principal);
        let node = self.lookup(txn.raw(), &path)?;
        self.require(principal, &node, &path, AccessLevel::Manage)?;
        Ok(self.graph.permissions().permissions_of(&node))
    }

    /// The node IRI behind `path`.
    pub fn resource_iri(&self, principal: &Principal, path: &str) -> Result<String, QuadFsError> {
        let path = VfsPath::parse(path)?;
        let txn = self.graph.begin_read(principal);
        let node = self.lookup(txn.raw(), &path)?;
        self.require(principal, &node, &path, AccessLevel::List)?;
        Ok(node)
    }

    // ===== PERMISSION CHANGES =====

    /// Checked grant on the entry at `path` on behalf of `acting`.
    /// Returns the subject's previous direct level.
    pub fn set_permission(
        &self,
        acting: &Principal,
        path: &str,
        subject: &str,
        level: AccessLevel,
    ) -> Result<AccessLevel, QuadFsError> {
        let node = self.resource_iri(acting, path)?;
        self.graph
            .permissions()
            .set_permission(acting, subject, &node, level)
    }

    // ===== MUTATIONS =====

    /// Create the directory at `path` and any missing ancestors.
    pub fn mkdir(&self, ctx: &CommitContext, path: &str) -> Result<FileInfo, QuadFsError> {
        let path = VfsPath::parse(path)?;
        let principal = &ctx.principal;
        if path.is_root() {
            return self.stat(principal, "/");
        }

        let mut txn = self.graph.begin_write(ctx, format!("mkdir {}", path))?;
        let now = now_literal();
        let mut changes = Vec::new();
        let mut current = self.root.clone();
        let mut current_path = VfsPath::root();

        for name in path.segments() {
            let child_path = current_path.child(name);
            current = match child_named(txn.raw(), &current, name) {
                Some(child) if is_directory(txn.raw(), &child) => child,
                Some(_) if child_path == path => {
                    return Err(QuadFsError::AlreadyExists(child_path.to_string()));
                }
                Some(_) => return Err(QuadFsError::NotADirectory(child_path.to_string())),
                None => {
                    self.require(principal, &current, &current_path, AccessLevel::Write)?;
                    self.create_node(
                        &mut txn,
                        &current,
                        name,
                        FS_DIRECTORY,
                        principal,
                        &now,
                        &mut changes,
                    )?
                }
            };
            current_path = child_path;
        }

        if txn.is_dirty() {
            self.commit(txn, changes)?;
            tracing::debug!(path = %path, "directory created");
        } else {
            txn.abort()?;
            self.require(principal, &current, &path, AccessLevel::List)?;
        }
        Ok(self.describe_committed(principal, &current, &path))
    }

    /// Store `input` as the content of the file at `path`, creating the
    /// file if needed. The blob is written first and linked in a second
    /// step; a replaced blob is left in the store.
    pub fn write(
        &self,
        ctx: &CommitContext,
        path: &str,
        input: &mut dyn Read,
    ) -> Result<WriteOutcome, QuadFsError> {
        let path = VfsPath::parse(path)?;
        if path.is_root() {
            return Err(QuadFsError::InvalidArgument(
                "cannot write to the root directory".to_string(),
            ));
        }

        // Fail fast before consuming the stream.
        {
            let txn = self.graph.begin_read(&ctx.principal);
            self.plan_write(txn.raw(), &ctx.principal, &path)?;
        }

        let info = self.blobs.write(input)?;
        match self.link_blob(ctx, &path, &info) {
            Ok(replaced) => {
                tracing::debug!(
                    path = %path,
                    blob = %info.id,
                    size = info.size,
                    replaced,
                    "file written"
                );
                Ok(WriteOutcome {
                    blob: info,
                    replaced,
                })
            }
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&info.id) {
                    tracing::warn!(blob = %info.id, error = %cleanup, "orphaned blob not removed");
                }
                Err(e)
            }
        }
    }

    /// Parent node and existing file node (if any) for a write to `path`.
    fn plan_write(
        &self,
        view: &dyn QuadStore,
        principal: &Principal,
        path: &VfsPath,
    ) -> Result<(String, Option<String>), QuadFsError> {
        let (parent_path, name) = split_parent(path)?;
        let parent = self.lookup(view, &parent_path)?;
        if !is_directory(view, &parent) {
            return Err(QuadFsError::NotADirectory(parent_path.to_string()));
        }
        match child_named(view, &parent, name) {
            Some(existing) => {
                if is_directory(view, &existing) {
                    return Err(QuadFsError::IsADirectory(path.to_string()));
                }
                self.require(principal, &existing, path, AccessLevel::Write)?;
                Ok((parent, Some(existing)))
            }
            None => {
                self.require(principal, &parent, &parent_path, AccessLevel::Write)?;
                Ok((parent, None))
            }
        }
    }

    fn link_blob(
        &self,
        ctx: &CommitContext,
        path: &VfsPath,
        info: &BlobInfo,
    ) -> Result<bool, QuadFsError> {
        let principal = &ctx.principal;
        let mut txn = self.graph.begin_write(ctx, format!("write {}", path))?;
        let (parent, existing) = self.plan_write(txn.raw(), principal, path)?;
        let replaced = existing.is_some();
        let now = now_literal();
        let mut changes = Vec::new();

        let node = match existing {
            Some(node) => {
                self.touch(&mut txn, &node, principal, &now)?;
                node
            }
            None => {
                let (_, name) = split_parent(path)?;
                self.create_node(
                    &mut txn,
                    &parent,
                    name,
                    FS_FILE,
                    principal,
                    &now,
                    &mut changes,
                )?
            }
        };
        set_single(&mut txn, &node, FS_BLOB_ID, Term::literal(&info.id))?;
        set_single(
            &mut txn,
            &node,
            FS_FILE_SIZE,
            Term::typed(info.size.to_string(), XSD_LONG),
        )?;
        set_single(&mut txn, &node, FS_CHECKSUM, Term::literal(&info.checksum))?;

        self.commit(txn, changes)?;
        Ok(replaced)
    }

    /// Copy `src` to `dst`. Files are re-linked to the same blob; no bytes
    /// are duplicated. Directories are copied recursively, skipping
    /// descendants the principal cannot read.
    pub fn copy(
        &self,
        ctx: &CommitContext,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> Result<TransferOutcome, QuadFsError> {
        let (src, dst) = parse_transfer(src, dst, "copy")?;
        let principal = &ctx.principal;
        let mut txn = self
            .graph
            .begin_write(ctx, format!("copy {} {}", src, dst))?;

        let src_node = self.lookup(txn.raw(), &src)?;
        self.require(principal, &src_node, &src, AccessLevel::Read)?;
        let (dst_parent, replaced, mut changes) =
            self.prepare_destination(&mut txn, principal, &src, &dst, overwrite)?;

        let (_, name) = split_parent(&dst)?;
        let now = now_literal();
        let node = self.copy_subtree(
            &mut txn,
            principal,
            &src_node,
            &dst_parent,
            name,
            &now,
            &mut changes,
            0,
        )?;

        self.commit(txn, changes)?;
        tracing::debug!(src = %src, dst = %dst, replaced, "copied");
        Ok(TransferOutcome {
            info: self.describe_committed(principal, &node, &dst),
            replaced,
        })
    }

    /// Move or rename `src` to `dst`, keeping the node, its blob reference
    /// and its subtree.
    pub fn rename(
        &self,
        ctx: &CommitContext,
        src: &str,
        dst: &str,
        overwrite: bool,
    ) -> Result<TransferOutcome, QuadFsError> {
        let (src, dst) = parse_transfer(src, dst, "move")?;
        let principal = &ctx.principal;
        let mut txn = self
            .graph
            .begin_write(ctx, format!("move {} {}", src, dst))?;

        let node = self.lookup(txn.raw(), &src)?;
        self.require(principal, &node, &src, AccessLevel::Write)?;
        let old_parent = parent_of(txn.raw(), &node)
            .ok_or_else(|| QuadFsError::Io(format!("{} has no parent directory", src)))?;
        let (new_parent, replaced, mut changes) =
            self.prepare_destination(&mut txn, principal, &src, &dst, overwrite)?;

        let (_, name) = split_parent(&dst)?;
        txn.delete(&contains_edge(&old_parent, &node))?;
        txn.add(contains_edge(&new_parent, &node))?;
        set_single(&mut txn, &node, RDFS_LABEL, Term::literal(name))?;
        let now = now_literal();
        self.touch(&mut txn, &node, principal, &now)?;
        changes.push(ArenaChange::Reparent {
            child: node.clone(),
            parent: new_parent,
        });

        self.commit(txn, changes)?;
        tracing::debug!(src = %src, dst = %dst, replaced, "moved");
        Ok(TransferOutcome {
            info: self.describe_committed(principal, &node, &dst),
            replaced,
        })
    }

    /// Remove the entry at `path` and, for directories, everything below
    /// it. Blobs are not deleted.
    pub fn delete(&self, ctx: &CommitContext, path: &str) -> Result<(), QuadFsError> {
        let path = VfsPath::parse(path)?;
        if path.is_root() {
            return Err(QuadFsError::InvalidArgument(
                "cannot delete the root directory".to_string(),
            ));
        }
        let mut txn = self.graph.begin_write(ctx, format!("delete {}", path))?;
        let node = self.lookup(txn.raw(), &path)?;
        self.require(&ctx.principal, &node, &path, AccessLevel::Write)?;
        let removed = remove_subtree(&mut txn, &node)?;
        self.commit(txn, vec![ArenaChange::Remove(node)])?;
        tracing::debug!(path = %path, entries = removed, "deleted");
        Ok(())
    }

    // ===== MUTATION HELPERS =====

    /// Resolve the destination parent and clear an existing destination
    /// when overwriting.
    fn prepare_destination(
        &self,
        txn: &mut FilteredWriteTxn<'_>,
        principal: &Principal,
        src: &VfsPath,
        dst: &VfsPath,
        overwrite: bool,
    ) -> Result<(String, bool, Vec<ArenaChange>), QuadFsError> {
        let (parent_path, name) = split_parent(dst)?;
        let parent = self.lookup(txn.raw(), &parent_path)?;
        if !is_directory(txn.raw(), &parent) {
            return Err(QuadFsError::NotADirectory(parent_path.to_string()));
        }
        self.require(principal, &parent, &parent_path, AccessLevel::Write)?;

        match child_named(txn.raw(), &parent, name) {
            None => Ok((parent, false, Vec::new())),
            Some(_) if !overwrite => Err(QuadFsError::AlreadyExists(dst.to_string())),
            Some(_) if src.is_within(dst) => Err(QuadFsError::InvalidArgument(format!(
                "cannot replace {} with its own descendant",
                dst
            ))),
            Some(existing) => {
                self.require(principal, &existing, dst, AccessLevel::Write)?;
                remove_subtree(txn, &existing)?;
                Ok((parent, true, vec![ArenaChange::Remove(existing)]))
            }
        }
    }

    fn new_node_iri(&self) -> String {
        format!("{}/node/{}", self.root, uuid::Uuid::new_v4().simple())
    }

    fn create_node(
        &self,
        txn: &mut FilteredWriteTxn<'_>,
        parent: &str,
        name: &str,
        class: &str,
        principal: &Principal,
        now: &Term,
        changes: &mut Vec<ArenaChange>,
    ) -> Result<String, QuadFsError> {
        let node = self.new_node_iri();
        let subject = iri(&node);
        let user = Term::literal(&principal.id);
        txn.add(Quad::new(subject.clone(), iri(RDF_TYPE), iri(class)))?;
        txn.add(Quad::new(subject.clone(), iri(RDFS_LABEL), Term::literal(name)))?;
        txn.add(contains_edge(parent, &node))?;
        txn.add(Quad::new(subject.clone(), iri(FS_CREATED_BY), user.clone()))?;
        txn.add(Quad::new(subject.clone(), iri(FS_DATE_CREATED), now.clone()))?;
        txn.add(Quad::new(subject.clone(), iri(FS_MODIFIED_BY), user))?;
        txn.add(Quad::new(subject, iri(FS_DATE_MODIFIED), now.clone()))?;

        changes.push(ArenaChange::Attach {
            child: node.clone(),
            parent: parent.to_string(),
        });
        // Creators of workspaces manage them.
        if parent == self.root && class == FS_DIRECTORY && !principal.admin {
            changes.push(ArenaChange::GrantCreator {
                resource: node.clone(),
                subject: principal.id.clone(),
            });
        }
        Ok(node)
    }

    fn touch(
        &self,
        txn: &mut FilteredWriteTxn<'_>,
        node: &str,
        principal: &Principal,
        now: &Term,
    ) -> Result<(), QuadFsError> {
        set_single(txn, node, FS_MODIFIED_BY, Term::literal(&principal.id))?;
        set_single(txn, node, FS_DATE_MODIFIED, now.clone())
    }

    fn copy_subtree(
        &self,
        txn: &mut FilteredWriteTxn<'_>,
        principal: &Principal,
        src: &str,
        dst_parent: &str,
        name: &str,
        now: &Term,
        changes: &mut Vec<ArenaChange>,
        depth: usize,
    ) -> Result<String, QuadFsError> {
        if depth > MAX_PATH_DEPTH {
            return Err(QuadFsError::InvalidArgument(
                "directory tree too deep to copy".to_string(),
            ));
        }

        let view = txn.raw();
        let directory = is_directory(view, src);
        let content: Vec<(&str, Term)> = [FS_BLOB_ID, FS_FILE_SIZE, FS_CHECKSUM]
            .into_iter()
            .filter_map(|predicate| first_object(view, src, predicate).map(|o| (predicate, o)))
            .collect();
        let kids: Vec<(String, String)> = if directory {
            children(view, src)
                .into_iter()
                .filter_map(|child| {
                    let label = literal_of(view, &child, RDFS_LABEL)?;
                    Some((child, label))
                })
                .collect()
        } else {
            Vec::new()
        };

        let class = if directory { FS_DIRECTORY } else { FS_FILE };
        let node = self.create_node(txn, dst_parent, name, class, principal, now, changes)?;
        for (predicate, object) in content {
            txn.add(Quad::new(iri(&node), iri(predicate), object))?;
        }
        for (child, label) in kids {
            if self.access_level(principal, &child).can_read() {
                self.copy_subtree(
                    txn,
                    principal,
                    &child,
                    &node,
                    &label,
                    now,
                    changes,
                    depth + 1,
                )?;
            }
        }
        Ok(node)
    }

    /// Commit `txn`, updating the permission arena before the new snapshot
    /// is published.
    fn commit(
        &self,
        txn: FilteredWriteTxn<'_>,
        changes: Vec<ArenaChange>,
    ) -> Result<(), QuadFsError> {
        let acting_user = txn.principal().id.clone();
        txn.commit_with(|| self.apply(changes, &acting_user))
    }

    /// Every change is attempted; the first grant-table failure is returned.
    fn apply(&self, changes: Vec<ArenaChange>, acting_user: &str) -> Result<(), QuadFsError> {
        let permissions = self.graph.permissions();
        let mut first_error = None;
        for change in changes {
            let result = match change {
                ArenaChange::Attach { child, parent } => {
                    permissions.attach(&child, &parent);
                    Ok(())
                }
                ArenaChange::Reparent { child, parent } => {
                    permissions.reparent(&child, &parent);
                    Ok(())
                }
                ArenaChange::Remove(node) => permissions
                    .remove_resource(&node, Some(acting_user))
                    .map(|_| ())
                    .inspect_err(|e| {
                        tracing::error!(resource = %node, error = %e, "stale grants left behind");
                    }),
                ArenaChange::GrantCreator { resource, subject } => permissions
                    .grant(&subject, &resource, AccessLevel::Manage)
                    .map(|_| ())
                    .inspect_err(|e| {
                        tracing::error!(resource = %resource, error = %e, "creator grant failed");
                    }),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// =============================================================================
// FREE HELPERS
// =============================================================================

fn split_parent(path: &VfsPath) -> Result<(VfsPath, &str), QuadFsError> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(QuadFsError::InvalidArgument(
            "the root directory has no parent".to_string(),
        )),
    }
}

fn parse_transfer(src: &str, dst: &str, verb: &str) -> Result<(VfsPath, VfsPath), QuadFsError> {
    let src = VfsPath::parse(src)?;
    let dst = VfsPath::parse(dst)?;
    if src.is_root() || dst.is_root() {
        return Err(QuadFsError::InvalidArgument(format!(
            "cannot {} the root directory",
            verb
        )));
    }
    if dst.is_within(&src) {
        return Err(QuadFsError::InvalidArgument(format!(
            "cannot {} {} into itself",
            verb, src
        )));
    }
    Ok((src, dst))
}

/// Replace every value of `predicate` on `node` with `object`.
fn set_single(
    txn: &mut FilteredWriteTxn<'_>,
    node: &str,
    predicate: &str,
    object: Term,
) -> Result<(), QuadFsError> {
    txn.delete_matching(
        &QuadPattern::default_graph()
            .subject(iri(node))
            .predicate(iri(predicate)),
    )?;
    txn.add(Quad::new(iri(node), iri(predicate), object))?;
    Ok(())
}

/// Delete `node`, its descendants and the edge from its parent. Returns
/// the number of entries removed.
fn remove_subtree(txn: &mut FilteredWriteTxn<'_>, node: &str) -> Result<usize, QuadFsError> {
    let doomed = subtree(txn.raw(), node);
    txn.delete_matching(
        &QuadPattern::default_graph()
            .predicate(iri(FS_CONTAINS))
            .object(iri(node)),
    )?;
    for entry in &doomed {
        txn.delete_matching(&QuadPattern::default_graph().subject(iri(entry)))?;
    }
    Ok(doomed.len())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::dataset::Dataset;
    use crate::permissions::{PermissionEvent, PermissionIndex, PermissionListener};
    use crate::storage::{MemoryBlobStore, TransactionLog};
    use std::time::Duration;

    fn vfs() -> VirtualFileSystem {
        let log = Arc::new(TransactionLog::in_memory().expect("log"));
        let dataset = Arc::new(Dataset::open(log, Duration::from_secs(1)).expect("dataset"));
        let permissions = Arc::new(PermissionIndex::in_memory().expect("permissions"));
        let graph = PermissionFilteredGraph::new(dataset, permissions);
        VirtualFileSystem::open(graph, Arc::new(MemoryBlobStore::new()), "urn:test:root")
            .expect("vfs")
    }

    fn admin() -> CommitContext {
        CommitContext::new(Principal::admin("root", "Root"))
    }

    fn put(fs: &VirtualFileSystem, path: &str, bytes: &[u8]) -> BlobInfo {
        fs.write(&admin(), path, &mut &bytes[..]).expect("write").blob
    }

    fn get(fs: &VirtualFileSystem, path: &str) -> Vec<u8> {
        let mut out = Vec::new();
        fs.read(&admin().principal, path, &mut out, 0, None)
            .expect("read");
        out
    }

    #[test]
    fn root_exists_after_open() {
        let fs = vfs();
        let info = fs.stat(&Principal::anonymous(), "/").expect("stat root");
        assert!(info.is_directory);
        assert_eq!(info.path, "/");
        assert_eq!(fs.graph().dataset().log().size(), 1);
    }

    #[test]
    fn mkdir_creates_ancestors() {
        let fs = vfs();
        let info = fs.mkdir(&admin(), "/a/b/c").expect("mkdir");
        assert!(info.is_directory);
        assert_eq!(info.path, "/a/b/c");
        for path in ["/a", "/a/b", "/a/b/c"] {
            assert!(fs.stat(&admin().principal, path).expect("stat").is_directory);
        }
    }

    #[test]
    fn mkdir_is_idempotent_for_directories() {
        let fs = vfs();
        fs.mkdir(&admin(), "/a").expect("mkdir");
        let size = fs.graph().dataset().log().size();
        fs.mkdir(&admin(), "/a").expect("mkdir again");
        assert_eq!(fs.graph().dataset().log().size(), size);
    }

    #[test]
    fn mkdir_over_file_fails() {
        let fs = vfs();
        put(&fs, "/f", b"x");
        assert!(matches!(
            fs.mkdir(&admin(), "/f"),
            Err(QuadFsError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.mkdir(&admin(), "/f/g"),
            Err(QuadFsError::NotADirectory(_))
        ));
    }

    #[test]
    fn write_then_read_range() {
        let fs = vfs();
        fs.mkdir(&admin(), "/docs").expect("mkdir");
        let info = put(&fs, "/docs/note.txt", b"hello world");
        assert_eq!(info.size, 11);

        let mut out = Vec::new();
        let n = fs
            .read(&admin().principal, "/docs/note.txt", &mut out, 2, Some(5))
            .expect("read");
        assert_eq!(n, 3);
        assert_eq!(out, b"llo");

        let stat = fs.stat(&admin().principal, "/docs/note.txt").expect("stat");
        assert!(!stat.is_directory);
        assert_eq!(stat.size, 11);
        assert_eq!(stat.checksum.as_deref(), Some(info.checksum.as_str()));
        assert_eq!(stat.owner.as_deref(), Some("root"));
    }

    #[test]
    fn overwrite_replaces_blob_reference() {
        let fs = vfs();
        let first = put(&fs, "/f", b"one");
        let second = put(&fs, "/f", b"second");
        assert_ne!(first.id, second.id);
        assert_eq!(get(&fs, "/f"), b"second");
        assert_eq!(fs.stat(&admin().principal, "/f").expect("stat").size, 6);
        // The old blob is kept.
        assert!(fs.blobs().exists(&first.id).expect("exists"));
    }

    #[test]
    fn write_reports_whether_the_file_existed() {
        let fs = vfs();
        let created = fs.write(&admin(), "/f", &mut &b"one"[..]).expect("create");
        assert!(!created.replaced);
        let replaced = fs.write(&admin(), "/f", &mut &b"two"[..]).expect("replace");
        assert!(replaced.replaced);
        assert_eq!(replaced.blob.size, 3);

        fs.delete(&admin(), "/f").expect("delete");
        let again = fs.write(&admin(), "/f", &mut &b"three"[..]).expect("recreate");
        assert!(!again.replaced);
    }

    #[test]
    fn write_errors() {
        let fs = vfs();
        fs.mkdir(&admin(), "/dir").expect("mkdir");
        put(&fs, "/file", b"x");

        let ctx = admin();
        assert!(matches!(
            fs.write(&ctx, "/missing/f", &mut &b"x"[..]),
            Err(QuadFsError::NotFound(_))
        ));
        assert!(matches!(
            fs.write(&ctx, "/file/f", &mut &b"x"[..]),
            Err(QuadFsError::NotADirectory(_))
        ));
        assert!(matches!(
            fs.write(&ctx, "/dir", &mut &b"x"[..]),
            Err(QuadFsError::IsADirectory(_))
        ));
        assert!(matches!(
            fs.write(&ctx, "/", &mut &b"x"[..]),
            Err(QuadFsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn list_and_not_a_directory() {
        let fs = vfs();
        fs.mkdir(&admin(), "/d/sub").expect("mkdir");
        put(&fs, "/d/b.txt", b"b");
        put(&fs, "/d/a.txt", b"a");

        let names: Vec<_> = fs
            .list(&admin().principal, "/d")
            .expect("list")
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(names, vec!["/d/a.txt", "/d/b.txt", "/d/sub"]);
        assert!(matches!(
            fs.list(&admin().principal, "/d/a.txt"),
            Err(QuadFsError::NotADirectory(_))
        ));
    }

    #[test]
    fn rename_keeps_content() {
        let fs = vfs();
        let info = put(&fs, "/x", b"payload");
        let outcome = fs.rename(&admin(), "/x", "/y", false).expect("move");
        assert!(!outcome.replaced);
        assert!(fs.stat(&admin().principal, "/x").unwrap_err().is_not_found());
        let moved = fs.stat(&admin().principal, "/y").expect("stat");
        assert_eq!(moved.size, info.size);
        assert_eq!(moved.checksum, Some(info.checksum));
        assert_eq!(moved.blob_id, Some(info.id));
    }

    #[test]
    fn rename_directory_moves_subtree() {
        let fs = vfs();
        fs.mkdir(&admin(), "/a/inner").expect("mkdir");
        put(&fs, "/a/inner/f", b"deep");
        fs.mkdir(&admin(), "/b").expect("mkdir");
        fs.rename(&admin(), "/a", "/b/a2", false).expect("move");
        assert_eq!(get(&fs, "/b/a2/inner/f"), b"deep");
        assert!(fs.stat(&admin().principal, "/a").is_err());
    }

    #[test]
    fn delete_removes_every_trace_of_the_subtree() {
        let fs = vfs();
        fs.mkdir(&admin(), "/d/e").expect("mkdir");
        let info = put(&fs, "/d/e/f", b"gone");
        let nodes: Vec<String> = ["/d", "/d/e", "/d/e/f"]
            .iter()
            .map(|p| fs.resource_iri(&admin().principal, p).expect("iri"))
            .collect();
        let entries = fs.graph().dataset().log().size();

        fs.delete(&admin(), "/d").expect("delete");
        let snapshot = fs.graph().dataset().begin_read();
        for node in &nodes {
            assert!(snapshot.find(&QuadPattern::default_graph().subject(iri(node))).is_empty());
            assert!(snapshot.find(&QuadPattern::default_graph().object(iri(node))).is_empty());
        }
        assert_eq!(fs.graph().dataset().log().size(), entries + 1);
        assert!(fs.blobs().exists(&info.id).expect("exists"));

        // No tombstone blocks the path.
        fs.mkdir(&admin(), "/d/e").expect("recreate");
        assert!(fs.list(&admin().principal, "/d/e").expect("list").is_empty());
    }

    #[test]
    fn copy_relinks_same_blob() {
        let fs = vfs();
        let info = put(&fs, "/src", b"shared");
        let outcome = fs.copy(&admin(), "/src", "/dst", false).expect("copy");
        assert_eq!(outcome.info.blob_id.as_deref(), Some(info.id.as_str()));
        assert_eq!(get(&fs, "/dst"), b"shared");
        assert_eq!(get(&fs, "/src"), b"shared");
    }

    #[test]
    fn copy_directory_recursively() {
        let fs = vfs();
        fs.mkdir(&admin(), "/tree/leaf").expect("mkdir");
        put(&fs, "/tree/leaf/f", b"1");
        fs.copy(&admin(), "/tree", "/clone", false).expect("copy");
        assert_eq!(get(&fs, "/clone/leaf/f"), b"1");
        // Distinct nodes.
        let a = fs.resource_iri(&admin().principal, "/tree/leaf").expect("iri");
        let b = fs.resource_iri(&admin().principal, "/clone/leaf").expect("iri");
        assert_ne!(a, b);
    }

    #[test]
    fn transfer_conflicts() {
        let fs = vfs();
        put(&fs, "/a", b"a");
        put(&fs, "/b", b"b");
        fs.mkdir(&admin(), "/dir").expect("mkdir");

        assert!(matches!(
            fs.copy(&admin(), "/a", "/b", false),
            Err(QuadFsError::AlreadyExists(_))
        ));
        assert!(matches!(
            fs.rename(&admin(), "/missing", "/c", false),
            Err(QuadFsError::NotFound(_))
        ));
        assert!(matches!(
            fs.rename(&admin(), "/dir", "/dir/inside", false),
            Err(QuadFsError::InvalidArgument(_))
        ));

        let outcome = fs.copy(&admin(), "/a", "/b", true).expect("overwrite");
        assert!(outcome.replaced);
        assert_eq!(get(&fs, "/b"), b"a");
    }

    #[test]
    fn cannot_replace_own_ancestor() {
        let fs = vfs();
        fs.mkdir(&admin(), "/p/c").expect("mkdir");
        assert!(matches!(
            fs.rename(&admin(), "/p/c", "/p", true),
            Err(QuadFsError::InvalidArgument(_))
        ));
        assert!(fs.stat(&admin().principal, "/p/c").is_ok());
    }

    #[test]
    fn delete_is_recursive_and_keeps_blobs() {
        let fs = vfs();
        fs.mkdir(&admin(), "/d/e").expect("mkdir");
        let info = put(&fs, "/d/e/f", b"x");
        fs.delete(&admin(), "/d").expect("delete");
        assert!(fs.stat(&admin().principal, "/d").is_err());
        assert!(fs.stat(&admin().principal, "/d/e/f").is_err());
        assert!(fs.blobs().exists(&info.id).expect("exists"));
        assert!(matches!(
            fs.delete(&admin(), "/"),
            Err(QuadFsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn each_mutation_is_one_log_entry_with_messages() {
        let fs = vfs();
        let before = fs.graph().dataset().log().size();
        let ctx = admin().with_message("create workspace");
        fs.mkdir(&ctx, "/ws/a/b").expect("mkdir");
        let log = fs.graph().dataset().log();
        assert_eq!(log.size(), before + 1);
        let record = log.record(before).expect("record");
        assert_eq!(record.header.commit_message, "create workspace");
        assert_eq!(record.header.system_message, "mkdir /ws/a/b");
        assert_eq!(record.header.user_id, "root");
    }

    #[test]
    fn unauthorised_principals() {
        let fs = vfs();
        fs.mkdir(&admin(), "/ws").expect("mkdir");
        put(&fs, "/ws/secret", b"s");
        let eve = Principal::new("eve", "Eve");
        let eve_ctx = CommitContext::new(eve.clone());

        // Invisible entries are missing.
        assert!(fs.stat(&eve, "/ws").unwrap_err().is_not_found());
        assert!(fs.list(&eve, "/").expect("list root").is_empty());
        assert!(matches!(
            fs.mkdir(&eve_ctx, "/eve"),
            Err(QuadFsError::PermissionDenied(_))
        ));

        // List but not read.
        let ws = fs.resource_iri(&admin().principal, "/ws").expect("iri");
        fs.graph()
            .permissions()
            .grant("eve", &ws, AccessLevel::List)
            .expect("grant");
        let info = fs.stat(&eve, "/ws/secret").expect("stat");
        assert!(!info.is_readable);
        assert!(matches!(
            fs.read(&eve, "/ws/secret", &mut Vec::new(), 0, None),
            Err(QuadFsError::PermissionDenied(_))
        ));
        assert!(matches!(
            fs.delete(&eve_ctx, "/ws/secret"),
            Err(QuadFsError::PermissionDenied(_))
        ));
    }

    #[test]
    fn workspace_creator_gets_manage() {
        let fs = vfs();
        let root = fs.root_iri().to_string();
        fs.graph()
            .permissions()
            .grant("bob", &root, AccessLevel::Write)
            .expect("grant");
        let bob = CommitContext::new(Principal::new("bob", "Bob"));
        fs.mkdir(&bob, "/bobs").expect("mkdir");

        let view = fs.access(&bob.principal, "/bobs").expect("access");
        assert!(matches!(
            view,
            AccessView::Workspace {
                can_manage: true,
                ..
            }
        ));
    }

    #[test]
    fn delete_cascades_permissions() {
        let fs = vfs();
        fs.mkdir(&admin(), "/ws/inner").expect("mkdir");
        let inner = fs.resource_iri(&admin().principal, "/ws/inner").expect("iri");
        fs.set_permission(&admin().principal, "/ws/inner", "carol", AccessLevel::Read)
            .expect("grant");
        assert_eq!(fs.graph().permissions().resolve("carol", &inner), AccessLevel::Read);

        fs.delete(&admin(), "/ws").expect("delete");
        assert!(fs.graph().permissions().permissions_of(&inner).is_empty());
    }

    /// Records whether the revoked resource was still published when the
    /// revocation was announced.
    struct PublishedAtRevoke {
        dataset: Arc<Dataset>,
        seen: parking_lot::Mutex<Vec<(String, bool)>>,
    }

    impl PermissionListener for PublishedAtRevoke {
        fn on_permission_change(&self, event: &PermissionEvent) {
            let published = !self
                .dataset
                .begin_read()
                .find(&QuadPattern::default_graph().subject(iri(&event.resource)))
                .is_empty();
            self.seen.lock().push((event.resource.clone(), published));
        }
    }

    #[test]
    fn permissions_change_before_the_commit_is_published() {
        let fs = vfs();
        fs.mkdir(&admin(), "/ws/inner").expect("mkdir");
        let inner = fs.resource_iri(&admin().principal, "/ws/inner").expect("iri");
        fs.set_permission(&admin().principal, "/ws/inner", "carol", AccessLevel::Read)
            .expect("grant");
        let listener = Arc::new(PublishedAtRevoke {
            dataset: Arc::clone(fs.graph().dataset()),
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        fs.graph().permissions().subscribe(listener.clone());

        fs.delete(&admin(), "/ws").expect("delete");
        assert_eq!(*listener.seen.lock(), vec![(inner, true)]);
        assert!(fs.stat(&admin().principal, "/ws").unwrap_err().is_not_found());
    }

    #[test]
    fn moved_entries_inherit_from_new_parent() {
        let fs = vfs();
        fs.mkdir(&admin(), "/shared").expect("mkdir");
        fs.mkdir(&admin(), "/private").expect("mkdir");
        put(&fs, "/private/doc", b"d");
        fs.set_permission(&admin().principal, "/shared", "dave", AccessLevel::Read)
            .expect("grant");
        let dave = Principal::new("dave", "Dave");
        assert!(fs.stat(&dave, "/private/doc").is_err());

        fs.rename(&admin(), "/private/doc", "/shared/doc", false)
            .expect("move");
        assert!(fs.stat(&dave, "/shared/doc").expect("stat").is_readable);
    }

    #[test]
    fn rejects_bad_paths() {
        let fs = vfs();
        for bad in ["relative", "/a/../b", "/a//b"] {
            assert!(matches!(
                fs.stat(&admin().principal, bad),
                Err(QuadFsError::InvalidArgument(_))
            ));
        }
    }
}
