//! # Permission-Filtered Graph
//!
//! Read-time access control beneath the query and update interface.
//!
//! A transaction opened through `PermissionFilteredGraph` is bound to one
//! principal. Every read through it (pattern matching, iteration, counts)
//! only sees default-graph quads whose subject is a resource the principal
//! can at least `Read`. Hidden quads behave as if they did not exist.
//!
//! Writes pass through unfiltered: callers authorise mutations before
//! issuing them. Commit and abort delegate to the dataset, which flushes or
//! discards the accumulated log deltas. Dropping an active write
//! transaction aborts it.

use crate::dataset::{Dataset, WriteTxn};
use crate::graph::{QuadPattern, QuadSet, QuadStore};
use crate::permissions::PermissionIndex;
use crate::storage::TransactionHeader;
use crate::{CommitContext, Principal, Quad, QuadFsError, Term};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// VISIBILITY
// =============================================================================

/// Per-transaction visibility check with a resolution cache.
struct Visibility<'a> {
    permissions: &'a PermissionIndex,
    principal: Principal,
    cache: RefCell<BTreeMap<String, bool>>,
}

impl<'a> Visibility<'a> {
    fn new(permissions: &'a PermissionIndex, principal: Principal) -> Self {
        Self {
            permissions,
            principal,
            cache: RefCell::new(BTreeMap::new()),
        }
    }

    fn can_read(&self, resource: &str) -> bool {
        if let Some(&visible) = self.cache.borrow().get(resource) {
            return visible;
        }
        let visible = self
            .permissions
            .resolve_principal(&self.principal, resource)
            .can_read();
        self.cache.borrow_mut().insert(resource.to_string(), visible);
        visible
    }

    fn is_visible(&self, quad: &Quad) -> bool {
        if !quad.is_default_graph() {
            return false;
        }
        match &quad.subject {
            Term::Iri(resource) => self.can_read(resource),
            _ => false,
        }
    }

    fn filter(&self, quads: Vec<Quad>) -> Vec<Quad> {
        quads.into_iter().filter(|q| self.is_visible(q)).collect()
    }
}

// =============================================================================
// FILTERED GRAPH
// =============================================================================

/// Wraps a dataset so reads are restricted per principal.
#[derive(Debug, Clone)]
pub struct PermissionFilteredGraph {
    dataset: Arc<Dataset>,
    permissions: Arc<PermissionIndex>,
}

impl PermissionFilteredGraph {
    #[must_use]
    pub fn new(dataset: Arc<Dataset>, permissions: Arc<PermissionIndex>) -> Self {
        Self {
            dataset,
            permissions,
        }
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn permissions(&self) -> &Arc<PermissionIndex> {
        &self.permissions
    }

    /// Open a read transaction for `principal` over the committed state.
    pub fn begin_read(&self, principal: &Principal) -> FilteredReadTxn<'_> {
        FilteredReadTxn {
            snapshot: self.dataset.begin_read(),
            visibility: Visibility::new(&self.permissions, principal.clone()),
        }
    }

    /// Open a write transaction attributed to `ctx`.
    ///
    /// `system_message` describes the operation for the log.
    pub fn begin_write(
        &self,
        ctx: &CommitContext,
        system_message: impl Into<String>,
    ) -> Result<FilteredWriteTxn<'_>, QuadFsError> {
        let header = TransactionHeader::now(
            ctx.message_or_empty(),
            system_message,
            ctx.principal.id.clone(),
            ctx.principal.name.clone(),
        );
        Ok(FilteredWriteTxn {
            inner: self.dataset.begin_write(header)?,
            visibility: Visibility::new(&self.permissions, ctx.principal.clone()),
        })
    }
}

// =============================================================================
// READ TRANSACTION
// =============================================================================

/// Filtered view of one committed snapshot.
pub struct FilteredReadTxn<'a> {
    snapshot: Arc<QuadSet>,
    visibility: Visibility<'a>,
}

impl FilteredReadTxn<'_> {
    /// Unfiltered snapshot for trusted structural reads.
    pub fn raw(&self) -> &QuadSet {
        &self.snapshot
    }

    pub fn principal(&self) -> &Principal {
        &self.visibility.principal
    }
}

impl QuadStore for FilteredReadTxn<'_> {
    fn contains(&self, quad: &Quad) -> bool {
        self.visibility.is_visible(quad) && self.snapshot.contains(quad)
    }

    fn find(&self, pattern: &QuadPattern) -> Vec<Quad> {
        self.visibility.filter(self.snapshot.find(pattern))
    }

    fn len(&self) -> usize {
        self.snapshot
            .iter()
            .filter(|q| self.visibility.is_visible(q))
            .count()
    }
}

// =============================================================================
// WRITE TRANSACTION
// =============================================================================

/// An active write transaction whose reads are filtered.
pub struct FilteredWriteTxn<'a> {
    inner: WriteTxn<'a>,
    visibility: Visibility<'a>,
}

impl FilteredWriteTxn<'_> {
    /// Unfiltered view (committed base plus own changes) for trusted
    /// structural reads.
    pub fn raw(&self) -> &dyn QuadStore {
        &self.inner
    }

    pub fn principal(&self) -> &Principal {
        &self.visibility.principal
    }

    pub fn add(&mut self, quad: Quad) -> Result<bool, QuadFsError> {
        self.inner.add(quad)
    }

    pub fn delete(&mut self, quad: &Quad) -> Result<bool, QuadFsError> {
        self.inner.delete(quad)
    }

    /// Delete every quad matching the pattern, visible or not.
    pub fn delete_matching(&mut self, pattern: &QuadPattern) -> Result<usize, QuadFsError> {
        self.inner.delete_matching(pattern)
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    pub fn commit(self) -> Result<(), QuadFsError> {
        self.inner.commit()
    }

    /// See [`WriteTxn::commit_with`].
    pub fn commit_with<F>(self, before_publish: F) -> Result<(), QuadFsError>
    where
        F: FnOnce() -> Result<(), QuadFsError>,
    {
        self.inner.commit_with(before_publish)
    }

    pub fn abort(self) -> Result<(), QuadFsError> {
        self.inner.abort()
    }
}

impl QuadStore for FilteredWriteTxn<'_> {
    fn contains(&self, quad: &Quad) -> bool {
        self.visibility.is_visible(quad) && self.inner.contains(quad)
    }

    fn find(&self, pattern: &QuadPattern) -> Vec<Quad> {
        self.visibility.filter(self.inner.find(pattern))
    }

    fn len(&self) -> usize {
        self.inner
            .find(&QuadPattern::default_graph())
            .iter()
            .filter(|q| self.visibility.is_visible(q))
            .count()
    }
}

// =============================================================================
// TESTS
// =============================================================================
