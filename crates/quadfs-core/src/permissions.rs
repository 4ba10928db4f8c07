//! # Permission Index
//!
//! Resolves the access level a subject holds on a resource.
//!
//! ## Model
//!
//! - Grants are unique per `(resource, subject)`; granting again overwrites.
//! - Resources form a containment forest kept as an arena keyed by IRI,
//!   with explicit parent references. A subject's effective level is the
//!   maximum of the grants on the resource and on its ancestors.
//! - Grants are stored write-through in redb. The arena is structural state
//!   derived from the graph and is rebuilt by its owner on open.
//!
//! ## Consistency
//!
//! Grants and arena sit behind one `RwLock`. `grant` and `revoke` persist
//! and apply under the write lock, so a concurrent `resolve` observes either
//! the previous or the new level. Listeners are notified after the lock is
//! released.

use crate::access::{AccessLevel, AccessView};
use crate::{Principal, QuadFsError};
use parking_lot::RwLock;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, mpsc};

/// Table for grants: (resource, subject) -> AccessLevel code
const GRANTS: TableDefinition<(&str, &str), u8> = TableDefinition::new("grants");

// =============================================================================
// EVENTS & LISTENERS
// =============================================================================

/// A change of one subject's direct grant on one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEvent {
    pub subject: String,
    pub resource: String,
    pub old_level: AccessLevel,
    pub new_level: AccessLevel,
    /// `None` for changes made by the system rather than a user.
    pub acting_user: Option<String>,
}

/// Consumer of permission change events.
pub trait PermissionListener: Send + Sync {
    fn on_permission_change(&self, event: &PermissionEvent);
}

/// Forward events over a channel so delivery happens elsewhere.
impl PermissionListener for mpsc::Sender<PermissionEvent> {
    fn on_permission_change(&self, event: &PermissionEvent) {
        if self.send(event.clone()).is_err() {
            tracing::debug!("permission event receiver dropped");
        }
    }
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Default)]
struct PermissionState {
    /// resource -> subject -> level. `None` levels are never stored.
    grants: BTreeMap<String, BTreeMap<String, AccessLevel>>,
    /// child -> parent
    parents: BTreeMap<String, String>,
    /// parent -> children
    children: BTreeMap<String, BTreeSet<String>>,
}

impl PermissionState {
    fn direct(&self, subject: &str, resource: &str) -> AccessLevel {
        self.grants
            .get(resource)
            .and_then(|by_subject| by_subject.get(subject))
            .copied()
            .unwrap_or_default()
    }

    fn resolve(&self, subject: &str, resource: &str) -> AccessLevel {
        let mut best = AccessLevel::None;
        let mut current = resource;
        // Bounded by the arena size so a corrupt cycle cannot spin forever.
        for _ in 0..=self.parents.len() {
            best = best.max(self.direct(subject, current));
            if best == AccessLevel::Manage {
                break;
            }
            match self.parents.get(current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        best
    }

    fn link(&mut self, child: &str, parent: &str) {
        self.unlink(child);
        self.parents.insert(child.to_string(), parent.to_string());
        self.children
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    fn unlink(&mut self, child: &str) {
        if let Some(old_parent) = self.parents.remove(child) {
            if let Some(siblings) = self.children.get_mut(&old_parent) {
                siblings.remove(child);
                if siblings.is_empty() {
                    self.children.remove(&old_parent);
                }
            }
        }
    }

    /// The resource and all its recorded descendants.
    fn subtree(&self, resource: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![resource.to_string()];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.clone()) {
                continue;
            }
            if let Some(children) = self.children.get(&node) {
                stack.extend(children.iter().cloned());
            }
            out.push(node);
        }
        out
    }
}

// =============================================================================
// PERMISSION INDEX
// =============================================================================

/// Grant storage plus ancestor-aware resolution.
pub struct PermissionIndex {
    db: Database,
    state: RwLock<PermissionState>,
    listeners: RwLock<Vec<Arc<dyn PermissionListener>>>,
}

impl std::fmt::Debug for PermissionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("PermissionIndex")
            .field("resources_with_grants", &state.grants.len())
            .field("arena_size", &state.parents.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl PermissionIndex {
    /// Open or create a grant database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QuadFsError> {
        let db = Database::create(path.as_ref())
            .map_err(|e| QuadFsError::io("open permission database", e))?;
        Self::init(db)
    }

    /// Create an index that lives only in memory.
    pub fn in_memory() -> Result<Self, QuadFsError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| QuadFsError::io("create in-memory permission database", e))?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self, QuadFsError> {
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| QuadFsError::io("begin permission init", e))?;
            let _ = write_txn
                .open_table(GRANTS)
                .map_err(|e| QuadFsError::io("open grant table", e))?;
            write_txn
                .commit()
                .map_err(|e| QuadFsError::io("commit permission init", e))?;
        }

        let mut state = PermissionState::default();
        {
            let read_txn = db
                .begin_read()
                .map_err(|e| QuadFsError::io("begin permission read", e))?;
            let table = read_txn
                .open_table(GRANTS)
                .map_err(|e| QuadFsError::io("open grant table", e))?;
            for entry in table
                .iter()
                .map_err(|e| QuadFsError::io("scan grants", e))?
            {
                let (key, value) = entry.map_err(|e| QuadFsError::io("read grant", e))?;
                let (resource, subject) = key.value();
                let level = AccessLevel::from_u8(value.value());
                if level != AccessLevel::None {
                    state
                        .grants
                        .entry(resource.to_string())
                        .or_default()
                        .insert(subject.to_string(), level);
                }
            }
        }

        tracing::debug!(resources = state.grants.len(), "permission index opened");

        Ok(Self {
            db,
            state: RwLock::new(state),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Register a listener for grant and revoke events.
    pub fn subscribe(&self, listener: Arc<dyn PermissionListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, event: &PermissionEvent) {
        tracing::debug!(
            subject = %event.subject,
            resource = %event.resource,
            old = %event.old_level,
            new = %event.new_level,
            "permission changed"
        );
        for listener in self.listeners.read().iter() {
            listener.on_permission_change(event);
        }
    }

    // ===== RESOLUTION =====

    /// Effective level of `subject` on `resource`: the maximum over direct
    /// and ancestor grants. A missing grant is `None`, never an error.
    pub fn resolve(&self, subject: &str, resource: &str) -> AccessLevel {
        self.state.read().resolve(subject, resource)
    }

    /// Like [`resolve`](Self::resolve), with full access for admins.
    pub fn resolve_principal(&self, principal: &Principal, resource: &str) -> AccessLevel {
        if principal.admin {
            return AccessLevel::Manage;
        }
        self.resolve(&principal.id, resource)
    }

    /// The level granted directly on `resource`, ignoring ancestors.
    pub fn direct(&self, subject: &str, resource: &str) -> AccessLevel {
        self.state.read().direct(subject, resource)
    }

    /// Direct grants on `resource`, sorted by subject.
    pub fn permissions_of(&self, resource: &str) -> Vec<(String, AccessLevel)> {
        self.state
            .read()
            .grants
            .get(resource)
            .map(|by_subject| {
                by_subject
                    .iter()
                    .map(|(subject, level)| (subject.clone(), *level))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Capabilities of `principal` on `resource`.
    pub fn access_view(&self, principal: &Principal, resource: &str) -> AccessView {
        AccessView::resource(resource, self.resolve_principal(principal, resource))
    }

    // ===== MUTATION =====

    /// Set the direct grant of `subject` on `resource`. Granting `None`
    /// revokes. Returns the previous direct level.
    pub fn grant(
        &self,
        subject: &str,
        resource: &str,
        level: AccessLevel,
    ) -> Result<AccessLevel, QuadFsError> {
        self.apply_grant(subject, resource, level, None)
    }

    /// Remove the direct grant of `subject` on `resource`. Returns the
    /// previous direct level.
    pub fn revoke(&self, subject: &str, resource: &str) -> Result<AccessLevel, QuadFsError> {
        self.apply_grant(subject, resource, AccessLevel::None, None)
    }

    /// Checked grant on behalf of `acting`.
    ///
    /// The acting principal must hold `Manage` on the resource and may not
    /// change their own permissions.
    pub fn set_permission(
        &self,
        acting: &Principal,
        subject: &str,
        resource: &str,
        level: AccessLevel,
    ) -> Result<AccessLevel, QuadFsError> {
        if acting.id == subject {
            return Err(QuadFsError::PermissionDenied(
                "a user may not change their own permissions".to_string(),
            ));
        }
        if !self.resolve_principal(acting, resource).can_manage() {
            return Err(QuadFsError::PermissionDenied(format!(
                "{} cannot manage {}",
                acting.id, resource
            )));
        }
        self.apply_grant(subject, resource, level, Some(acting.id.as_str()))
    }

    fn apply_grant(
        &self,
        subject: &str,
        resource: &str,
        level: AccessLevel,
        acting_user: Option<&str>,
    ) -> Result<AccessLevel, QuadFsError> {
        let old_level = {
            let mut state = self.state.write();
            let old_level = state.direct(subject, resource);
            if old_level == level {
                return Ok(old_level);
            }

            self.persist_grant(subject, resource, level)?;

            if level == AccessLevel::None {
                if let Some(by_subject) = state.grants.get_mut(resource) {
                    by_subject.remove(subject);
                    if by_subject.is_empty() {
                        state.grants.remove(resource);
                    }
                }
            } else {
                state
                    .grants
                    .entry(resource.to_string())
                    .or_default()
                    .insert(subject.to_string(), level);
            }
            old_level
        };

        self.notify(&PermissionEvent {
            subject: subject.to_string(),
            resource: resource.to_string(),
            old_level,
            new_level: level,
            acting_user: acting_user.map(str::to_string),
        });
        Ok(old_level)
    }

    fn persist_grant(
        &self,
        subject: &str,
        resource: &str,
        level: AccessLevel,
    ) -> Result<(), QuadFsError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| QuadFsError::io("begin grant write", e))?;
        {
            let mut table = write_txn
                .open_table(GRANTS)
                .map_err(|e| QuadFsError::io("open grant table", e))?;
            if level == AccessLevel::None {
                table
                    .remove((resource, subject))
                    .map_err(|e| QuadFsError::io("remove grant", e))?;
            } else {
                table
                    .insert((resource, subject), level.to_u8())
                    .map_err(|e| QuadFsError::io("store grant", e))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| QuadFsError::io("commit grant", e))
    }

    // ===== STRUCTURE =====

    /// Record `child` as contained in `parent`, replacing any previous parent.
    pub fn attach(&self, child: &str, parent: &str) {
        self.state.write().link(child, parent);
    }

    /// Move `child` under `new_parent`. Its grants and subtree move with it.
    pub fn reparent(&self, child: &str, new_parent: &str) {
        self.attach(child, new_parent);
    }

    /// The recorded parent of `resource`.
    pub fn parent_of(&self, resource: &str) -> Option<String> {
        self.state.read().parents.get(resource).cloned()
    }

    /// Replace the whole arena with `(child, parent)` links.
    pub fn rebuild_structure(&self, links: impl IntoIterator<Item = (String, String)>) {
        let mut state = self.state.write();
        state.parents.clear();
        state.children.clear();
        for (child, parent) in links {
            state.link(&child, &parent);
        }
        tracing::debug!(links = state.parents.len(), "resource arena rebuilt");
    }

    /// Remove `resource` and its recorded descendants from the arena and
    /// revoke every grant on them. Each revoked grant is reported to the
    /// listeners like any other revoke. Returns the removed resources.
    pub fn remove_resource(
        &self,
        resource: &str,
        acting_user: Option<&str>,
    ) -> Result<Vec<String>, QuadFsError> {
        let (doomed, events) = {
            let mut state = self.state.write();
            let doomed = state.subtree(resource);
            let revoked: Vec<(String, String, AccessLevel)> = doomed
                .iter()
                .filter_map(|node| state.grants.get(node).map(|grants| (node, grants)))
                .flat_map(|(node, grants)| {
                    grants
                        .iter()
                        .map(move |(subject, level)| (node.clone(), subject.clone(), *level))
                })
                .collect();

            let write_txn = self
                .db
                .begin_write()
                .map_err(|e| QuadFsError::io("begin grant cleanup", e))?;
            {
                let mut table = write_txn
                    .open_table(GRANTS)
                    .map_err(|e| QuadFsError::io("open grant table", e))?;
                for (node, subject, _) in &revoked {
                    table
                        .remove((node.as_str(), subject.as_str()))
                        .map_err(|e| QuadFsError::io("remove grant", e))?;
                }
            }
            write_txn
                .commit()
                .map_err(|e| QuadFsError::io("commit grant cleanup", e))?;

            for node in &doomed {
                state.grants.remove(node);
                state.unlink(node);
                state.children.remove(node);
            }

            let events: Vec<PermissionEvent> = revoked
                .into_iter()
                .map(|(resource, subject, old_level)| PermissionEvent {
                    subject,
                    resource,
                    old_level,
                    new_level: AccessLevel::None,
                    acting_user: acting_user.map(str::to_string),
                })
                .collect();
            (doomed, events)
        };

        tracing::debug!(
            resource,
            removed = doomed.len(),
            revoked = events.len(),
            "resource permissions removed"
        );
        for event in &events {
            self.notify(event);
        }
        Ok(doomed)
    }
}

// =============================================================================
// TESTS
// =============================================================================
