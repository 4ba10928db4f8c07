//! # Change Sinks
//!
//! The notification interface shared by the live graph and the log.
//!
//! A sink receives `on_start`, then any number of `on_add` / `on_delete`,
//! then exactly one of `on_commit` or `on_rollback`. There are two
//! destinations, modelled as a closed enum:
//! - `Apply` buffers the deltas and applies them to a `QuadSet` on commit
//! - `Append` forwards every notification to a `TransactionLog`

use crate::graph::QuadSet;
use crate::storage::{QuadDelta, TransactionHeader, TransactionLog};
use crate::{Quad, QuadFsError};

/// Destination of change notifications.
pub enum ChangeSink<'a> {
    /// Apply to a graph; deltas become visible only on commit.
    Apply {
        target: &'a mut QuadSet,
        pending: Vec<QuadDelta>,
    },
    /// Persist to a log.
    Append(&'a TransactionLog),
}

impl<'a> ChangeSink<'a> {
    /// Sink that applies committed changes to `target`.
    pub fn apply(target: &'a mut QuadSet) -> Self {
        Self::Apply {
            target,
            pending: Vec::new(),
        }
    }

    pub fn on_start(&mut self, header: &TransactionHeader) -> Result<(), QuadFsError> {
        match self {
            Self::Apply { pending, .. } => {
                pending.clear();
                Ok(())
            }
            Self::Append(log) => log.on_start(header),
        }
    }

    pub fn on_add(&mut self, quad: &Quad) -> Result<(), QuadFsError> {
        match self {
            Self::Apply { pending, .. } => {
                pending.push(QuadDelta::Add(quad.clone()));
                Ok(())
            }
            Self::Append(log) => log.on_add(quad),
        }
    }

    pub fn on_delete(&mut self, quad: &Quad) -> Result<(), QuadFsError> {
        match self {
            Self::Apply { pending, .. } => {
                pending.push(QuadDelta::Delete(quad.clone()));
                Ok(())
            }
            Self::Append(log) => log.on_delete(quad),
        }
    }

    pub fn on_commit(&mut self) -> Result<(), QuadFsError> {
        match self {
            Self::Apply { target, pending } => {
                for delta in pending.drain(..) {
                    match delta {
                        QuadDelta::Add(quad) => {
                            target.insert(quad);
                        }
                        QuadDelta::Delete(quad) => {
                            target.remove(&quad);
                        }
                    }
                }
                Ok(())
            }
            Self::Append(log) => log.on_commit().map(|_| ()),
        }
    }

    pub fn on_rollback(&mut self) -> Result<(), QuadFsError> {
        match self {
            Self::Apply { pending, .. } => {
                pending.clear();
                Ok(())
            }
            Self::Append(log) => log.on_rollback(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
