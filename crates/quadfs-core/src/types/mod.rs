//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the store:
//! - Graph terms and quads (`Term`, `Quad`)
//! - Request identity (`Principal`, `CommitContext`)
//! - Error types (`QuadFsError`)
//!
//! ## Ordering Guarantees
//!
//! `Term` and `Quad` implement `Ord` so that quad sets iterate in a stable
//! (graph, subject, predicate, object) order. The default graph (`None`)
//! sorts before every named graph.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// TERMS
// =============================================================================

/// A node or value in the graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    /// A resource identified by an IRI.
    Iri(String),
    /// A literal value with an optional datatype IRI.
    Literal {
        value: String,
        datatype: Option<String>,
    },
    /// A blank node label, local to one dataset.
    Blank(String),
}

impl Term {
    /// Create an IRI term.
    #[must_use]
    pub fn iri(iri: impl Into<String>) -> Self {
        Self::Iri(iri.into())
    }

    /// Create a plain literal.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: None,
        }
    }

    /// Create a typed literal.
    #[must_use]
    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
        }
    }

    /// The IRI if this term is a resource.
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Self::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    /// The lexical value if this term is a literal.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Self::Literal { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// N-Quads rendering.
impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iri(iri) => write!(f, "<{}>", iri),
            Self::Blank(label) => write!(f, "_:{}", label),
            Self::Literal { value, datatype } => {
                f.write_str("\"")?;
                for c in value.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\r' => f.write_str("\\r")?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("\"")?;
                if let Some(dt) = datatype {
                    write!(f, "^^<{}>", dt)?;
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// QUADS
// =============================================================================

/// A graph-plus-subject-predicate-object fact.
///
/// `graph: None` is the default graph, the only graph the permission
/// filter ever exposes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub graph: Option<Term>,
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Quad {
    /// Create a quad in the default graph.
    #[must_use]
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            graph: None,
            subject,
            predicate,
            object,
        }
    }

    /// Create a quad in a named graph.
    #[must_use]
    pub fn in_graph(graph: Term, subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            graph: Some(graph),
            subject,
            predicate,
            object,
        }
    }

    /// Whether this quad lives in the default graph.
    pub fn is_default_graph(&self) -> bool {
        self.graph.is_none()
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(graph) = &self.graph {
            write!(f, " {}", graph)?;
        }
        f.write_str(" .")
    }
}

// =============================================================================
// IDENTITY & COMMIT CONTEXT
// =============================================================================

/// The requesting subject of an operation.
///
/// `authorities` is always a collection: a missing claim set and a missing
/// claim both arrive here as an empty `Vec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub name: String,
    /// Organisation-wide full access. Admins resolve to `Manage` everywhere.
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub authorities: Vec<String>,
}

impl Principal {
    /// Identity used when a request carries no user.
    pub const ANONYMOUS: &'static str = "anonymous";

    /// Create a regular principal.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            admin: false,
            authorities: Vec::new(),
        }
    }

    /// Create a principal with full access.
    #[must_use]
    pub fn admin(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            admin: true,
            ..Self::new(id, name)
        }
    }

    /// The unauthenticated principal.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(Self::ANONYMOUS, Self::ANONYMOUS)
    }

    /// Attach authority claims.
    #[must_use]
    pub fn with_authorities(mut self, authorities: Vec<String>) -> Self {
        self.authorities = authorities;
        self
    }

    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }
}

/// Attribution passed explicitly into every mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitContext {
    pub principal: Principal,
    pub message: Option<String>,
}

impl CommitContext {
    #[must_use]
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// The user commit message, empty when none was supplied.
    pub fn message_or_empty(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur anywhere in the store.
///
/// - No silent failures
/// - Use `Result<T, QuadFsError>` for fallible operations
/// - A missing permission grant is never an error; it resolves to `None`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuadFsError {
    /// Missing path, resource, blob or log index.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflicting create.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    /// The principal lacks the access level the operation requires.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The capability is not offered by this store (e.g. a read-only blob store).
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Underlying storage failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Malformed path, identifier or range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Encoding or decoding of persisted records failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The writer lock could not be acquired in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The query text could not be parsed.
    #[error("Query parse error: {0}")]
    QueryParse(String),
}

impl QuadFsError {
    /// Wrap a foreign I/O-class error, prefixing the operation it interrupted.
    pub fn io(context: &str, err: impl fmt::Display) -> Self {
        Self::Io(format!("{}: {}", context, err))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// =============================================================================
// TESTS
// =============================================================================
