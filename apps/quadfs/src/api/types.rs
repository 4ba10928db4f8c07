//! # API Request/Response Types
//!
//! JSON bodies for the HTTP API. Filesystem entries are serialized as the
//! core `FileInfo`; query results use the SPARQL JSON results layout.

use quadfs_core::{
    AccessLevel, AccessView, FileInfo, QuadDelta, TransactionRecord, primitives::MAX_QUERY_LENGTH,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Body of every non-2xx JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable kind, e.g. `not_found`.
    pub kind: String,
    pub error: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            error: error.into(),
        }
    }
}

// =============================================================================
// FILESYSTEM
// =============================================================================

/// PROPFIND result: the target itself, then its children at depth 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiStatusResponse {
    pub entries: Vec<FileInfo>,
}

// =============================================================================
// PERMISSIONS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuery {
    /// Filesystem path of the resource; defaults to the root.
    #[serde(default = "root_path")]
    pub resource: String,
}

fn root_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantJson {
    pub subject: String,
    pub level: AccessLevel,
}

/// What the caller can do on a resource, plus its direct grants when the
/// caller manages it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsResponse {
    pub view: AccessView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grants: Option<Vec<GrantJson>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPermissionRequest {
    pub resource: String,
    pub subject: String,
    /// `none` revokes.
    pub level: AccessLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPermissionResponse {
    pub resource: String,
    pub subject: String,
    pub previous: AccessLevel,
    pub level: AccessLevel,
}

// =============================================================================
// QUERY
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
}

impl QueryRequest {
    /// Reject oversized text before it reaches the parser.
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query is empty".to_string());
        }
        if self.query.len() > MAX_QUERY_LENGTH {
            return Err(format!(
                "query length {} exceeds maximum {}",
                self.query.len(),
                MAX_QUERY_LENGTH
            ));
        }
        Ok(())
    }
}

// =============================================================================
// LOG
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntryResponse {
    pub index: u64,
    pub commit_message: String,
    pub system_message: String,
    pub user_id: String,
    pub user_name: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
}

impl From<TransactionRecord> for LogEntryResponse {
    fn from(record: TransactionRecord) -> Self {
        let mut added = Vec::new();
        let mut deleted = Vec::new();
        for delta in record.deltas {
            match delta {
                QuadDelta::Add(quad) => added.push(quad.to_string()),
                QuadDelta::Delete(quad) => deleted.push(quad.to_string()),
            }
        }
        Self {
            index: record.index,
            commit_message: record.header.commit_message,
            system_message: record.header.system_message,
            user_id: record.header.user_id,
            user_name: record.header.user_name,
            timestamp: record.header.timestamp,
            added,
            deleted,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use quadfs_core::{Quad, Term, TransactionHeader};

    #[test]
    fn query_request_validation() {
        assert!(
            QueryRequest {
                query: "SELECT * WHERE { ?s ?p ?o }".to_string()
            }
            .validate()
            .is_ok()
        );
        assert!(
            QueryRequest {
                query: "   ".to_string()
            }
            .validate()
            .is_err()
        );
        assert!(
            QueryRequest {
                query: "x".repeat(MAX_QUERY_LENGTH + 1)
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn log_entry_splits_deltas() {
        let quad = Quad::new(Term::iri("urn:a"), Term::iri("urn:p"), Term::literal("v"));
        let record = TransactionRecord {
            index: 3,
            header: TransactionHeader::now("msg", "mkdir /a", "alice", "Alice"),
            deltas: vec![QuadDelta::Add(quad.clone()), QuadDelta::Delete(quad)],
        };
        let entry = LogEntryResponse::from(record);
        assert_eq!(entry.index, 3);
        assert_eq!(entry.commit_message, "msg");
        assert_eq!(entry.added, vec!["<urn:a> <urn:p> \"v\" .".to_string()]);
        assert_eq!(entry.deleted.len(), 1);
    }

    #[test]
    fn set_permission_request_parses_level_names() {
        let req: SetPermissionRequest = serde_json::from_str(
            r#"{"resource":"/team","subject":"bob","level":"write"}"#,
        )
        .unwrap();
        assert_eq!(req.level, AccessLevel::Write);
    }

    #[test]
    fn resource_query_defaults_to_root() {
        let q: ResourceQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.resource, "/");
    }
}
