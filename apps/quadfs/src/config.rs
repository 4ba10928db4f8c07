//! # Configuration
//!
//! Settings shared by the server and the CLI.
//!
//! Precedence, lowest first:
//! 1. Built-in defaults
//! 2. TOML file (`--config <path>`, or `quadfs.toml` in the working directory)
//! 3. Environment: `QUADFS_DATA_DIR`, `QUADFS_ROOT_IRI`, `QUADFS_WRITE_TIMEOUT_MS`
//! 4. CLI flags, applied by the caller
//!
//! ```toml
//! data_dir = "/var/lib/quadfs"
//! root_iri = "http://files.example.org/root"
//! write_timeout_ms = 30000
//! port = 8080
//! admins = ["ops"]
//! ```

use quadfs_core::{
    QuadFsError, StoreOptions,
    primitives::{DEFAULT_ROOT_IRI, DEFAULT_WRITE_TIMEOUT_MS},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "quadfs.toml";

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Default request body cap for uploads (256 MB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the log, the grant table and the blobs.
    pub data_dir: PathBuf,
    /// IRI of the filesystem root node.
    pub root_iri: String,
    /// How long a writer waits for the writer lock.
    pub write_timeout_ms: u64,
    /// Serve existing blobs but refuse uploads.
    pub read_only_blobs: bool,
    pub host: String,
    pub port: u16,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// User ids treated as organisation-wide administrators.
    pub admins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("quadfs-data"),
            root_iri: DEFAULT_ROOT_IRI.to_string(),
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            read_only_blobs: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            admins: Vec::new(),
        }
    }
}

impl Config {
    /// Load defaults, then the config file, then the process environment.
    ///
    /// An explicit `path` must exist; the implicit `quadfs.toml` is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, QuadFsError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let implicit = Path::new(DEFAULT_CONFIG_FILE);
                if implicit.is_file() {
                    Self::from_file(implicit)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, QuadFsError> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| QuadFsError::io(&format!("config {}", path.display()), e))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(QuadFsError::InvalidArgument(format!(
                "config file {} exceeds {} bytes",
                path.display(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| QuadFsError::io(&format!("config {}", path.display()), e))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, QuadFsError> {
        toml::from_str(text).map_err(|e| QuadFsError::InvalidArgument(format!("config: {}", e)))
    }

    /// Apply `QUADFS_*` overrides read through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), QuadFsError> {
        if let Some(dir) = lookup("QUADFS_DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(iri) = lookup("QUADFS_ROOT_IRI").filter(|v| !v.is_empty()) {
            self.root_iri = iri;
        }
        if let Some(ms) = lookup("QUADFS_WRITE_TIMEOUT_MS") {
            self.write_timeout_ms = ms.trim().parse().map_err(|_| {
                QuadFsError::InvalidArgument(format!("QUADFS_WRITE_TIMEOUT_MS: '{}'", ms))
            })?;
        }
        Ok(())
    }

    #[must_use]
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            root_iri: self.root_iri.clone(),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            read_only_blobs: self.read_only_blobs,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|a| a == user_id)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::from_toml_str("port = 9000\nadmins = [\"ops\"]").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.root_iri, DEFAULT_ROOT_IRI);
        assert!(config.is_admin("ops"));
        assert!(!config.is_admin("alice"));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = Config::from_toml_str("prot = 9000").unwrap_err();
        assert!(matches!(err, QuadFsError::InvalidArgument(_)));
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = Config::from_toml_str("root_iri = \"urn:file\"").unwrap();
        config
            .apply_overrides(env(&[
                ("QUADFS_ROOT_IRI", "urn:env"),
                ("QUADFS_WRITE_TIMEOUT_MS", "250"),
                ("QUADFS_DATA_DIR", "/tmp/qfs"),
            ]))
            .unwrap();
        assert_eq!(config.root_iri, "urn:env");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/qfs"));
        assert_eq!(
            config.store_options().write_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn malformed_timeout_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(env(&[("QUADFS_WRITE_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, QuadFsError::InvalidArgument(_)));
    }

    #[test]
    fn explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quadfs.toml");
        std::fs::write(&path, "read_only_blobs = true\nhost = \"0.0.0.0\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert!(config.read_only_blobs);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
    }
}
