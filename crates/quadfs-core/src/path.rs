//! Path parsing for the virtual filesystem.
//!
//! Paths are absolute and `/`-delimited. A trailing slash is ignored.
//! Empty, `.` and `..` segments are rejected rather than normalised, and
//! so are control characters.

use crate::QuadFsError;
use crate::primitives::{MAX_PATH_DEPTH, MAX_SEGMENT_LENGTH};

/// A validated path, stored as its segments. The root has none.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VfsPath {
    segments: Vec<String>,
}

impl VfsPath {
    /// The root directory.
    #[must_use]
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse and validate an absolute path.
    pub fn parse(path: &str) -> Result<Self, QuadFsError> {
        let invalid = |reason: &str| QuadFsError::InvalidArgument(format!("{:?}: {}", path, reason));

        let rest = path
            .strip_prefix('/')
            .ok_or_else(|| invalid("path must be absolute"))?;
        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for segment in rest.split('/') {
            match segment {
                "" => return Err(invalid("empty path segment")),
                "." | ".." => return Err(invalid("relative path segment")),
                s if s.len() > MAX_SEGMENT_LENGTH => return Err(invalid("segment too long")),
                s if s.chars().any(char::is_control) => {
                    return Err(invalid("control character in path"));
                }
                s => segments.push(s.to_string()),
            }
        }
        if segments.len() > MAX_PATH_DEPTH {
            return Err(invalid("path too deep"));
        }
        Ok(Self { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment; `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent path; `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;
        Some(Self {
            segments: parent.to_vec(),
        })
    }

    /// Append one (already validated) segment.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// True if `self` equals `other` or lies beneath it.
    pub fn is_within(&self, other: &Self) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// Number of segments; the root is depth 0.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

impl std::fmt::Display for VfsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_root_variants() {
        assert!(VfsPath::parse("/").expect("root").is_root());
        assert_eq!(VfsPath::parse("/").expect("root").to_string(), "/");
    }

    #[test]
    fn trailing_slash_is_ignored() {
        let path = VfsPath::parse("/a/b/").expect("parse");
        assert_eq!(path.to_string(), "/a/b");
        assert_eq!(path.name(), Some("b"));
        assert_eq!(path.parent().expect("parent").to_string(), "/a");
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in ["", "a/b", "/a//b", "/a/./b", "/a/../b", "/..", "/a\u{0}b", "/a\nb"] {
            assert!(
                matches!(VfsPath::parse(bad), Err(QuadFsError::InvalidArgument(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn rejects_overlong_segments_and_depth() {
        let long = format!("/{}", "x".repeat(MAX_SEGMENT_LENGTH + 1));
        assert!(VfsPath::parse(&long).is_err());
        let deep = "/d".repeat(MAX_PATH_DEPTH + 1);
        assert!(VfsPath::parse(&deep).is_err());
    }

    #[test]
    fn containment() {
        let a = VfsPath::parse("/a").expect("parse");
        let ab = VfsPath::parse("/a/b").expect("parse");
        let abc = VfsPath::parse("/abc").expect("parse");
        assert!(ab.is_within(&a));
        assert!(a.is_within(&a));
        assert!(!abc.is_within(&a));
        assert!(a.is_within(&VfsPath::root()));
        assert_eq!(a.child("b"), ab);
    }
}
