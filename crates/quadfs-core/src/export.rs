//! # Canonical Export Module
//!
//! The redb files behind the log and the grant table are not bit-identical
//! across runs. The canonical export is: a postcard stream of the quads in
//! sorted order, framed by a header carrying a BLAKE3 digest of the data
//! section. Two stores hold the same graph iff their exports are equal.
//!
//! Also provided: an N-Quads rendering for humans and other RDF tools.

use crate::graph::{QuadSet, QuadStore};
use crate::{Quad, QuadFsError};
use serde::{Deserialize, Serialize};
use std::io::Write;

// =============================================================================
// CANONICAL FORMAT
// =============================================================================

/// Magic bytes for canonical export files.
pub const CANONICAL_MAGIC: [u8; 4] = *b"QFSX";

/// Current canonical format version.
pub const CANONICAL_VERSION: u8 = 1;

/// Upper bound on quads accepted by `import_canonical`.
pub const MAX_IMPORT_QUAD_COUNT: u64 = 10_000_000;

/// Header for canonical export files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub quad_count: u64,
    /// BLAKE3 hex digest of the data section.
    pub checksum: String,
}

impl CanonicalHeader {
    #[must_use]
    pub fn new(quad_count: u64, checksum: String) -> Self {
        Self {
            magic: CANONICAL_MAGIC,
            version: CANONICAL_VERSION,
            quad_count,
            checksum,
        }
    }

    /// Error messages stay generic so malformed input learns nothing about
    /// the expected layout.
    pub fn validate(&self) -> Result<(), QuadFsError> {
        if self.magic != CANONICAL_MAGIC {
            return Err(QuadFsError::Serialization(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != CANONICAL_VERSION {
            return Err(QuadFsError::Serialization(
                "Unsupported file version".to_string(),
            ));
        }
        if self.quad_count > MAX_IMPORT_QUAD_COUNT {
            return Err(QuadFsError::Serialization(format!(
                "Quad count {} exceeds maximum allowed {}",
                self.quad_count, MAX_IMPORT_QUAD_COUNT
            )));
        }
        Ok(())
    }
}

fn data_section(graph: &QuadSet) -> Result<Vec<u8>, QuadFsError> {
    // QuadSet iterates in sorted order.
    let quads: Vec<&Quad> = graph.iter().collect();
    postcard::to_allocvec(&quads).map_err(|e| QuadFsError::Serialization(format!("Data: {}", e)))
}

/// BLAKE3 hex digest of the graph's canonical data section.
pub fn canonical_checksum(graph: &QuadSet) -> Result<String, QuadFsError> {
    Ok(blake3::hash(&data_section(graph)?).to_hex().to_string())
}

/// Serialize the graph.
///
/// Format:
/// ```text
/// [header_len: u32 LE] [CanonicalHeader (postcard)] [Vec<Quad> (postcard)]
/// ```
pub fn export_canonical(graph: &QuadSet) -> Result<Vec<u8>, QuadFsError> {
    let data = data_section(graph)?;
    let header = CanonicalHeader::new(
        graph.len() as u64,
        blake3::hash(&data).to_hex().to_string(),
    );
    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| QuadFsError::Serialization(format!("Header: {}", e)))?;
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| QuadFsError::Serialization("Header too large".to_string()))?;

    let mut out = Vec::with_capacity(4 + header_bytes.len() + data.len());
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&data);
    Ok(out)
}

/// Parse a canonical export back into a graph, validating header, digest
/// and count.
pub fn import_canonical(bytes: &[u8]) -> Result<QuadSet, QuadFsError> {
    let (len_bytes, rest) = bytes
        .split_first_chunk::<4>()
        .ok_or_else(|| QuadFsError::Serialization("Data too short".to_string()))?;
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(QuadFsError::Serialization(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, data) = rest.split_at(header_len);

    let header: CanonicalHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| QuadFsError::Serialization(format!("Header: {}", e)))?;
    header.validate()?;

    let digest = blake3::hash(data).to_hex().to_string();
    if digest != header.checksum {
        return Err(QuadFsError::Serialization(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, digest
        )));
    }

    let quads: Vec<Quad> = postcard::from_bytes(data)
        .map_err(|e| QuadFsError::Serialization(format!("Data: {}", e)))?;
    if quads.len() as u64 != header.quad_count {
        return Err(QuadFsError::Serialization(
            "Quad count mismatch".to_string(),
        ));
    }
    Ok(quads.into_iter().collect())
}

/// Whether `graph` matches a canonical export.
pub fn verify_canonical(graph: &QuadSet, bytes: &[u8]) -> Result<bool, QuadFsError> {
    Ok(import_canonical(bytes)? == *graph)
}

// =============================================================================
// N-QUADS
// =============================================================================

/// Write every quad as one N-Quads line, in sorted order. Returns the
/// number of lines written.
pub fn write_nquads(graph: &QuadSet, out: &mut dyn Write) -> Result<u64, QuadFsError> {
    let mut lines = 0;
    for quad in graph.iter() {
        writeln!(out, "{}", quad).map_err(|e| QuadFsError::io("write n-quads", e))?;
        lines += 1;
    }
    Ok(lines)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::Term;

    fn sample() -> QuadSet {
        [
            Quad::new(Term::iri("urn:a"), Term::iri("urn:p"), Term::literal("x")),
            Quad::new(
                Term::iri("urn:a"),
                Term::iri("urn:q"),
                Term::typed("1", "urn:int"),
            ),
            Quad::in_graph(
                Term::iri("urn:g"),
                Term::iri("urn:b"),
                Term::iri("urn:p"),
                Term::iri("urn:a"),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn canonical_roundtrip() {
        let graph = sample();
        let bytes = export_canonical(&graph).expect("export");
        let imported = import_canonical(&bytes).expect("import");
        assert_eq!(imported, graph);
        assert!(verify_canonical(&graph, &bytes).expect("verify"));
    }

    #[test]
    fn export_is_independent_of_insertion_order() {
        let forward = sample();
        let reversed: QuadSet = {
            let mut quads: Vec<Quad> = sample().iter().cloned().collect();
            quads.reverse();
            quads.into_iter().collect()
        };
        assert_eq!(
            export_canonical(&forward).expect("export"),
            export_canonical(&reversed).expect("export")
        );
        assert_eq!(
            canonical_checksum(&forward).expect("checksum"),
            canonical_checksum(&reversed).expect("checksum")
        );
    }

    #[test]
    fn checksum_changes_with_content() {
        let mut graph = sample();
        let before = canonical_checksum(&graph).expect("checksum");
        graph.insert(Quad::new(
            Term::iri("urn:c"),
            Term::iri("urn:p"),
            Term::literal("new"),
        ));
        assert_ne!(before, canonical_checksum(&graph).expect("checksum"));
    }

    #[test]
    fn verify_rejects_different_graph() {
        let bytes = export_canonical(&sample()).expect("export");
        assert!(!verify_canonical(&QuadSet::new(), &bytes).expect("verify"));
    }

    #[test]
    fn corrupted_imports_fail() {
        assert!(import_canonical(&[]).is_err());
        assert!(import_canonical(&[1, 2]).is_err());
        assert!(import_canonical(&[255, 255, 0, 0, 1]).is_err());

        let mut bytes = export_canonical(&sample()).expect("export");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            import_canonical(&bytes),
            Err(QuadFsError::Serialization(_))
        ));
    }

    #[test]
    fn header_validation() {
        let mut header = CanonicalHeader::new(0, String::new());
        assert!(header.validate().is_ok());
        header.magic = *b"KREX";
        assert!(header.validate().is_err());
        header.magic = CANONICAL_MAGIC;
        header.version = 9;
        assert!(header.validate().is_err());
        header.version = CANONICAL_VERSION;
        header.quad_count = MAX_IMPORT_QUAD_COUNT + 1;
        assert!(header.validate().is_err());
    }

    #[test]
    fn nquads_lines() {
        let mut out = Vec::new();
        let lines = write_nquads(&sample(), &mut out).expect("write");
        assert_eq!(lines, 3);
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("<urn:a> <urn:p> \"x\" ."));
        assert!(text.contains("<urn:b> <urn:p> <urn:a> <urn:g> ."));
        assert!(text.lines().all(|l| l.ends_with(" .")));
    }
}
