//! # Quad Graph
//!
//! The in-memory quad storage underneath the dataset.
//!
//! This module defines the `QuadStore` read trait and `QuadSet`, an ordered
//! quad set with an object index. All structures use `BTreeSet`/`BTreeMap`
//! so that iteration order, exports and log replays are deterministic.

use crate::{Quad, Term};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

// =============================================================================
// PATTERNS
// =============================================================================

/// Which graph a pattern matches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GraphMatch {
    #[default]
    Any,
    Default,
    Named(Term),
}

impl GraphMatch {
    fn matches(&self, graph: Option<&Term>) -> bool {
        match self {
            Self::Any => true,
            Self::Default => graph.is_none(),
            Self::Named(name) => graph == Some(name),
        }
    }
}

/// A quad pattern; `None` positions are wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuadPattern {
    pub graph: GraphMatch,
    pub subject: Option<Term>,
    pub predicate: Option<Term>,
    pub object: Option<Term>,
}

impl QuadPattern {
    /// Pattern matching every quad in every graph.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Pattern restricted to the default graph.
    #[must_use]
    pub fn default_graph() -> Self {
        Self {
            graph: GraphMatch::Default,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn subject(mut self, subject: Term) -> Self {
        self.subject = Some(subject);
        self
    }

    #[must_use]
    pub fn predicate(mut self, predicate: Term) -> Self {
        self.predicate = Some(predicate);
        self
    }

    #[must_use]
    pub fn object(mut self, object: Term) -> Self {
        self.object = Some(object);
        self
    }

    /// Check a single quad against the pattern.
    pub fn matches(&self, quad: &Quad) -> bool {
        self.graph.matches(quad.graph.as_ref())
            && self.subject.as_ref().is_none_or(|s| *s == quad.subject)
            && self.predicate.as_ref().is_none_or(|p| *p == quad.predicate)
            && self.object.as_ref().is_none_or(|o| *o == quad.object)
    }
}

// =============================================================================
// QUADSTORE TRAIT
// =============================================================================

/// Read access to a set of quads.
///
/// Implemented by committed snapshots, by write transactions (which see
/// their own uncommitted changes) and by the permission-filtered views.
pub trait QuadStore {
    /// Check whether the quad is visible in this store.
    fn contains(&self, quad: &Quad) -> bool;

    /// All visible quads matching the pattern, in quad order.
    fn find(&self, pattern: &QuadPattern) -> Vec<Quad>;

    /// Number of visible quads.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// QUADSET
// =============================================================================

/// Ordered, indexed set of quads.
///
/// The primary set is sorted by (graph, subject, predicate, object), so
/// lookups with a known graph and subject are range scans. The object index
/// serves reverse lookups such as "which directory contains this node".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadSet {
    quads: BTreeSet<Quad>,
    #[serde(skip)]
    by_object: BTreeMap<Term, BTreeSet<Quad>>,
}

impl QuadSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a quad. Returns false if it was already present.
    pub fn insert(&mut self, quad: Quad) -> bool {
        if self.quads.contains(&quad) {
            return false;
        }
        self.by_object
            .entry(quad.object.clone())
            .or_default()
            .insert(quad.clone());
        self.quads.insert(quad)
    }

    /// Remove a quad. Returns false if it was absent.
    pub fn remove(&mut self, quad: &Quad) -> bool {
        if !self.quads.remove(quad) {
            return false;
        }
        if let Some(bucket) = self.by_object.get_mut(&quad.object) {
            bucket.remove(quad);
            if bucket.is_empty() {
                self.by_object.remove(&quad.object);
            }
        }
        true
    }

    /// Iterate all quads in order.
    pub fn iter(&self) -> impl Iterator<Item = &Quad> {
        self.quads.iter()
    }

    /// Rebuild the object index (after deserialization).
    pub fn reindex(&mut self) {
        self.by_object.clear();
        for quad in &self.quads {
            self.by_object
                .entry(quad.object.clone())
                .or_default()
                .insert(quad.clone());
        }
    }

    /// Quads whose graph and subject are both fixed, via a range scan.
    fn scan_subject<'a>(
        &'a self,
        graph: Option<&'a Term>,
        subject: &'a Term,
    ) -> impl Iterator<Item = &'a Quad> + 'a {
        // Iri("") is the smallest term, so this bound precedes every quad
        // with the given graph and subject.
        let lower = Quad {
            graph: graph.cloned(),
            subject: subject.clone(),
            predicate: Term::Iri(String::new()),
            object: Term::Iri(String::new()),
        };
        self.quads
            .range((Bound::Included(lower), Bound::Unbounded))
            .take_while(move |q| q.graph.as_ref() == graph && q.subject == *subject)
    }
}

impl QuadStore for QuadSet {
    fn contains(&self, quad: &Quad) -> bool {
        self.quads.contains(quad)
    }

    fn find(&self, pattern: &QuadPattern) -> Vec<Quad> {
        let fixed_graph = match &pattern.graph {
            GraphMatch::Any => None,
            GraphMatch::Default => Some(None),
            GraphMatch::Named(name) => Some(Some(name)),
        };

        match (fixed_graph, &pattern.subject, &pattern.object) {
            (Some(graph), Some(subject), _) => self
                .scan_subject(graph, subject)
                .filter(|q| pattern.matches(q))
                .cloned()
                .collect(),
            (_, _, Some(object)) => self
                .by_object
                .get(object)
                .map(|bucket| {
                    bucket
                        .iter()
                        .filter(|q| pattern.matches(q))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            _ => self
                .quads
                .iter()
                .filter(|q| pattern.matches(q))
                .cloned()
                .collect(),
        }
    }

    fn len(&self) -> usize {
        self.quads.len()
    }
}

impl FromIterator<Quad> for QuadSet {
    fn from_iter<I: IntoIterator<Item = Quad>>(iter: I) -> Self {
        let mut set = Self::new();
        for quad in iter {
            set.insert(quad);
        }
        set
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str, p: &str, o: &str) -> Quad {
        Quad::new(Term::iri(s), Term::iri(p), Term::literal(o))
    }

    #[test]
    fn insert_is_idempotent() {
        let mut set = QuadSet::new();
        assert!(set.insert(q("urn:a", "urn:p", "1")));
        assert!(!set.insert(q("urn:a", "urn:p", "1")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_reports_absence() {
        let mut set = QuadSet::new();
        set.insert(q("urn:a", "urn:p", "1"));
        assert!(set.remove(&q("urn:a", "urn:p", "1")));
        assert!(!set.remove(&q("urn:a", "urn:p", "1")));
        assert!(set.is_empty());
        assert!(set.find(&QuadPattern::any().object(Term::literal("1"))).is_empty());
    }

    #[test]
    fn subject_scan_stays_within_subject() {
        let mut set = QuadSet::new();
        set.insert(q("urn:a", "urn:p", "1"));
        set.insert(q("urn:a", "urn:q", "2"));
        set.insert(q("urn:b", "urn:p", "3"));
        set.insert(Quad::in_graph(
            Term::iri("urn:g"),
            Term::iri("urn:a"),
            Term::iri("urn:p"),
            Term::literal("4"),
        ));

        let found = set.find(&QuadPattern::default_graph().subject(Term::iri("urn:a")));
        assert_eq!(found, vec![q("urn:a", "urn:p", "1"), q("urn:a", "urn:q", "2")]);

        let all_graphs = set.find(&QuadPattern::any().subject(Term::iri("urn:a")));
        assert_eq!(all_graphs.len(), 3);
    }

    #[test]
    fn object_index_serves_reverse_lookups() {
        let mut set = QuadSet::new();
        set.insert(Quad::new(
            Term::iri("urn:dir"),
            Term::iri("urn:contains"),
            Term::iri("urn:file"),
        ));
        set.insert(q("urn:file", "urn:label", "file"));

        let parents = set.find(
            &QuadPattern::default_graph()
                .predicate(Term::iri("urn:contains"))
                .object(Term::iri("urn:file")),
        );
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].subject, Term::iri("urn:dir"));
    }

    #[test]
    fn named_graph_pattern_excludes_default_graph() {
        let mut set = QuadSet::new();
        set.insert(q("urn:a", "urn:p", "1"));
        set.insert(Quad::in_graph(
            Term::iri("urn:g"),
            Term::iri("urn:a"),
            Term::iri("urn:p"),
            Term::literal("2"),
        ));
        let pattern = QuadPattern {
            graph: GraphMatch::Named(Term::iri("urn:g")),
            ..QuadPattern::any()
        };
        let found = set.find(&pattern);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].object, Term::literal("2"));
    }

    #[test]
    fn reindex_restores_object_lookups() {
        let set: QuadSet = vec![q("urn:a", "urn:p", "x")].into_iter().collect();
        let bytes = postcard::to_allocvec(&set).expect("encode");
        let mut decoded: QuadSet = postcard::from_bytes(&bytes).expect("decode");
        assert!(decoded.find(&QuadPattern::any().object(Term::literal("x"))).is_empty());
        decoded.reindex();
        assert_eq!(decoded.find(&QuadPattern::any().object(Term::literal("x"))).len(), 1);
        assert_eq!(decoded, set);
    }
}
