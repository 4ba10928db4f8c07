//! # Query Module
//!
//! A small read-only SELECT language over basic graph patterns.
//!
//! ```text
//! PREFIX ex: <http://example.org/>
//! SELECT DISTINCT ?file ?size WHERE {
//!     ?file a fs:File ; fs:fileSize ?size .
//! } LIMIT 10
//! ```
//!
//! Supported: `PREFIX`, `SELECT [DISTINCT] ?vars|*`, an optional `WHERE`,
//! triple patterns with `;` and `,` shorthands, `a`, IRIs, prefixed names,
//! plain and `^^`-typed literals, integers, booleans and `LIMIT`.
//! `fs:`, `rdf:`, `rdfs:` and `xsd:` are predeclared.
//!
//! Update forms are rejected with `UnsupportedOperation`. Evaluation runs
//! against any `QuadStore`, so a permission-filtered transaction yields
//! only what its principal may read.
//!
//! Evaluation is a depth-first join that stops as soon as `LIMIT` rows are
//! produced. Every lookup is charged against a step budget
//! (`MAX_QUERY_STEPS` candidate quads); a query that exhausts it fails with
//! `InvalidArgument` instead of growing without bound.

use crate::graph::{QuadPattern, QuadStore};
use crate::primitives::{
    DEFAULT_QUERY_LIMIT, FS_NS, MAX_QUERY_LENGTH, MAX_QUERY_PATTERNS, MAX_QUERY_STEPS, RDF_TYPE,
};
use crate::{QuadFsError, Term};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const RDFS_NS: &str = "http://www.w3.org/2000/01/rdf-schema#";
const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

const UPDATE_KEYWORDS: [&str; 10] = [
    "INSERT", "DELETE", "LOAD", "CLEAR", "DROP", "CREATE", "ADD", "MOVE", "COPY", "WITH",
];
const OTHER_FORMS: [&str; 3] = ["ASK", "CONSTRUCT", "DESCRIBE"];

// =============================================================================
// QUERY TYPES
// =============================================================================

/// Position in a triple pattern: a variable or a fixed term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTerm {
    Var(String),
    Const(Term),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: QueryTerm,
    pub predicate: QueryTerm,
    pub object: QueryTerm,
}

/// A parsed SELECT query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    pub distinct: bool,
    /// Projected variables in order. `SELECT *` projects every variable in
    /// order of first appearance.
    pub variables: Vec<String>,
    pub patterns: Vec<TriplePattern>,
    pub limit: usize,
}

/// One solution: variable name to bound term.
pub type Binding = BTreeMap<String, Term>;

/// Solutions of an evaluated query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResults {
    pub variables: Vec<String>,
    pub rows: Vec<Binding>,
}

// =============================================================================
// TOKENIZER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Iri(String),
    Var(String),
    Str(String),
    Integer(String),
    DoubleCaret,
    Punct(char),
}

fn parse_error(msg: impl Into<String>) -> QuadFsError {
    QuadFsError::QueryParse(msg.into())
}

fn tokenize(text: &str) -> Result<Vec<Token>, QuadFsError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(&c) = chars.get(i) {
        match c {
            c if c.is_whitespace() => i += 1,
            '#' => {
                while chars.get(i).is_some_and(|&c| c != '\n') {
                    i += 1;
                }
            }
            '<' => {
                let start = i + 1;
                let end = (start..chars.len())
                    .find(|&j| chars[j] == '>')
                    .ok_or_else(|| parse_error("unterminated IRI"))?;
                let iri: String = chars[start..end].iter().collect();
                if iri.chars().any(|c| c.is_whitespace()) {
                    return Err(parse_error(format!("invalid IRI <{}>", iri)));
                }
                tokens.push(Token::Iri(iri));
                i = end + 1;
            }
            '?' | '$' => {
                let start = i + 1;
                let mut end = start;
                while chars.get(end).is_some_and(|c| c.is_alphanumeric() || *c == '_') {
                    end += 1;
                }
                if end == start {
                    return Err(parse_error("empty variable name"));
                }
                tokens.push(Token::Var(chars[start..end].iter().collect()));
                i = end;
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(parse_error("unterminated string literal")),
                        Some(&ch) if ch == quote => break,
                        Some('\\') => {
                            let escaped = match chars.get(i + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('r') => '\r',
                                Some(&other @ ('"' | '\'' | '\\')) => other,
                                _ => return Err(parse_error("invalid escape in literal")),
                            };
                            value.push(escaped);
                            i += 2;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                i += 1;
                if chars.get(i) == Some(&'@') {
                    return Err(QuadFsError::UnsupportedOperation(
                        "language-tagged literals are not supported".to_string(),
                    ));
                }
                tokens.push(Token::Str(value));
            }
            '^' if chars.get(i + 1) == Some(&'^') => {
                tokens.push(Token::DoubleCaret);
                i += 2;
            }
            '{' | '}' | '.' | '*' | ';' | ',' => {
                tokens.push(Token::Punct(c));
                i += 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                tokens.push(Token::Integer(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' || c == ':' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | ':'))
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => return Err(parse_error(format!("unexpected character {:?}", other))),
        }
    }
    Ok(tokens)
}

// =============================================================================
// PARSER
// =============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    prefixes: BTreeMap<String, String>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        let prefixes = [
            ("fs", FS_NS),
            ("rdf", RDF_NS),
            ("rdfs", RDFS_NS),
            ("xsd", XSD_NS),
        ]
        .into_iter()
        .map(|(p, ns)| (p.to_string(), ns.to_string()))
        .collect();
        Self {
            tokens,
            pos: 0,
            prefixes,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.peek_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_punct(&mut self, punct: char) -> Result<(), QuadFsError> {
        match self.next() {
            Some(Token::Punct(p)) if p == punct => Ok(()),
            other => Err(parse_error(format!("expected '{}', found {:?}", punct, other))),
        }
    }

    fn parse(mut self) -> Result<SelectQuery, QuadFsError> {
        while self.eat_keyword("PREFIX") {
            let name = match self.next() {
                Some(Token::Word(w)) if w.ends_with(':') => w.trim_end_matches(':').to_string(),
                other => return Err(parse_error(format!("expected prefix name, found {:?}", other))),
            };
            let ns = match self.next() {
                Some(Token::Iri(iri)) => iri,
                other => return Err(parse_error(format!("expected namespace IRI, found {:?}", other))),
            };
            self.prefixes.insert(name, ns);
        }

        if let Some(Token::Word(w)) = self.peek() {
            let upper = w.to_ascii_uppercase();
            if UPDATE_KEYWORDS.contains(&upper.as_str()) {
                return Err(QuadFsError::UnsupportedOperation(
                    "updates are not accepted through the query interface".to_string(),
                ));
            }
            if OTHER_FORMS.contains(&upper.as_str()) {
                return Err(QuadFsError::UnsupportedOperation(format!(
                    "{} queries are not supported",
                    upper
                )));
            }
        }
        if !self.eat_keyword("SELECT") {
            return Err(parse_error("expected SELECT"));
        }
        let distinct = self.eat_keyword("DISTINCT");

        let mut projected = Vec::new();
        let mut star = false;
        loop {
            match self.peek() {
                Some(Token::Var(v)) => {
                    projected.push(v.clone());
                    self.pos += 1;
                }
                Some(Token::Punct('*')) if projected.is_empty() && !star => {
                    star = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if projected.is_empty() && !star {
            return Err(parse_error("SELECT needs variables or *"));
        }

        self.eat_keyword("WHERE");
        self.expect_punct('{')?;
        let patterns = self.parse_group()?;

        let mut limit = DEFAULT_QUERY_LIMIT;
        if self.eat_keyword("LIMIT") {
            limit = match self.next() {
                Some(Token::Integer(n)) => n
                    .parse::<usize>()
                    .map_err(|_| parse_error(format!("invalid LIMIT {}", n)))?
                    .min(DEFAULT_QUERY_LIMIT),
                other => return Err(parse_error(format!("expected LIMIT value, found {:?}", other))),
            };
        }
        if let Some(extra) = self.peek() {
            return Err(parse_error(format!("unexpected trailing token {:?}", extra)));
        }

        let mut in_patterns = Vec::new();
        for pattern in &patterns {
            for term in [&pattern.subject, &pattern.predicate, &pattern.object] {
                if let QueryTerm::Var(v) = term {
                    if !in_patterns.contains(v) {
                        in_patterns.push(v.clone());
                    }
                }
            }
        }
        let variables = if star { in_patterns } else { projected };

        Ok(SelectQuery {
            distinct,
            variables,
            patterns,
            limit,
        })
    }

    fn parse_group(&mut self) -> Result<Vec<TriplePattern>, QuadFsError> {
        let mut patterns = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Punct('}')) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Punct('.')) => {
                    self.pos += 1;
                }
                None => return Err(parse_error("unterminated group pattern")),
                Some(_) => {
                    let subject = self.parse_term()?;
                    loop {
                        let predicate = self.parse_predicate()?;
                        loop {
                            let object = self.parse_term()?;
                            patterns.push(TriplePattern {
                                subject: subject.clone(),
                                predicate: predicate.clone(),
                                object,
                            });
                            if patterns.len() > MAX_QUERY_PATTERNS {
                                return Err(parse_error(format!(
                                    "more than {} triple patterns",
                                    MAX_QUERY_PATTERNS
                                )));
                            }
                            if !matches!(self.peek(), Some(Token::Punct(','))) {
                                break;
                            }
                            self.pos += 1;
                        }
                        if !matches!(self.peek(), Some(Token::Punct(';'))) {
                            break;
                        }
                        self.pos += 1;
                        // A dangling ';' before the end of the triple.
                        if matches!(self.peek(), Some(Token::Punct('.' | '}'))) {
                            break;
                        }
                    }
                }
            }
        }
        Ok(patterns)
    }

    fn parse_predicate(&mut self) -> Result<QueryTerm, QuadFsError> {
        if matches!(self.peek(), Some(Token::Word(w)) if w == "a") {
            self.pos += 1;
            return Ok(QueryTerm::Const(Term::iri(RDF_TYPE)));
        }
        self.parse_term()
    }

    fn parse_term(&mut self) -> Result<QueryTerm, QuadFsError> {
        match self.next() {
            Some(Token::Var(v)) => Ok(QueryTerm::Var(v)),
            Some(Token::Iri(iri)) => Ok(QueryTerm::Const(Term::iri(iri))),
            Some(Token::Word(w)) => self.resolve_word(&w).map(QueryTerm::Const),
            Some(Token::Integer(n)) => Ok(QueryTerm::Const(Term::typed(
                n,
                format!("{}integer", XSD_NS),
            ))),
            Some(Token::Str(value)) => {
                if matches!(self.peek(), Some(Token::DoubleCaret)) {
                    self.pos += 1;
                    let datatype = match self.next() {
                        Some(Token::Iri(iri)) => iri,
                        Some(Token::Word(w)) => self.expand(&w)?,
                        other => {
                            return Err(parse_error(format!("expected datatype, found {:?}", other)));
                        }
                    };
                    Ok(QueryTerm::Const(Term::typed(value, datatype)))
                } else {
                    Ok(QueryTerm::Const(Term::literal(value)))
                }
            }
            other => Err(parse_error(format!("expected a term, found {:?}", other))),
        }
    }

    fn resolve_word(&self, word: &str) -> Result<Term, QuadFsError> {
        match word {
            "true" | "false" => Ok(Term::typed(word, format!("{}boolean", XSD_NS))),
            _ => self.expand(word).map(Term::iri),
        }
    }

    fn expand(&self, word: &str) -> Result<String, QuadFsError> {
        let (prefix, local) = word
            .split_once(':')
            .ok_or_else(|| parse_error(format!("unexpected word {:?}", word)))?;
        let ns = self
            .prefixes
            .get(prefix)
            .ok_or_else(|| parse_error(format!("unknown prefix {:?}", prefix)))?;
        Ok(format!("{}{}", ns, local))
    }
}

/// Parse query text.
pub fn parse(text: &str) -> Result<SelectQuery, QuadFsError> {
    if text.len() > MAX_QUERY_LENGTH {
        return Err(parse_error(format!(
            "query longer than {} bytes",
            MAX_QUERY_LENGTH
        )));
    }
    Parser::new(tokenize(text)?).parse()
}

/// Parse and evaluate `text` against `store`.
pub fn execute(store: &dyn QuadStore, text: &str) -> Result<QueryResults, QuadFsError> {
    parse(text)?.evaluate(store)
}

// =============================================================================
// EVALUATION
// =============================================================================

fn bound(term: &QueryTerm, binding: &Binding) -> Option<Term> {
    match term {
        QueryTerm::Const(t) => Some(t.clone()),
        QueryTerm::Var(v) => binding.get(v).cloned(),
    }
}

fn unify(term: &QueryTerm, value: &Term, binding: &mut Binding) -> bool {
    match term {
        QueryTerm::Const(t) => t == value,
        QueryTerm::Var(v) => match binding.get(v) {
            Some(existing) => existing == value,
            None => {
                binding.insert(v.clone(), value.clone());
                true
            }
        },
    }
}

fn lookup_for(pattern: &TriplePattern, binding: &Binding) -> QuadPattern {
    let mut lookup = QuadPattern::any();
    if let Some(s) = bound(&pattern.subject, binding) {
        lookup = lookup.subject(s);
    }
    if let Some(p) = bound(&pattern.predicate, binding) {
        lookup = lookup.predicate(p);
    }
    if let Some(o) = bound(&pattern.object, binding) {
        lookup = lookup.object(o);
    }
    lookup
}

/// State of one depth-first evaluation.
struct Evaluation<'a> {
    query: &'a SelectQuery,
    store: &'a dyn QuadStore,
    max_steps: usize,
    remaining: usize,
    seen: BTreeSet<Binding>,
    rows: Vec<Binding>,
}

impl Evaluation<'_> {
    fn is_full(&self) -> bool {
        self.rows.len() >= self.query.limit
    }

    fn charge(&mut self, steps: usize) -> Result<(), QuadFsError> {
        self.remaining = self.remaining.checked_sub(steps).ok_or_else(|| {
            QuadFsError::InvalidArgument(format!(
                "query examines more than {} candidate quads; constrain its patterns",
                self.max_steps
            ))
        })?;
        Ok(())
    }

    fn search(&mut self, depth: usize, binding: &Binding) -> Result<(), QuadFsError> {
        let query = self.query;
        let Some(pattern) = query.patterns.get(depth) else {
            self.emit(binding);
            return Ok(());
        };

        let candidates = self.store.find(&lookup_for(pattern, binding));
        self.charge(candidates.len().max(1))?;
        for quad in candidates {
            let mut extended = binding.clone();
            if unify(&pattern.subject, &quad.subject, &mut extended)
                && unify(&pattern.predicate, &quad.predicate, &mut extended)
                && unify(&pattern.object, &quad.object, &mut extended)
            {
                self.search(depth + 1, &extended)?;
                if self.is_full() {
                    break;
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, solution: &Binding) {
        let row: Binding = self
            .query
            .variables
            .iter()
            .filter_map(|v| solution.get(v).map(|t| (v.clone(), t.clone())))
            .collect();
        if self.query.distinct && !self.seen.insert(row.clone()) {
            return;
        }
        self.rows.push(row);
    }
}

impl SelectQuery {
    /// Evaluate with the default step budget.
    pub fn evaluate(&self, store: &dyn QuadStore) -> Result<QueryResults, QuadFsError> {
        self.evaluate_within(store, MAX_QUERY_STEPS)
    }

    /// Evaluate by depth-first join in pattern order, examining at most
    /// `max_steps` candidate quads.
    pub fn evaluate_within(
        &self,
        store: &dyn QuadStore,
        max_steps: usize,
    ) -> Result<QueryResults, QuadFsError> {
        let mut evaluation = Evaluation {
            query: self,
            store,
            max_steps,
            remaining: max_steps,
            seen: BTreeSet::new(),
            rows: Vec::new(),
        };
        if !evaluation.is_full() {
            evaluation.search(0, &Binding::new())?;
        }
        Ok(QueryResults {
            variables: self.variables.clone(),
            rows: evaluation.rows,
        })
    }
}

// =============================================================================
// RESULT SERIALIZATION
// =============================================================================

/// SPARQL 1.1 JSON results layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparqlJson {
    pub head: SparqlHead,
    pub results: SparqlBindings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparqlHead {
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparqlBindings {
    pub bindings: Vec<BTreeMap<String, SparqlValue>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparqlValue {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

impl From<&Term> for SparqlValue {
    fn from(term: &Term) -> Self {
        match term {
            Term::Iri(iri) => Self {
                kind: "uri".to_string(),
                value: iri.clone(),
                datatype: None,
            },
            Term::Literal { value, datatype } => Self {
                kind: "literal".to_string(),
                value: value.clone(),
                datatype: datatype.clone(),
            },
            Term::Blank(id) => Self {
                kind: "bnode".to_string(),
                value: id.clone(),
                datatype: None,
            },
        }
    }
}

impl QueryResults {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_sparql_json(&self) -> SparqlJson {
        SparqlJson {
            head: SparqlHead {
                vars: self.variables.clone(),
            },
            results: SparqlBindings {
                bindings: self
                    .rows
                    .iter()
                    .map(|row| row.iter().map(|(k, v)| (k.clone(), v.into())).collect())
                    .collect(),
            },
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
    use crate::Quad;
    use crate::graph::QuadSet;
    use crate::primitives::{FS_FILE, FS_FILE_SIZE, RDFS_LABEL, XSD_LONG};

    fn store() -> QuadSet {
        let mut set = QuadSet::new();
        for (node, name, size) in [("urn:f1", "a.txt", "3"), ("urn:f2", "b.txt", "10")] {
            set.insert(Quad::new(Term::iri(node), Term::iri(RDF_TYPE), Term::iri(FS_FILE)));
            set.insert(Quad::new(Term::iri(node), Term::iri(RDFS_LABEL), Term::literal(name)));
            set.insert(Quad::new(
                Term::iri(node),
                Term::iri(FS_FILE_SIZE),
                Term::typed(size, XSD_LONG),
            ));
        }
        set
    }

    #[test]
    fn select_with_join() {
        let results = execute(
            &store(),
            "SELECT ?f ?name WHERE { ?f a fs:File ; rdfs:label ?name . }",
        )
        .expect("query");
        assert_eq!(results.len(), 2);
        let names: Vec<_> = results
            .rows
            .iter()
            .map(|r| r["name"].as_literal().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn typed_literal_constant_matches() {
        let results = execute(
            &store(),
            r#"SELECT ?f WHERE { ?f fs:fileSize "10"^^xsd:long }"#,
        )
        .expect("query");
        assert_eq!(results.len(), 1);
        assert_eq!(results.rows[0]["f"], Term::iri("urn:f2"));
    }

    #[test]
    fn star_distinct_and_limit() {
        let q = parse("PREFIX ex: <urn:> SELECT DISTINCT * { ?s a ?type } LIMIT 1").expect("parse");
        assert_eq!(q.variables, vec!["s", "type"]);
        assert!(q.distinct);
        assert_eq!(q.limit, 1);
        assert_eq!(q.evaluate(&store()).expect("evaluate").len(), 1);

        let types = execute(&store(), "SELECT DISTINCT ?t { ?s a ?t }").expect("query");
        assert_eq!(types.len(), 1);
    }

    #[test]
    fn custom_prefixes_and_object_lists() {
        let mut set = QuadSet::new();
        set.insert(Quad::new(Term::iri("urn:x"), Term::iri("urn:p"), Term::literal("1")));
        set.insert(Quad::new(Term::iri("urn:x"), Term::iri("urn:p"), Term::literal("2")));
        let results = execute(
            &set,
            "PREFIX u: <urn:> SELECT ?s WHERE { ?s u:p \"1\", \"2\" }",
        )
        .expect("query");
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn updates_are_rejected() {
        for update in [
            "INSERT DATA { <urn:a> <urn:b> <urn:c> }",
            "DELETE WHERE { ?s ?p ?o }",
            "PREFIX x: <urn:> DROP ALL",
            "CONSTRUCT { ?s ?p ?o } WHERE { ?s ?p ?o }",
        ] {
            assert!(
                matches!(parse(update), Err(QuadFsError::UnsupportedOperation(_))),
                "{} should be rejected",
                update
            );
        }
    }

    #[test]
    fn malformed_queries_are_parse_errors() {
        for bad in [
            "SELECT WHERE { ?s ?p ?o }",
            "SELECT ?s { ?s ?p }",
            "SELECT ?s { ?s unknown:p ?o }",
            "SELECT ?s { ?s ?p \"open }",
            "SELECT ?s { ?s ?p ?o } garbage",
        ] {
            assert!(
                matches!(parse(bad), Err(QuadFsError::QueryParse(_))),
                "{} should not parse",
                bad
            );
        }
    }

    fn wide_store(subjects: usize) -> QuadSet {
        let mut set = QuadSet::new();
        for i in 0..subjects {
            let node = Term::iri(format!("urn:n{}", i));
            for p in ["urn:a", "urn:b", "urn:c"] {
                set.insert(Quad::new(node.clone(), Term::iri(p), Term::literal(i.to_string())));
            }
        }
        set
    }

    #[test]
    fn limit_stops_cross_products_early() {
        let set = wide_store(100);
        let results = execute(&set, "SELECT * { ?a ?b ?c . ?d ?e ?f . ?g ?h ?i } LIMIT 1")
            .expect("query");
        assert_eq!(results.len(), 1);
        assert_eq!(results.variables.len(), 9);
    }

    #[test]
    fn unbounded_joins_exhaust_the_step_budget() {
        let set = wide_store(100);
        // Only 100 distinct ?a values exist, so LIMIT never cuts the
        // 300^3 cross product short.
        let err = execute(&set, "SELECT DISTINCT ?a { ?a ?b ?c . ?d ?e ?f . ?g ?h ?i }")
            .expect_err("budget");
        assert!(matches!(err, QuadFsError::InvalidArgument(_)), "{:?}", err);

        let q = parse("SELECT ?s { ?s ?p ?o }").expect("parse");
        assert!(q.evaluate_within(&set, 299).is_err());
        assert_eq!(q.evaluate_within(&set, 300).expect("fits").len(), 300);
    }

    #[test]
    fn sparql_json_shape() {
        let results = execute(&store(), "SELECT ?f ?size { ?f fs:fileSize ?size } LIMIT 1")
            .expect("query");
        let json = results.to_sparql_json();
        assert_eq!(json.head.vars, vec!["f", "size"]);
        let row = &json.results.bindings[0];
        assert_eq!(row["f"].kind, "uri");
        assert_eq!(row["size"].kind, "literal");
        assert_eq!(row["size"].datatype.as_deref(), Some(XSD_LONG));
    }
}
