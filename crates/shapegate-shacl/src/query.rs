//! Basic-graph-pattern SELECT queries.
//!
//! [`QueryEngine`] is the seam `sh:sparql` constraints and the query-engine
//! validation approach call through. The built-in [`PatternQueryEngine`]
//! understands
//!
//! ```text
//! PREFIX ex: <http://example.org/>
//! SELECT DISTINCT $this ?value WHERE {
//!     $this ex:knows ?value ; a ex:Person .
//!     ?value ex:age "42"^^<http://www.w3.org/2001/XMLSchema#integer>, 43 .
//! }
//! ```
//!
//! and nothing more: no FILTER, OPTIONAL, property paths or solution
//! modifiers. Anything else is reported as [`QueryError::Unsupported`].

use crate::matcher::Variable;
use dashmap::DashMap;
use shapegate_model::{ntriples, vocab, Iri, Literal, StatementPattern, Term};
use shapegate_store::{StatementSource, StoreError};
use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

pub type Bindings = BTreeMap<Variable, Term>;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("unsupported query feature: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub trait QueryEngine: Send + Sync + fmt::Debug {
    /// Solutions of `query` over `source`, with `bindings` pre-bound.
    fn select(
        &self,
        query: &str,
        bindings: &Bindings,
        source: &dyn StatementSource,
    ) -> Result<Vec<Bindings>, QueryError>;

    /// Checks a query without running it.
    fn prepare(&self, query: &str) -> Result<(), QueryError>;
}

/// Nested-loop evaluator for basic graph patterns. Parsed queries are kept
/// for the life of the engine.
#[derive(Debug, Default)]
pub struct PatternQueryEngine {
    parsed: DashMap<String, Arc<SelectQuery>>,
}

impl PatternQueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn parsed(&self, query: &str) -> Result<Arc<SelectQuery>, QueryError> {
        if let Some(hit) = self.parsed.get(query) {
            return Ok(hit.clone());
        }
        let parsed = Arc::new(SelectQuery::parse(query)?);
        self.parsed.insert(query.to_string(), parsed.clone());
        Ok(parsed)
    }
}

impl QueryEngine for PatternQueryEngine {
    fn select(
        &self,
        query: &str,
        bindings: &Bindings,
        source: &dyn StatementSource,
    ) -> Result<Vec<Bindings>, QueryError> {
        self.parsed(query)?.evaluate(bindings, source)
    }

    fn prepare(&self, query: &str) -> Result<(), QueryError> {
        self.parsed(query).map(|_| ())
    }
}

// ============================================================================
// Query model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternTerm {
    Var(Variable),
    Term(Term),
}

impl PatternTerm {
    fn resolve<'a>(&'a self, solution: &'a Bindings) -> Option<&'a Term> {
        match self {
            PatternTerm::Term(term) => Some(term),
            PatternTerm::Var(v) => solution.get(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TriplePattern {
    subject: PatternTerm,
    predicate: PatternTerm,
    object: PatternTerm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Projection {
    All,
    Variables(Vec<Variable>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    distinct: bool,
    projection: Projection,
    patterns: Vec<TriplePattern>,
}

/// Blank nodes in a pattern behave as variables that are never projected.
const BLANK_VAR_PREFIX: &str = "_:";

impl SelectQuery {
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let tokens = lex(text)?;
        Parser {
            tokens,
            pos: 0,
            prefixes: AHashMap::new(),
            end: text.len(),
        }
        .query()
    }

    pub fn evaluate(
        &self,
        bindings: &Bindings,
        source: &dyn StatementSource,
    ) -> Result<Vec<Bindings>, QueryError> {
        let mut solutions = vec![bindings.clone()];
        let mut remaining: Vec<&TriplePattern> = self.patterns.iter().collect();

        while !remaining.is_empty() && !solutions.is_empty() {
            // Most selective pattern first: the one with the most positions
            // already bound.
            let bound = |p: &TriplePattern| {
                [&p.subject, &p.predicate, &p.object]
                    .into_iter()
                    .filter(|t| t.resolve(&solutions[0]).is_some())
                    .count()
            };
            let index = remaining
                .iter()
                .enumerate()
                .max_by_key(|(i, p)| (bound(p), std::cmp::Reverse(*i)))
                .map_or(0, |(i, _)| i);
            let pattern = remaining.remove(index);

            let mut next = Vec::new();
            for solution in &solutions {
                extend(pattern, solution, source, &mut next)?;
            }
            solutions = next;
        }

        let mut out: Vec<Bindings> = solutions
            .into_iter()
            .map(|solution| self.project(solution))
            .collect();
        if self.distinct {
            let mut seen = BTreeSet::new();
            out.retain(|s| seen.insert(s.clone()));
        }
        Ok(out)
    }

    fn project(&self, solution: Bindings) -> Bindings {
        match &self.projection {
            Projection::All => solution
                .into_iter()
                .filter(|(v, _)| !v.name().starts_with(BLANK_VAR_PREFIX))
                .collect(),
            Projection::Variables(vars) => solution
                .into_iter()
                .filter(|(v, _)| vars.contains(v))
                .collect(),
        }
    }

    pub fn projected(&self) -> Option<&[Variable]> {
        match &self.projection {
            Projection::All => None,
            Projection::Variables(vars) => Some(vars),
        }
    }
}

fn extend(
    pattern: &TriplePattern,
    solution: &Bindings,
    source: &dyn StatementSource,
    out: &mut Vec<Bindings>,
) -> Result<(), QueryError> {
    let subject = pattern.subject.resolve(solution);
    let predicate = match pattern.predicate.resolve(solution) {
        Some(Term::Iri(p)) => Some(p.clone()),
        Some(_) => return Ok(()),
        None => None,
    };
    let object = pattern.object.resolve(solution);
    if subject.is_some_and(Term::is_literal) {
        return Ok(());
    }

    let lookup = StatementPattern::new(subject.cloned(), predicate, object.cloned());
    for st in source.statements(&lookup)? {
        let mut candidate = solution.clone();
        let positions = [
            (&pattern.subject, st.subject),
            (&pattern.predicate, Term::Iri(st.predicate)),
            (&pattern.object, st.object),
        ];
        let consistent = positions.into_iter().all(|(slot, value)| match slot {
            PatternTerm::Term(_) => true,
            PatternTerm::Var(v) => match candidate.get(v) {
                Some(existing) => *existing == value,
                None => {
                    candidate.insert(v.clone(), value);
                    true
                }
            },
        });
        if consistent {
            out.push(candidate);
        }
    }
    Ok(())
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Iri(String),
    Prefixed(String, String),
    Var(String),
    Blank(String),
    Str {
        lexical: String,
        language: Option<String>,
        datatype: Option<Box<Tok>>,
    },
    Number(String),
    Word(String),
    Punct(char),
}

fn syntax(offset: usize, message: impl Into<String>) -> QueryError {
    QueryError::Syntax {
        offset,
        message: message.into(),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn lex(text: &str) -> Result<Vec<(usize, Tok)>, QueryError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let take_while = |mut j: usize, pred: &dyn Fn(char) -> bool| -> (usize, String) {
        let mut out = String::new();
        while let Some(&(_, c)) = chars.get(j) {
            if !pred(c) {
                break;
            }
            out.push(c);
            j += 1;
        }
        (j, out)
    };

    while let Some(&(offset, c)) = chars.get(i) {
        match c {
            c if c.is_whitespace() => i += 1,
            '#' => {
                let (j, _) = take_while(i, &|c| c != '\n');
                i = j;
            }
            '<' => {
                let (j, iri) = take_while(i + 1, &|c| c != '>');
                if chars.get(j).is_none() {
                    return Err(syntax(offset, "unterminated IRI"));
                }
                tokens.push((offset, Tok::Iri(iri)));
                i = j + 1;
            }
            '?' | '$' => {
                let (j, name) = take_while(i + 1, &is_name_char);
                if name.is_empty() {
                    return Err(syntax(offset, "empty variable name"));
                }
                tokens.push((offset, Tok::Var(name)));
                i = j;
            }
            '_' if chars.get(i + 1).map(|&(_, c)| c) == Some(':') => {
                let (j, label) = take_while(i + 2, &is_name_char);
                tokens.push((offset, Tok::Blank(label)));
                i = j;
            }
            '"' | '\'' => {
                let quote = c;
                let mut j = i + 1;
                let mut raw = String::new();
                loop {
                    match chars.get(j) {
                        None => return Err(syntax(offset, "unterminated string")),
                        Some(&(_, '\\')) => {
                            raw.push('\\');
                            if let Some(&(_, escaped)) = chars.get(j + 1) {
                                raw.push(escaped);
                            }
                            j += 2;
                        }
                        Some(&(_, c)) if c == quote => break,
                        Some(&(_, c)) => {
                            raw.push(c);
                            j += 1;
                        }
                    }
                }
                j += 1;
                let mut language = None;
                let mut datatype = None;
                if chars.get(j).map(|&(_, c)| c) == Some('@') {
                    let (k, tag) = take_while(j + 1, &is_name_char);
                    language = Some(tag);
                    j = k;
                } else if chars.get(j).map(|&(_, c)| c) == Some('^')
                    && chars.get(j + 1).map(|&(_, c)| c) == Some('^')
                {
                    let dt_offset = chars.get(j + 2).map_or(text.len(), |&(o, _)| o);
                    let (k, tok) = if chars.get(j + 2).map(|&(_, c)| c) == Some('<') {
                        let (k, iri) = take_while(j + 3, &|c| c != '>');
                        if chars.get(k).is_none() {
                            return Err(syntax(dt_offset, "unterminated datatype IRI"));
                        }
                        (k + 1, Tok::Iri(iri))
                    } else {
                        let (k, name) = take_while(j + 2, &|c| is_name_char(c) || c == ':');
                        let Some((prefix, local)) = name.split_once(':') else {
                            return Err(syntax(dt_offset, "expected datatype IRI"));
                        };
                        (k, Tok::Prefixed(prefix.to_string(), local.to_string()))
                    };
                    datatype = Some(Box::new(tok));
                    j = k;
                }
                tokens.push((
                    offset,
                    Tok::Str {
                        lexical: ntriples::unescape(&raw),
                        language,
                        datatype,
                    },
                ));
                i = j;
            }
            '.' => {
                // A dot followed by a digit starts a decimal.
                if c == '.' && chars.get(i + 1).is_some_and(|&(_, d)| d.is_ascii_digit()) {
                    let (j, digits) = take_while(i + 1, &|c| c.is_ascii_digit());
                    tokens.push((offset, Tok::Number(format!("0.{digits}"))));
                    i = j;
                } else {
                    tokens.push((offset, Tok::Punct(c)));
                    i += 1;
                }
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let (j, number) = take_while(i, &|c| {
                    c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')
                });
                // Trailing dot ends the triple.
                let (j, number) = match number.strip_suffix('.') {
                    Some(stripped) => (j - 1, stripped.to_string()),
                    None => (j, number),
                };
                tokens.push((offset, Tok::Number(number)));
                i = j;
            }
            c if c.is_alphabetic() || c == ':' => {
                let (j, word) = take_while(i, &|c| is_name_char(c) || c == ':' || c == '.');
                // Names never end in a dot.
                let trimmed = word.trim_end_matches('.');
                let j = j - (word.len() - trimmed.len());
                let tok = match trimmed.split_once(':') {
                    Some((prefix, local)) => Tok::Prefixed(prefix.to_string(), local.to_string()),
                    None => Tok::Word(trimmed.to_string()),
                };
                tokens.push((offset, tok));
                i = j;
            }
            other => {
                tokens.push((offset, Tok::Punct(other)));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<(usize, Tok)>,
    pos: usize,
    prefixes: AHashMap<String, String>,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(o, _)| *o)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        tok
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Tok::Word(w)) if w.eq_ignore_ascii_case(word))
    }

    fn expect_punct(&mut self, c: char) -> Result<(), QueryError> {
        let offset = self.offset();
        match self.next() {
            Some(Tok::Punct(p)) if p == c => Ok(()),
            other => Err(syntax(offset, format!("expected '{c}', found {other:?}"))),
        }
    }

    fn query(mut self) -> Result<SelectQuery, QueryError> {
        while self.is_word("PREFIX") {
            self.next();
            let offset = self.offset();
            let (Some(Tok::Prefixed(prefix, local)), Some(Tok::Iri(ns))) = (self.next(), self.next())
            else {
                return Err(syntax(offset, "expected PREFIX name: <namespace>"));
            };
            if !local.is_empty() {
                return Err(syntax(offset, "prefix name must end with ':'"));
            }
            self.prefixes.insert(prefix, ns);
        }

        if !self.is_word("SELECT") {
            return match self.peek() {
                Some(Tok::Word(w)) => Err(QueryError::Unsupported(w.to_uppercase())),
                _ => Err(syntax(self.offset(), "expected SELECT")),
            };
        }
        self.next();
        let distinct = if self.is_word("DISTINCT") || self.is_word("REDUCED") {
            self.next();
            true
        } else {
            false
        };

        let projection = if self.peek() == Some(&Tok::Punct('*')) {
            self.next();
            Projection::All
        } else {
            let mut vars = Vec::new();
            while let Some(Tok::Var(name)) = self.peek() {
                vars.push(Variable::new(name));
                self.next();
            }
            if vars.is_empty() {
                return Err(syntax(self.offset(), "expected projection"));
            }
            Projection::Variables(vars)
        };

        if self.is_word("WHERE") {
            self.next();
        }
        self.expect_punct('{')?;
        let patterns = self.triples()?;
        self.expect_punct('}')?;

        match self.peek() {
            None => Ok(SelectQuery {
                distinct,
                projection,
                patterns,
            }),
            Some(Tok::Word(w)) => Err(QueryError::Unsupported(w.to_uppercase())),
            Some(other) => Err(syntax(self.offset(), format!("trailing {other:?}"))),
        }
    }

    fn triples(&mut self) -> Result<Vec<TriplePattern>, QueryError> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::Punct('}')) | None => return Ok(out),
                Some(Tok::Punct('.')) => {
                    self.next();
                }
                Some(Tok::Word(w)) if !w.eq_ignore_ascii_case("a") => {
                    return Err(QueryError::Unsupported(w.to_uppercase()));
                }
                _ => {
                    let subject = self.term(false)?;
                    self.predicate_objects(&subject, &mut out)?;
                }
            }
        }
    }

    fn predicate_objects(
        &mut self,
        subject: &PatternTerm,
        out: &mut Vec<TriplePattern>,
    ) -> Result<(), QueryError> {
        loop {
            let predicate = self.term(true)?;
            loop {
                let object = self.term(false)?;
                out.push(TriplePattern {
                    subject: subject.clone(),
                    predicate: predicate.clone(),
                    object,
                });
                if self.peek() == Some(&Tok::Punct(',')) {
                    self.next();
                } else {
                    break;
                }
            }
            if self.peek() != Some(&Tok::Punct(';')) {
                return Ok(());
            }
            while self.peek() == Some(&Tok::Punct(';')) {
                self.next();
            }
            if matches!(self.peek(), Some(Tok::Punct('.')) | Some(Tok::Punct('}'))) {
                return Ok(());
            }
        }
    }

    fn term(&mut self, predicate_position: bool) -> Result<PatternTerm, QueryError> {
        let offset = self.offset();
        let Some(tok) = self.next() else {
            return Err(syntax(offset, "unexpected end of query"));
        };
        match tok {
            Tok::Var(name) => Ok(PatternTerm::Var(Variable::new(&name))),
            Tok::Word(w) if predicate_position && w == "a" => {
                Ok(PatternTerm::Term(Term::iri(vocab::rdf::TYPE)))
            }
            Tok::Word(w) if !predicate_position && (w == "true" || w == "false") => {
                Ok(PatternTerm::Term(Term::Literal(Literal::boolean(w == "true"))))
            }
            Tok::Punct('(') | Tok::Punct('[') => Err(QueryError::Unsupported(
                "collections and blank node property lists".to_string(),
            )),
            Tok::Blank(label) if !predicate_position => Ok(PatternTerm::Var(Variable::new(
                &format!("{BLANK_VAR_PREFIX}{label}"),
            ))),
            Tok::Number(n) if !predicate_position => Ok(PatternTerm::Term(number_literal(&n))),
            Tok::Str {
                lexical,
                language,
                datatype,
            } if !predicate_position => {
                let literal = match (language, datatype) {
                    (Some(tag), _) => Literal::lang(lexical, &tag),
                    (None, Some(dt)) => {
                        let dt = self.iri_of(*dt, offset)?;
                        if dt.as_str() == vocab::xsd::STRING {
                            Literal::simple(lexical)
                        } else {
                            Literal::typed(lexical, dt)
                        }
                    }
                    (None, None) => Literal::simple(lexical),
                };
                Ok(PatternTerm::Term(Term::Literal(literal)))
            }
            tok @ (Tok::Iri(_) | Tok::Prefixed(..)) => {
                Ok(PatternTerm::Term(Term::Iri(self.iri_of(tok, offset)?)))
            }
            Tok::Punct('/') | Tok::Punct('|') | Tok::Punct('^') => {
                Err(QueryError::Unsupported("property paths".to_string()))
            }
            other => Err(syntax(offset, format!("unexpected {other:?}"))),
        }
    }

    fn iri_of(&self, tok: Tok, offset: usize) -> Result<Iri, QueryError> {
        match tok {
            Tok::Iri(iri) => Ok(Iri::new(iri)),
            Tok::Prefixed(prefix, local) => match self.prefixes.get(&prefix) {
                Some(ns) => Ok(Iri::new(format!("{ns}{local}"))),
                None => Err(syntax(offset, format!("undeclared prefix {prefix}:"))),
            },
            other => Err(syntax(offset, format!("expected IRI, found {other:?}"))),
        }
    }
}

fn number_literal(text: &str) -> Term {
    let datatype = if text.contains(['e', 'E']) {
        vocab::xsd::DOUBLE
    } else if text.contains('.') {
        vocab::xsd::DECIMAL
    } else {
        vocab::xsd::INTEGER
    };
    Term::Literal(Literal::typed(text.to_string(), Iri::new(datatype)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ex, literal_triple, triple};
    use shapegate_model::Statement;
    use shapegate_store::MemoryStore;

    fn store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_all([
            triple("alice", "knows", "bob"),
            triple("alice", "knows", "carol"),
            triple("bob", "knows", "carol"),
            Statement::new(ex("alice"), vocab::rdf::TYPE, ex("Person")),
            literal_triple("bob", "age", Literal::integer(42)),
        ]);
        store
    }

    fn names(solutions: &[Bindings], var: &str) -> Vec<String> {
        let mut out: Vec<String> = solutions
            .iter()
            .filter_map(|s| s.get(&Variable::new(var)))
            .map(|t| t.str_value().to_string())
            .collect();
        out.sort();
        out
    }

    #[test]
    fn test_join_with_prefixes_and_a() {
        let engine = PatternQueryEngine::new();
        let store = store();
        let query = r#"
            PREFIX ex: <http://example.org/>
            SELECT ?x ?y WHERE {
                ?x a ex:Person ;
                   ex:knows ?y .
                ?y ex:knows ex:carol .
            }"#;
        let solutions = engine.select(query, &Bindings::new(), store.as_ref()).unwrap();
        assert_eq!(names(&solutions, "y"), vec!["http://example.org/bob"]);
    }

    #[test]
    fn test_prebound_this_and_literals() {
        let engine = PatternQueryEngine::new();
        let store = store();
        let bindings = Bindings::from([(Variable::new("this"), ex("bob"))]);
        let typed = r#"SELECT $this WHERE { $this <http://example.org/age> "42"^^<http://www.w3.org/2001/XMLSchema#integer> . }"#;
        assert_eq!(engine.select(typed, &bindings, store.as_ref()).unwrap().len(), 1);
        let bare = "SELECT $this WHERE { $this <http://example.org/age> 42 }";
        assert_eq!(engine.select(bare, &bindings, store.as_ref()).unwrap().len(), 1);
        let other = Bindings::from([(Variable::new("this"), ex("alice"))]);
        assert!(engine.select(bare, &other, store.as_ref()).unwrap().is_empty());
    }

    #[test]
    fn test_distinct_and_star() {
        let engine = PatternQueryEngine::new();
        let store = store();
        let all = engine
            .select("SELECT ?o WHERE { ?s <http://example.org/knows> ?o }", &Bindings::new(), store.as_ref())
            .unwrap();
        assert_eq!(all.len(), 3);
        let distinct = engine
            .select(
                "SELECT DISTINCT ?o WHERE { ?s <http://example.org/knows> ?o }",
                &Bindings::new(),
                store.as_ref(),
            )
            .unwrap();
        assert_eq!(distinct.len(), 2);
        let star = engine
            .select("SELECT * { _:b <http://example.org/knows> ?o }", &Bindings::new(), store.as_ref())
            .unwrap();
        assert!(star.iter().all(|s| s.len() == 1));
    }

    #[test]
    fn test_unsupported_features() {
        let engine = PatternQueryEngine::new();
        let err = engine
            .prepare("SELECT ?s WHERE { ?s ?p ?o FILTER(?o > 1) }")
            .unwrap_err();
        assert!(matches!(err, QueryError::Unsupported(ref f) if f == "FILTER"));
        assert!(matches!(
            engine.prepare("ASK { ?s ?p ?o }"),
            Err(QueryError::Unsupported(_))
        ));
        assert!(matches!(
            engine.prepare("SELECT ?s WHERE { ?s ex:p ?o }"),
            Err(QueryError::Syntax { .. })
        ));
    }
}
