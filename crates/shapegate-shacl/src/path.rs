//! SHACL property paths.
//!
//! A path is parsed once when shapes load and shared read-only afterwards.
//! Two evaluation styles exist:
//!
//! - **Incremental**: [`Path::matchers_for`] turns a path into statement
//!   matchers that plan nodes run against the transaction's added/removed
//!   statements. Only predicate paths and inverses of supported paths can
//!   be expressed this way; everything else reports
//!   [`ShaclError::UnsupportedPath`] and the shape is validated in bulk.
//! - **Direct**: [`Path::evaluate`] / [`Path::evaluate_reverse`] walk any
//!   path against a statement source. Closure paths use a breadth-first
//!   search with a visited set, so cyclic data terminates.

use crate::error::{Result, ShaclError};
use crate::graph::GraphReader;
use crate::matcher::{Slot, StatementMatcher, Variable};
use shapegate_model::{vocab, Iri, StatementPattern, Term};
use shapegate_store::{StatementSource, StoreError};
use ahash::AHashSet;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Path {
    Predicate(Iri),
    Inverse(Box<Path>),
    Sequence(Vec<Path>),
    Alternative(Vec<Path>),
    ZeroOrMore(Box<Path>),
    OneOrMore(Box<Path>),
    ZeroOrOne(Box<Path>),
}

// ============================================================================
// Parsing
// ============================================================================

impl Path {
    /// Parse the path rooted at `node` in `graph`.
    pub fn parse(graph: &dyn StatementSource, node: &Term) -> Result<Path> {
        let mut visiting = AHashSet::new();
        parse_node(GraphReader::new(graph), node, &mut visiting)
    }
}

fn parse_node(reader: GraphReader<'_>, node: &Term, visiting: &mut AHashSet<Term>) -> Result<Path> {
    match node {
        Term::Iri(iri) if iri.as_str() != vocab::rdf::NIL => return Ok(Path::Predicate(iri.clone())),
        Term::Literal(_) => return Err(ShaclError::malformed_path(node, "a literal is not a path")),
        _ => {}
    }
    if !visiting.insert(node.clone()) {
        return Err(ShaclError::malformed_path(node, "path definition is cyclic"));
    }
    let parsed = parse_composite(reader, node, visiting);
    visiting.remove(node);
    parsed
}

fn parse_members(
    reader: GraphReader<'_>,
    node: &Term,
    head: &Term,
    what: &str,
    visiting: &mut AHashSet<Term>,
) -> Result<Vec<Path>> {
    let items = reader
        .list(head)?
        .map_err(|reason| ShaclError::malformed_path(node, reason))?;
    if items.len() < 2 {
        return Err(ShaclError::malformed_path(
            node,
            format!("{what} path needs at least two members"),
        ));
    }
    items
        .iter()
        .map(|item| parse_node(reader, item, visiting))
        .collect()
}

fn parse_composite(
    reader: GraphReader<'_>,
    node: &Term,
    visiting: &mut AHashSet<Term>,
) -> Result<Path> {
    if reader.is_list(node)? {
        return parse_members(reader, node, node, "sequence", visiting).map(Path::Sequence);
    }

    let mut found = Vec::new();
    for predicate in [
        vocab::sh::INVERSE_PATH,
        vocab::sh::ALTERNATIVE_PATH,
        vocab::sh::ZERO_OR_MORE_PATH,
        vocab::sh::ONE_OR_MORE_PATH,
        vocab::sh::ZERO_OR_ONE_PATH,
    ] {
        match reader.objects(node, predicate)?.as_slice() {
            [] => {}
            [object] => found.push((predicate, object.clone())),
            _ => {
                return Err(ShaclError::malformed_path(
                    node,
                    format!("more than one value for <{predicate}>"),
                ))
            }
        }
    }

    let [(predicate, object)] = found.as_slice() else {
        return Err(ShaclError::malformed_path(
            node,
            if found.is_empty() {
                "unknown path construct".to_string()
            } else {
                "more than one path construct on the same node".to_string()
            },
        ));
    };

    let boxed = |visiting: &mut AHashSet<Term>| parse_node(reader, object, visiting).map(Box::new);
    Ok(match *predicate {
        vocab::sh::INVERSE_PATH => Path::Inverse(boxed(visiting)?),
        vocab::sh::ALTERNATIVE_PATH => {
            Path::Alternative(parse_members(reader, node, object, "alternative", visiting)?)
        }
        vocab::sh::ZERO_OR_MORE_PATH => Path::ZeroOrMore(boxed(visiting)?),
        vocab::sh::ONE_OR_MORE_PATH => Path::OneOrMore(boxed(visiting)?),
        _ => Path::ZeroOrOne(boxed(visiting)?),
    })
}

// ============================================================================
// Incremental support
// ============================================================================

impl Path {
    /// Matchers binding `subject` to the focus side and `object` to the
    /// value side of the path.
    pub fn matchers_for(&self, subject: &Variable, object: &Variable) -> Result<Vec<StatementMatcher>> {
        match self {
            Path::Predicate(p) => Ok(vec![StatementMatcher::new(
                Slot::Var(subject.clone()),
                p.clone(),
                Slot::Var(object.clone()),
            )]),
            Path::Inverse(inner) => inner.matchers_for(object, subject),
            _ => Err(ShaclError::UnsupportedPath(self.to_string())),
        }
    }

    pub fn is_incrementally_supported(&self) -> bool {
        match self {
            Path::Predicate(_) => true,
            Path::Inverse(inner) => inner.is_incrementally_supported(),
            _ => false,
        }
    }

    /// Basic graph pattern text for the path, as understood by
    /// [`crate::query::PatternQueryEngine`].
    pub fn render_as_pattern(&self, subject: &Variable, object: &Variable) -> Result<String> {
        match self {
            Path::Predicate(p) => Ok(format!("{subject} {p} {object} .")),
            Path::Inverse(inner) => inner.render_as_pattern(object, subject),
            _ => Err(ShaclError::UnsupportedPath(self.to_string())),
        }
    }

    /// `(predicate, forward)` for predicate paths and (nested) inverses of
    /// them.
    pub fn as_simple_predicate(&self) -> Option<(&Iri, bool)> {
        match self {
            Path::Predicate(p) => Some((p, true)),
            Path::Inverse(inner) => inner.as_simple_predicate().map(|(p, fwd)| (p, !fwd)),
            _ => None,
        }
    }

    /// Every predicate mentioned anywhere in the path.
    pub fn predicates(&self) -> BTreeSet<Iri> {
        let mut out = BTreeSet::new();
        self.collect_predicates(&mut out);
        out
    }

    fn collect_predicates(&self, out: &mut BTreeSet<Iri>) {
        match self {
            Path::Predicate(p) => {
                out.insert(p.clone());
            }
            Path::Inverse(inner)
            | Path::ZeroOrMore(inner)
            | Path::OneOrMore(inner)
            | Path::ZeroOrOne(inner) => inner.collect_predicates(out),
            Path::Sequence(steps) | Path::Alternative(steps) => {
                steps.iter().for_each(|s| s.collect_predicates(out))
            }
        }
    }
}

// ============================================================================
// Direct evaluation
// ============================================================================

impl Path {
    /// Value nodes reachable from `focus`.
    pub fn evaluate(
        &self,
        source: &dyn StatementSource,
        focus: &Term,
    ) -> std::result::Result<BTreeSet<Term>, StoreError> {
        self.step(source, &BTreeSet::from([focus.clone()]), true)
    }

    /// Focus nodes from which `value` is reachable.
    pub fn evaluate_reverse(
        &self,
        source: &dyn StatementSource,
        value: &Term,
    ) -> std::result::Result<BTreeSet<Term>, StoreError> {
        self.step(source, &BTreeSet::from([value.clone()]), false)
    }

    /// `(start, end)` pairs for every start node. With `forward` the starts
    /// are focus nodes; otherwise they are value nodes and the path is
    /// walked backwards. Simple predicate paths take one batched lookup.
    pub fn pairs(
        &self,
        source: &dyn StatementSource,
        starts: &[Term],
        forward: bool,
    ) -> std::result::Result<Vec<(Term, Term)>, StoreError> {
        if starts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some((predicate, predicate_forward)) = self.as_simple_predicate() {
            let along_predicate = predicate_forward == forward;
            let patterns: Vec<StatementPattern> = starts
                .iter()
                .filter(|s| !along_predicate || s.is_resource())
                .map(|s| {
                    let pattern = StatementPattern::any().with_predicate(predicate.clone());
                    if along_predicate {
                        pattern.with_subject(s.clone())
                    } else {
                        pattern.with_object(s.clone())
                    }
                })
                .collect();
            if patterns.is_empty() {
                return Ok(Vec::new());
            }
            let mut by_start: BTreeMap<Term, Vec<Term>> = BTreeMap::new();
            for st in source.statements_batch(&patterns)? {
                let (start, end) = if along_predicate {
                    (st.subject, st.object)
                } else {
                    (st.object, st.subject)
                };
                by_start.entry(start).or_default().push(end);
            }
            let mut out = Vec::new();
            for start in starts {
                if let Some(ends) = by_start.get(start) {
                    let unique: BTreeSet<&Term> = ends.iter().collect();
                    out.extend(unique.into_iter().map(|e| (start.clone(), e.clone())));
                }
            }
            return Ok(out);
        }

        let mut out = Vec::new();
        for start in starts {
            let ends = self.step(source, &BTreeSet::from([start.clone()]), forward)?;
            out.extend(ends.into_iter().map(|e| (start.clone(), e)));
        }
        Ok(out)
    }

    fn step(
        &self,
        source: &dyn StatementSource,
        nodes: &BTreeSet<Term>,
        forward: bool,
    ) -> std::result::Result<BTreeSet<Term>, StoreError> {
        if nodes.is_empty() {
            return Ok(BTreeSet::new());
        }
        match self {
            Path::Predicate(p) => {
                let patterns: Vec<StatementPattern> = nodes
                    .iter()
                    .filter(|n| !forward || n.is_resource())
                    .map(|n| {
                        let pattern = StatementPattern::any().with_predicate(p.clone());
                        if forward {
                            pattern.with_subject(n.clone())
                        } else {
                            pattern.with_object(n.clone())
                        }
                    })
                    .collect();
                if patterns.is_empty() {
                    return Ok(BTreeSet::new());
                }
                Ok(source
                    .statements_batch(&patterns)?
                    .map(|st| if forward { st.object } else { st.subject })
                    .collect())
            }
            Path::Inverse(inner) => inner.step(source, nodes, !forward),
            Path::Sequence(steps) => {
                let mut current = nodes.clone();
                let ordered: Box<dyn Iterator<Item = &Path>> = if forward {
                    Box::new(steps.iter())
                } else {
                    Box::new(steps.iter().rev())
                };
                for step in ordered {
                    current = step.step(source, &current, forward)?;
                    if current.is_empty() {
                        break;
                    }
                }
                Ok(current)
            }
            Path::Alternative(alternatives) => {
                let mut out = BTreeSet::new();
                for alternative in alternatives {
                    out.extend(alternative.step(source, nodes, forward)?);
                }
                Ok(out)
            }
            Path::ZeroOrOne(inner) => {
                let mut out = nodes.clone();
                out.extend(inner.step(source, nodes, forward)?);
                Ok(out)
            }
            Path::ZeroOrMore(inner) => inner.closure(source, nodes.clone(), forward),
            Path::OneOrMore(inner) => {
                let first = inner.step(source, nodes, forward)?;
                inner.closure(source, first, forward)
            }
        }
    }

    /// `start` plus everything reachable from it by repeating `self`.
    fn closure(
        &self,
        source: &dyn StatementSource,
        start: BTreeSet<Term>,
        forward: bool,
    ) -> std::result::Result<BTreeSet<Term>, StoreError> {
        let mut visited = start.clone();
        let mut frontier = start;
        while !frontier.is_empty() {
            let next = self.step(source, &frontier, forward)?;
            frontier = next.into_iter().filter(|n| visited.insert(n.clone())).collect();
        }
        Ok(visited)
    }
}

// ============================================================================
// Display (SPARQL property path syntax)
// ============================================================================

impl Path {
    fn is_atomic(&self) -> bool {
        matches!(
            self,
            Path::Predicate(_) | Path::Sequence(_) | Path::Alternative(_)
        )
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_atomic() {
            write!(f, "{self}")
        } else {
            write!(f, "({self})")
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Path::Predicate(p) => write!(f, "{p}"),
            Path::Inverse(inner) => {
                write!(f, "^")?;
                inner.fmt_operand(f)
            }
            Path::Sequence(steps) | Path::Alternative(steps) => {
                let sep = if matches!(self, Path::Sequence(_)) { " / " } else { " | " };
                write!(f, "(")?;
                for (i, step) in steps.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{sep}")?;
                    }
                    write!(f, "{step}")?;
                }
                write!(f, ")")
            }
            Path::ZeroOrMore(inner) => {
                inner.fmt_operand(f)?;
                write!(f, "*")
            }
            Path::OneOrMore(inner) => {
                inner.fmt_operand(f)?;
                write!(f, "+")
            }
            Path::ZeroOrOne(inner) => {
                inner.fmt_operand(f)?;
                write!(f, "?")
            }
        }
    }
}
