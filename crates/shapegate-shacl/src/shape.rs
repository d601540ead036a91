//! Shapes and the shapes-graph parser.
//!
//! Shapes are parsed eagerly: every definition problem surfaces as
//! [`ShaclError::MalformedShape`] or [`ShaclError::MalformedPath`] when the
//! shapes load, never during a transaction.

use crate::constraints::{
    ClosedCheck, Component, HasValueAmong, LogicalCheck, LogicalKind, NodeKind, PairCheck,
    PairKind, PatternCheck, Qualified, RangeKind, SparqlConstraint, ValueCheck,
};
use crate::connections::ConnectionsGroup;
use crate::error::{Result, ShaclError};
use crate::graph::GraphReader;
use crate::matcher::{Slot, StatementMatcher, Variable};
use crate::path::Path;
use crate::plan::View;
use crate::tuple::Scope;
use serde::{Deserialize, Serialize};
use shapegate_model::{vocab, Iri, Literal, StatementPattern, Term};
use shapegate_store::StatementSource;
use ahash::AHashSet;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[default]
    Violation,
    Warning,
    Info,
}

impl Severity {
    pub fn from_iri(iri: &str) -> Option<Self> {
        match iri {
            vocab::sh::VIOLATION => Some(Severity::Violation),
            vocab::sh::WARNING => Some(Severity::Warning),
            vocab::sh::INFO => Some(Severity::Info),
            _ => None,
        }
    }

    pub fn iri(self) -> &'static str {
        match self {
            Severity::Violation => vocab::sh::VIOLATION,
            Severity::Warning => vocab::sh::WARNING,
            Severity::Info => vocab::sh::INFO,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Violation => "Violation",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
        })
    }
}

// ============================================================================
// Targets
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Target {
    /// Instances of the class, including instances of its subclasses when
    /// reasoning is on.
    Class(Term),
    Node(Term),
    SubjectsOf(Iri),
    ObjectsOf(Iri),
}

impl Target {
    /// The matcher that binds `focus` to this target's nodes. `sh:targetNode`
    /// has none: its nodes are fixed.
    pub fn matcher(&self, focus: &Variable) -> Option<StatementMatcher> {
        let other = Slot::var("target_other");
        match self {
            Target::Class(class) => Some(StatementMatcher::instances_of(focus, class.clone())),
            Target::Node(_) => None,
            Target::SubjectsOf(p) => Some(StatementMatcher::new(
                Slot::Var(focus.clone()),
                p.clone(),
                other,
            )),
            Target::ObjectsOf(p) => Some(StatementMatcher::new(
                other,
                p.clone(),
                Slot::Var(focus.clone()),
            )),
        }
    }

    /// Whether `node` is a target in the post-commit graph.
    pub fn contains(&self, node: &Term, cx: &ConnectionsGroup) -> Result<bool> {
        let current = cx.view(View::Current);
        let patterns: Vec<StatementPattern> = match self {
            Target::Node(target) => return Ok(target == node),
            Target::Class(_) if node.is_literal() => return Ok(false),
            Target::SubjectsOf(_) if node.is_literal() => return Ok(false),
            Target::Class(class) => cx
                .resolve_subclasses(class)
                .into_iter()
                .map(|c| {
                    StatementPattern::any()
                        .with_subject(node.clone())
                        .with_predicate(Iri::new(vocab::rdf::TYPE))
                        .with_object(c)
                })
                .collect(),
            Target::SubjectsOf(p) => vec![StatementPattern::any()
                .with_subject(node.clone())
                .with_predicate(p.clone())],
            Target::ObjectsOf(p) => vec![StatementPattern::any()
                .with_predicate(p.clone())
                .with_object(node.clone())],
        };
        let mut found = cx.track(current.statements_batch(&patterns)?);
        Ok(found.next().is_some())
    }

    /// Whether a subclass hierarchy change can alter this target's nodes.
    pub fn depends_on_hierarchy(&self) -> bool {
        matches!(self, Target::Class(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Class(c) => write!(f, "targetClass {c}"),
            Target::Node(n) => write!(f, "targetNode {n}"),
            Target::SubjectsOf(p) => write!(f, "targetSubjectsOf {p}"),
            Target::ObjectsOf(p) => write!(f, "targetObjectsOf {p}"),
        }
    }
}

// ============================================================================
// Shapes
// ============================================================================

#[derive(Debug, Clone)]
pub enum ShapeKind {
    Node,
    Property(Path),
}

#[derive(Debug, Clone)]
pub struct Shape {
    id: Term,
    kind: ShapeKind,
    targets: Vec<Target>,
    components: Vec<Component>,
    severity: Severity,
    messages: Vec<String>,
    name: Option<String>,
    deactivated: bool,
    properties: Vec<Arc<Shape>>,
}

impl Shape {
    pub fn id(&self) -> &Term {
        &self.id
    }

    pub fn kind(&self) -> &ShapeKind {
        &self.kind
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            ShapeKind::Property(path) => Some(path),
            ShapeKind::Node => None,
        }
    }

    pub fn scope(&self) -> Scope {
        match self.kind {
            ShapeKind::Node => Scope::NodeShape,
            ShapeKind::Property(_) => Scope::PropertyShape,
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated
    }

    /// Property shapes of a node shape.
    pub fn properties(&self) -> &[Arc<Shape>] {
        &self.properties
    }

    /// How many edges away from a focus node a change can sit and still alter
    /// this shape's verdict on it. `None` when unbounded (complex paths,
    /// SPARQL constraints).
    pub fn depth(&self) -> Option<usize> {
        if self.deactivated {
            return Some(0);
        }
        let mut depth = 0;
        match &self.kind {
            ShapeKind::Node => {
                for component in &self.components {
                    let reach = match component {
                        // Compares the focus node's own edges.
                        Component::Pair(_) => 1,
                        other => other.reach()?,
                    };
                    depth = depth.max(reach);
                }
                for property in &self.properties {
                    depth = depth.max(property.depth()?);
                }
            }
            ShapeKind::Property(path) => {
                if !path.is_incrementally_supported() {
                    return None;
                }
                depth = 1;
                for component in &self.components {
                    depth = depth.max(1 + component.reach()?);
                }
            }
        }
        Some(depth)
    }

    /// Whether `node` is a target of this shape in the post-commit graph.
    pub fn is_target(&self, node: &Term, cx: &ConnectionsGroup) -> Result<bool> {
        for target in &self.targets {
            if target.contains(node, cx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn with_targets(&self, targets: Vec<Target>) -> Shape {
        Shape {
            targets,
            ..self.clone()
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ShapeKind::Node => write!(f, "{}", self.id),
            ShapeKind::Property(path) => write!(f, "{} ({path})", self.id),
        }
    }
}

// ============================================================================
// Shape sets
// ============================================================================

/// Every shape of a shapes graph, plus the list of shapes validation runs:
/// active shapes with targets, and their property shapes with the parent's
/// targets added to their own.
#[derive(Debug, Clone, Default)]
pub struct ShapeSet {
    shapes: BTreeMap<Term, Arc<Shape>>,
    effective: Vec<Arc<Shape>>,
    generation: u64,
}

impl ShapeSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn parse(source: &dyn StatementSource) -> Result<Self> {
        let reader = GraphReader::new(source);
        let mut roots = BTreeSet::new();
        for class in [vocab::sh::NODE_SHAPE, vocab::sh::PROPERTY_SHAPE] {
            roots.extend(reader.subjects(vocab::rdf::TYPE, Some(&Term::iri(class)))?);
        }
        for predicate in [
            vocab::sh::TARGET_CLASS,
            vocab::sh::TARGET_NODE,
            vocab::sh::TARGET_SUBJECTS_OF,
            vocab::sh::TARGET_OBJECTS_OF,
            vocab::sh::PATH,
        ] {
            roots.extend(reader.subjects(predicate, None)?);
        }

        let mut parser = ShapeParser {
            reader,
            parsed: BTreeMap::new(),
            visiting: AHashSet::new(),
        };
        for root in &roots {
            parser.shape(root)?;
        }

        // Property shapes reached from several parents collect all their
        // parents' targets.
        let mut effective: BTreeMap<Term, (Arc<Shape>, BTreeSet<Target>)> = BTreeMap::new();
        for shape in parser.parsed.values() {
            if shape.deactivated || shape.targets.is_empty() {
                continue;
            }
            effective
                .entry(shape.id.clone())
                .or_insert_with(|| (shape.clone(), BTreeSet::new()))
                .1
                .extend(shape.targets.iter().cloned());
            for property in &shape.properties {
                if property.deactivated {
                    continue;
                }
                effective
                    .entry(property.id.clone())
                    .or_insert_with(|| (property.clone(), BTreeSet::new()))
                    .1
                    .extend(shape.targets.iter().cloned());
            }
        }
        let effective = effective
            .into_values()
            .map(|(shape, targets)| Arc::new(shape.with_targets(targets.into_iter().collect())))
            .collect();

        Ok(Self {
            shapes: parser.parsed,
            effective,
            generation: 0,
        })
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The shapes validation runs, ordered by id.
    pub fn effective(&self) -> &[Arc<Shape>] {
        &self.effective
    }

    pub fn get(&self, id: &Term) -> Option<&Arc<Shape>> {
        self.shapes.get(id)
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// SPARQL queries of every shape, for checking them against a query
    /// engine at load time.
    pub fn sparql_constraints(&self) -> Vec<(&Term, &SparqlConstraint)> {
        self.shapes
            .values()
            .flat_map(|shape| {
                shape.components.iter().filter_map(move |c| match c {
                    Component::Sparql(constraint) => Some((&shape.id, constraint)),
                    _ => None,
                })
            })
            .collect()
    }
}

// ============================================================================
// Parser
// ============================================================================

struct ShapeParser<'a> {
    reader: GraphReader<'a>,
    parsed: BTreeMap<Term, Arc<Shape>>,
    visiting: AHashSet<Term>,
}

fn boolean(term: &Term) -> Option<bool> {
    let literal = term.as_literal()?;
    match literal.lexical().trim() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

impl ShapeParser<'_> {
    fn shape(&mut self, node: &Term) -> Result<Arc<Shape>> {
        if let Some(done) = self.parsed.get(node) {
            return Ok(done.clone());
        }
        if node.is_literal() {
            return Err(ShaclError::malformed_shape(node, "a literal is not a shape"));
        }
        if !self.visiting.insert(node.clone()) {
            return Err(ShaclError::malformed_shape(node, "shape refers to itself"));
        }
        let shape = self.build(node);
        self.visiting.remove(node);
        let shape = Arc::new(shape?);
        self.parsed.insert(node.clone(), shape.clone());
        Ok(shape)
    }

    fn build(&mut self, node: &Term) -> Result<Shape> {
        let reader = self.reader;
        let kind = match reader.objects(node, vocab::sh::PATH)?.as_slice() {
            [] => ShapeKind::Node,
            [path] => ShapeKind::Property(Path::parse(reader.source(), path)?),
            _ => return Err(ShaclError::malformed_shape(node, "more than one sh:path")),
        };

        let deactivated = match reader.object(node, vocab::sh::DEACTIVATED)? {
            Some(flag) => boolean(&flag)
                .ok_or_else(|| ShaclError::malformed_shape(node, "sh:deactivated must be a boolean"))?,
            None => false,
        };
        let severity = match reader.object(node, vocab::sh::SEVERITY)? {
            Some(term) => term
                .as_iri()
                .and_then(|iri| Severity::from_iri(iri.as_str()))
                .ok_or_else(|| ShaclError::malformed_shape(node, format!("unknown severity {term}")))?,
            None => Severity::Violation,
        };
        let messages = reader
            .objects(node, vocab::sh::MESSAGE)?
            .iter()
            .filter_map(Term::as_literal)
            .map(|l| l.lexical().to_string())
            .collect();
        let name = reader
            .object(node, vocab::sh::NAME)?
            .and_then(|t| t.as_literal().map(|l| l.lexical().to_string()));

        let targets = self.targets(node)?;

        let mut properties = Vec::new();
        for property in reader.objects(node, vocab::sh::PROPERTY)? {
            let parsed = self.shape(&property)?;
            if !matches!(parsed.kind, ShapeKind::Property(_)) {
                return Err(ShaclError::malformed_shape(
                    &property,
                    "sh:property value has no sh:path",
                ));
            }
            properties.push(parsed);
        }

        let mut components = self.components(node, &kind, &properties)?;
        if let ShapeKind::Property(_) = kind {
            // Property shapes of a property shape apply to its value nodes.
            if !properties.is_empty() {
                components.push(Component::Logical(LogicalCheck::new(
                    LogicalKind::Node,
                    std::mem::take(&mut properties),
                )));
            }
        }

        Ok(Shape {
            id: node.clone(),
            kind,
            targets,
            components,
            severity,
            messages,
            name,
            deactivated,
            properties,
        })
    }

    fn targets(&self, node: &Term) -> Result<Vec<Target>> {
        let reader = self.reader;
        let mut targets = Vec::new();
        for class in reader.objects(node, vocab::sh::TARGET_CLASS)? {
            targets.push(Target::Class(class));
        }
        for target in reader.objects(node, vocab::sh::TARGET_NODE)? {
            targets.push(Target::Node(target));
        }
        let by_predicate: [(&str, fn(Iri) -> Target); 2] = [
            (vocab::sh::TARGET_SUBJECTS_OF, Target::SubjectsOf),
            (vocab::sh::TARGET_OBJECTS_OF, Target::ObjectsOf),
        ];
        for (predicate, make) in by_predicate {
            for p in reader.objects(node, predicate)? {
                let iri = p.as_iri().cloned().ok_or_else(|| {
                    ShaclError::malformed_shape(node, format!("{predicate} needs an IRI, found {p}"))
                })?;
                targets.push(make(iri));
            }
        }
        let is_shape = reader.has_type(node, vocab::sh::NODE_SHAPE)?
            || reader.has_type(node, vocab::sh::PROPERTY_SHAPE)?;
        if is_shape && reader.has_type(node, vocab::rdfs::CLASS)? {
            targets.push(Target::Class(node.clone()));
        }
        Ok(targets)
    }

    fn components(
        &mut self,
        node: &Term,
        kind: &ShapeKind,
        properties: &[Arc<Shape>],
    ) -> Result<Vec<Component>> {
        let reader = self.reader;
        let malformed = |reason: String| ShaclError::malformed_shape(node, reason);
        let iri = |term: &Term, what: &str| -> Result<Iri> {
            term.as_iri()
                .cloned()
                .ok_or_else(|| malformed(format!("{what} needs an IRI, found {term}")))
        };
        let count = |term: &Term, what: &str| -> Result<usize> {
            term.as_literal()
                .and_then(|l| l.lexical().trim().parse::<usize>().ok())
                .ok_or_else(|| malformed(format!("{what} needs a non-negative integer, found {term}")))
        };
        let literal = |term: &Term, what: &str| -> Result<Literal> {
            term.as_literal()
                .cloned()
                .ok_or_else(|| malformed(format!("{what} needs a literal, found {term}")))
        };
        let list = |head: &Term, what: &str| -> Result<Vec<Term>> {
            reader
                .list(head)?
                .map_err(|reason| malformed(format!("{what}: {reason}")))
        };

        let mut out = Vec::new();

        for class in reader.objects(node, vocab::sh::CLASS)? {
            out.push(Component::Value(ValueCheck::Class(class)));
        }
        for datatype in reader.objects(node, vocab::sh::DATATYPE)? {
            out.push(Component::Value(ValueCheck::Datatype(iri(&datatype, "sh:datatype")?)));
        }
        for kind_term in reader.objects(node, vocab::sh::NODE_KIND)? {
            let node_kind = kind_term
                .as_iri()
                .and_then(|i| NodeKind::from_iri(i.as_str()))
                .ok_or_else(|| malformed(format!("unknown node kind {kind_term}")))?;
            out.push(Component::Value(ValueCheck::NodeKind(node_kind)));
        }
        for term in reader.objects(node, vocab::sh::MIN_COUNT)? {
            out.push(Component::MinCount(count(&term, "sh:minCount")?));
        }
        for term in reader.objects(node, vocab::sh::MAX_COUNT)? {
            out.push(Component::MaxCount(count(&term, "sh:maxCount")?));
        }
        for term in reader.objects(node, vocab::sh::MIN_LENGTH)? {
            out.push(Component::Value(ValueCheck::MinLength(count(&term, "sh:minLength")?)));
        }
        for term in reader.objects(node, vocab::sh::MAX_LENGTH)? {
            out.push(Component::Value(ValueCheck::MaxLength(count(&term, "sh:maxLength")?)));
        }

        let flags = reader.object(node, vocab::sh::FLAGS)?;
        let flags = flags.as_ref().and_then(Term::as_literal).map(Literal::lexical);
        for term in reader.objects(node, vocab::sh::PATTERN)? {
            let pattern = literal(&term, "sh:pattern")?;
            let check = PatternCheck::new(pattern.lexical(), flags)
                .map_err(|e| malformed(format!("sh:pattern {term}: {e}")))?;
            out.push(Component::Value(ValueCheck::Pattern(check)));
        }

        for head in reader.objects(node, vocab::sh::LANGUAGE_IN)? {
            let ranges = list(&head, "sh:languageIn")?
                .iter()
                .map(|t| literal(t, "sh:languageIn").map(|l| l.lexical().to_string()))
                .collect::<Result<Vec<_>>>()?;
            out.push(Component::Value(ValueCheck::LanguageIn(ranges)));
        }
        for term in reader.objects(node, vocab::sh::UNIQUE_LANG)? {
            if boolean(&term) == Some(true) {
                if matches!(kind, ShapeKind::Node) {
                    return Err(malformed("sh:uniqueLang needs a property shape".to_string()));
                }
                out.push(Component::UniqueLang);
            }
        }
        for head in reader.objects(node, vocab::sh::IN)? {
            out.push(Component::Value(ValueCheck::In(list(&head, "sh:in")?)));
        }
        for value in reader.objects(node, vocab::sh::HAS_VALUE)? {
            out.push(match kind {
                ShapeKind::Node => Component::Value(ValueCheck::HasValue(value)),
                ShapeKind::Property(_) => Component::HasValue(HasValueAmong(value)),
            });
        }

        for (predicate, range) in [
            (vocab::sh::MIN_EXCLUSIVE, RangeKind::MinExclusive),
            (vocab::sh::MIN_INCLUSIVE, RangeKind::MinInclusive),
            (vocab::sh::MAX_EXCLUSIVE, RangeKind::MaxExclusive),
            (vocab::sh::MAX_INCLUSIVE, RangeKind::MaxInclusive),
        ] {
            for term in reader.objects(node, predicate)? {
                out.push(Component::Value(ValueCheck::Range(range, literal(&term, predicate)?)));
            }
        }

        for (predicate, pair) in [
            (vocab::sh::EQUALS, PairKind::Equals),
            (vocab::sh::DISJOINT, PairKind::Disjoint),
            (vocab::sh::LESS_THAN, PairKind::LessThan),
            (vocab::sh::LESS_THAN_OR_EQUALS, PairKind::LessThanOrEquals),
        ] {
            for term in reader.objects(node, predicate)? {
                out.push(Component::Pair(PairCheck::new(pair, iri(&term, predicate)?)));
            }
        }

        if reader
            .object(node, vocab::sh::CLOSED)?
            .and_then(|t| boolean(&t))
            .unwrap_or(false)
        {
            let mut allowed: BTreeSet<Iri> = properties
                .iter()
                .filter_map(|p| p.path().and_then(Path::as_simple_predicate))
                .filter(|(_, forward)| *forward)
                .map(|(p, _)| p.clone())
                .collect();
            for head in reader.objects(node, vocab::sh::IGNORED_PROPERTIES)? {
                for term in list(&head, "sh:ignoredProperties")? {
                    allowed.insert(iri(&term, "sh:ignoredProperties")?);
                }
            }
            out.push(Component::Closed(ClosedCheck::new(allowed)));
        }

        for (predicate, logical) in [
            (vocab::sh::AND, LogicalKind::And),
            (vocab::sh::OR, LogicalKind::Or),
            (vocab::sh::XONE, LogicalKind::Xone),
        ] {
            for head in reader.objects(node, predicate)? {
                let mut shapes = Vec::new();
                for member in list(&head, predicate)? {
                    shapes.push(self.shape(&member)?);
                }
                out.push(Component::Logical(LogicalCheck::new(logical, shapes)));
            }
        }
        for (predicate, logical) in [
            (vocab::sh::NOT, LogicalKind::Not),
            (vocab::sh::NODE, LogicalKind::Node),
        ] {
            for nested in reader.objects(node, predicate)? {
                let shape = self.shape(&nested)?;
                out.push(Component::Logical(LogicalCheck::new(logical, vec![shape])));
            }
        }

        if let Some(nested) = reader.object(node, vocab::sh::QUALIFIED_VALUE_SHAPE)? {
            let shape = self.shape(&nested)?;
            let min = match reader.object(node, vocab::sh::QUALIFIED_MIN_COUNT)? {
                Some(term) => Some(count(&term, "sh:qualifiedMinCount")?),
                None => None,
            };
            let max = match reader.object(node, vocab::sh::QUALIFIED_MAX_COUNT)? {
                Some(term) => Some(count(&term, "sh:qualifiedMaxCount")?),
                None => None,
            };
            if min.is_none() && max.is_none() {
                return Err(malformed(
                    "sh:qualifiedValueShape needs a qualified min or max count".to_string(),
                ));
            }
            if let Some(min) = min {
                out.push(Component::Qualified(Qualified {
                    shape: shape.clone(),
                    min: Some(min),
                    max: None,
                }));
            }
            if let Some(max) = max {
                out.push(Component::Qualified(Qualified {
                    shape,
                    min: None,
                    max: Some(max),
                }));
            }
        }

        let path = match kind {
            ShapeKind::Property(path) => Some(path),
            ShapeKind::Node => None,
        };
        for constraint in reader.objects(node, vocab::sh::SPARQL)? {
            if reader
                .object(&constraint, vocab::sh::DEACTIVATED)?
                .and_then(|t| boolean(&t))
                .unwrap_or(false)
            {
                continue;
            }
            let select = reader
                .object(&constraint, vocab::sh::SELECT)?
                .ok_or_else(|| malformed(format!("SPARQL constraint {constraint} has no sh:select")))?;
            let select = literal(&select, "sh:select")?;
            let message = reader
                .object(&constraint, vocab::sh::MESSAGE)?
                .and_then(|t| t.as_literal().map(|l| l.lexical().to_string()));
            let parsed = SparqlConstraint::new(select.lexical(), path, message).map_err(malformed)?;
            out.push(Component::Sparql(parsed));
        }

        Ok(out)
    }
}
