//! Constraints decided by looking at one value node at a time.

use crate::connections::ConnectionsGroup;
use crate::error::Result;
use crate::plan::{TupleTest, View};
use crate::tuple::ValidationTuple;
use regex::Regex;
use shapegate_model::{vocab, Iri, Literal, StatementPattern, Term};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Iri,
    BlankNode,
    Literal,
    BlankNodeOrIri,
    BlankNodeOrLiteral,
    IriOrLiteral,
}

impl NodeKind {
    pub fn from_iri(iri: &str) -> Option<Self> {
        Some(match iri {
            vocab::sh::IRI => NodeKind::Iri,
            vocab::sh::BLANK_NODE => NodeKind::BlankNode,
            vocab::sh::LITERAL => NodeKind::Literal,
            vocab::sh::BLANK_NODE_OR_IRI => NodeKind::BlankNodeOrIri,
            vocab::sh::BLANK_NODE_OR_LITERAL => NodeKind::BlankNodeOrLiteral,
            vocab::sh::IRI_OR_LITERAL => NodeKind::IriOrLiteral,
            _ => return None,
        })
    }

    pub fn matches(self, term: &Term) -> bool {
        match self {
            NodeKind::Iri => term.is_iri(),
            NodeKind::BlankNode => term.is_blank_node(),
            NodeKind::Literal => term.is_literal(),
            NodeKind::BlankNodeOrIri => !term.is_literal(),
            NodeKind::BlankNodeOrLiteral => !term.is_iri(),
            NodeKind::IriOrLiteral => !term.is_blank_node(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    MinExclusive,
    MinInclusive,
    MaxExclusive,
    MaxInclusive,
}

impl RangeKind {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            RangeKind::MinExclusive => ordering == Ordering::Greater,
            RangeKind::MinInclusive => ordering != Ordering::Less,
            RangeKind::MaxExclusive => ordering == Ordering::Less,
            RangeKind::MaxInclusive => ordering != Ordering::Greater,
        }
    }
}

/// `sh:pattern` with its flags, compiled at shape load.
#[derive(Debug, Clone)]
pub struct PatternCheck {
    regex: Regex,
    pattern: String,
    flags: String,
}

impl PatternCheck {
    /// Supports the `i`, `m`, `s` and `x` flags.
    pub fn new(pattern: &str, flags: Option<&str>) -> std::result::Result<Self, String> {
        let flags = flags.unwrap_or_default().to_string();
        let mut builder = regex::RegexBuilder::new(pattern);
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => return Err(format!("unsupported regex flag {other:?}")),
            };
        }
        let regex = builder.build().map_err(|e| e.to_string())?;
        Ok(Self {
            regex,
            pattern: pattern.to_string(),
            flags,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// The per-value constraint components.
#[derive(Debug, Clone)]
pub enum ValueCheck {
    /// The value is an instance of the class (through `rdfs:subClassOf` when
    /// reasoning is on).
    Class(Term),
    Datatype(Iri),
    NodeKind(NodeKind),
    MinLength(usize),
    MaxLength(usize),
    Pattern(PatternCheck),
    LanguageIn(Vec<String>),
    In(Vec<Term>),
    /// Node shape form of `sh:hasValue`: the focus node is the value.
    HasValue(Term),
    Range(RangeKind, Literal),
}

impl ValueCheck {
    pub fn component_id(&self) -> &'static str {
        match self {
            ValueCheck::Class(_) => "ClassConstraintComponent",
            ValueCheck::Datatype(_) => "DatatypeConstraintComponent",
            ValueCheck::NodeKind(_) => "NodeKindConstraintComponent",
            ValueCheck::MinLength(_) => "MinLengthConstraintComponent",
            ValueCheck::MaxLength(_) => "MaxLengthConstraintComponent",
            ValueCheck::Pattern(_) => "PatternConstraintComponent",
            ValueCheck::LanguageIn(_) => "LanguageInConstraintComponent",
            ValueCheck::In(_) => "InConstraintComponent",
            ValueCheck::HasValue(_) => "HasValueConstraintComponent",
            ValueCheck::Range(RangeKind::MinExclusive, _) => "MinExclusiveConstraintComponent",
            ValueCheck::Range(RangeKind::MinInclusive, _) => "MinInclusiveConstraintComponent",
            ValueCheck::Range(RangeKind::MaxExclusive, _) => "MaxExclusiveConstraintComponent",
            ValueCheck::Range(RangeKind::MaxInclusive, _) => "MaxInclusiveConstraintComponent",
        }
    }

    /// Edges away from the value node the check reads.
    pub fn reach(&self) -> usize {
        match self {
            ValueCheck::Class(_) => 1,
            _ => 0,
        }
    }

    pub fn passes(&self, value: &Term, cx: &ConnectionsGroup) -> Result<bool> {
        Ok(match self {
            ValueCheck::Class(class) => is_instance(value, class, cx)?,
            ValueCheck::Datatype(datatype) => value
                .as_literal()
                .is_some_and(|l| l.datatype() == datatype && l.is_well_formed()),
            ValueCheck::NodeKind(kind) => kind.matches(value),
            ValueCheck::MinLength(min) => {
                !value.is_blank_node() && value.str_value().chars().count() >= *min
            }
            ValueCheck::MaxLength(max) => {
                !value.is_blank_node() && value.str_value().chars().count() <= *max
            }
            ValueCheck::Pattern(pattern) => {
                !value.is_blank_node() && pattern.is_match(value.str_value())
            }
            ValueCheck::LanguageIn(ranges) => value
                .as_literal()
                .and_then(Literal::language)
                .is_some_and(|tag| ranges.iter().any(|range| language_matches(tag, range))),
            ValueCheck::In(members) => members.contains(value),
            ValueCheck::HasValue(expected) => value == expected,
            ValueCheck::Range(kind, bound) => value
                .as_literal()
                .and_then(|l| l.partial_cmp_value(bound))
                .is_some_and(|ordering| kind.accepts(ordering)),
        })
    }
}

impl TupleTest for ValueCheck {
    fn test(&self, tuple: &ValidationTuple, cx: &ConnectionsGroup) -> Result<bool> {
        match tuple.value() {
            Some(value) => self.passes(value, cx),
            None => Ok(true),
        }
    }

    fn signature(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ValueCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueCheck::Class(class) => write!(f, "class {class}"),
            ValueCheck::Datatype(datatype) => write!(f, "datatype {datatype}"),
            ValueCheck::NodeKind(kind) => write!(f, "nodeKind {kind:?}"),
            ValueCheck::MinLength(n) => write!(f, "minLength {n}"),
            ValueCheck::MaxLength(n) => write!(f, "maxLength {n}"),
            ValueCheck::Pattern(p) => write!(f, "pattern /{}/{}", p.pattern, p.flags),
            ValueCheck::LanguageIn(ranges) => write!(f, "languageIn {ranges:?}"),
            ValueCheck::In(members) => {
                write!(f, "in (")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{member}")?;
                }
                write!(f, ")")
            }
            ValueCheck::HasValue(term) => write!(f, "hasValue {term}"),
            ValueCheck::Range(kind, bound) => write!(f, "{kind:?} {bound}"),
        }
    }
}

/// Basic language-range filtering: `*` matches any tag, otherwise the range
/// equals the tag or is one of its `-` prefixes. Case-insensitive.
fn language_matches(tag: &str, range: &str) -> bool {
    if range == "*" {
        return true;
    }
    let tag = tag.to_ascii_lowercase();
    let range = range.to_ascii_lowercase();
    tag == range || tag.strip_prefix(&range).is_some_and(|rest| rest.starts_with('-'))
}

/// Whether `node` has an `rdf:type` in the subclass closure of `class` in the
/// post-commit graph.
pub(crate) fn is_instance(node: &Term, class: &Term, cx: &ConnectionsGroup) -> Result<bool> {
    if node.is_literal() {
        return Ok(false);
    }
    let rdf_type = Iri::new(vocab::rdf::TYPE);
    let patterns: Vec<StatementPattern> = cx
        .resolve_subclasses(class)
        .into_iter()
        .map(|c| {
            StatementPattern::any()
                .with_subject(node.clone())
                .with_predicate(rdf_type.clone())
                .with_object(c)
        })
        .collect();
    let mut found = cx.track(cx.view(View::Current).statements_batch(&patterns)?);
    Ok(found.next().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ex, group_with};
    use shapegate_model::Statement;

    #[test]
    fn test_literal_checks() {
        let cx = group_with(&[], &[], &[]);
        let int = Term::Literal(Literal::integer(5));
        let bad_int = Term::Literal(Literal::typed("five", Iri::new(vocab::xsd::INTEGER)));

        let datatype = ValueCheck::Datatype(Iri::new(vocab::xsd::INTEGER));
        assert!(datatype.passes(&int, &cx).unwrap());
        assert!(!datatype.passes(&bad_int, &cx).unwrap());
        assert!(!datatype.passes(&ex("five"), &cx).unwrap());

        let min = ValueCheck::Range(RangeKind::MinInclusive, Literal::integer(5));
        assert!(min.passes(&int, &cx).unwrap());
        let max = ValueCheck::Range(RangeKind::MaxExclusive, Literal::integer(5));
        assert!(!max.passes(&int, &cx).unwrap());
        // Incomparable values fail.
        assert!(!max.passes(&Term::literal("abc"), &cx).unwrap());

        assert!(ValueCheck::MaxLength(3).passes(&Term::literal("abc"), &cx).unwrap());
        assert!(!ValueCheck::MinLength(1).passes(&Term::blank("b0"), &cx).unwrap());
    }

    #[test]
    fn test_pattern_flags_and_languages() {
        let cx = group_with(&[], &[], &[]);
        let pattern = ValueCheck::Pattern(PatternCheck::new("^ab", Some("i")).unwrap());
        assert!(pattern.passes(&Term::literal("ABc"), &cx).unwrap());
        assert!(PatternCheck::new("a", Some("q")).is_err());
        assert!(PatternCheck::new("(", None).is_err());

        let languages = ValueCheck::LanguageIn(vec!["en".to_string()]);
        assert!(languages.passes(&Term::Literal(Literal::lang("hi", "en-US")), &cx).unwrap());
        assert!(!languages.passes(&Term::Literal(Literal::lang("salut", "fr")), &cx).unwrap());
        assert!(!languages.passes(&Term::literal("plain"), &cx).unwrap());
    }

    #[test]
    fn test_class_uses_subclass_closure() {
        let data = [
            Statement::new(ex("rex"), vocab::rdf::TYPE, ex("Dog")),
            Statement::new(ex("Dog"), vocab::rdfs::SUB_CLASS_OF, ex("Animal")),
        ];
        let cx = group_with(&data, &[], &[]);
        let class = ValueCheck::Class(ex("Animal"));
        assert!(class.passes(&ex("rex"), &cx).unwrap());
        assert!(!class.passes(&ex("tom"), &cx).unwrap());
        assert!(!class.passes(&Term::literal("rex"), &cx).unwrap());
        assert_eq!(cx.open_iterators(), 0);
    }
}
