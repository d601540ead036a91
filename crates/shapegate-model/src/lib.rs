//! Shapegate term model.
//!
//! A deliberately small RDF model shared by the store, the validator and the
//! loaders:
//!
//! - [`Iri`], [`Literal`] and [`Term`] (IRI, blank node or literal)
//! - [`Statement`]: a quad with an optional context (named graph)
//! - [`StatementPattern`]: a wildcard lookup used by every statement source
//! - [`vocab`]: the fixed `rdf`/`rdfs`/`xsd`/`sh` vocabularies
//!
//! Terms are cheap to clone (`Arc<str>` payloads) because validation tuples
//! copy them freely.

pub mod ntriples;
pub mod vocab;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

pub use ntriples::{parse_term, TermParseError};

// ============================================================================
// IRIs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Iri(Arc<str>);

impl Iri {
    pub fn new(iri: impl Into<Arc<str>>) -> Self {
        Self(iri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last segment after `#` or `/`, used for short display names.
    pub fn local_name(&self) -> &str {
        self.0.rsplit(['#', '/']).next().unwrap_or(&self.0)
    }
}

impl fmt::Display for Iri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

impl From<&str> for Iri {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// Literals
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    lexical: Arc<str>,
    datatype: Iri,
    language: Option<Arc<str>>,
}

impl Literal {
    /// Plain `xsd:string` literal.
    pub fn simple(lexical: impl Into<Arc<str>>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: Iri::new(vocab::xsd::STRING),
            language: None,
        }
    }

    pub fn typed(lexical: impl Into<Arc<str>>, datatype: Iri) -> Self {
        Self {
            lexical: lexical.into(),
            datatype,
            language: None,
        }
    }

    /// Language-tagged literal; the tag is normalized to lower case.
    pub fn lang(lexical: impl Into<Arc<str>>, language: &str) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: Iri::new(vocab::rdf::LANG_STRING),
            language: Some(Arc::from(language.to_ascii_lowercase())),
        }
    }

    pub fn integer(value: i64) -> Self {
        Self::typed(value.to_string(), Iri::new(vocab::xsd::INTEGER))
    }

    pub fn boolean(value: bool) -> Self {
        Self::typed(value.to_string(), Iri::new(vocab::xsd::BOOLEAN))
    }

    pub fn lexical(&self) -> &str {
        &self.lexical
    }

    pub fn datatype(&self) -> &Iri {
        &self.datatype
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn is_numeric(&self) -> bool {
        vocab::xsd::is_numeric(self.datatype.as_str())
    }

    pub fn numeric_value(&self) -> Option<f64> {
        if !self.is_numeric() {
            return None;
        }
        self.lexical.trim().parse::<f64>().ok()
    }

    /// Whether the lexical form is valid for the literal's datatype.
    ///
    /// Only the datatypes the validator reasons about are checked; any other
    /// datatype is accepted as-is.
    pub fn is_well_formed(&self) -> bool {
        let lex = self.lexical.trim();
        match self.datatype.as_str() {
            vocab::xsd::BOOLEAN => matches!(lex, "true" | "false" | "1" | "0"),
            vocab::xsd::INTEGER
            | vocab::xsd::INT
            | vocab::xsd::LONG
            | vocab::xsd::SHORT
            | vocab::xsd::BYTE
            | vocab::xsd::NON_NEGATIVE_INTEGER
            | vocab::xsd::POSITIVE_INTEGER => lex.parse::<i128>().is_ok_and(|v| {
                match self.datatype.as_str() {
                    vocab::xsd::NON_NEGATIVE_INTEGER => v >= 0,
                    vocab::xsd::POSITIVE_INTEGER => v > 0,
                    vocab::xsd::INT => i32::try_from(v).is_ok(),
                    vocab::xsd::LONG => i64::try_from(v).is_ok(),
                    vocab::xsd::SHORT => i16::try_from(v).is_ok(),
                    vocab::xsd::BYTE => i8::try_from(v).is_ok(),
                    _ => true,
                }
            }),
            vocab::xsd::DECIMAL => {
                !lex.contains(['e', 'E']) && lex.parse::<f64>().is_ok_and(f64::is_finite)
            }
            vocab::xsd::DOUBLE | vocab::xsd::FLOAT => {
                matches!(lex, "INF" | "-INF" | "NaN") || lex.parse::<f64>().is_ok()
            }
            vocab::xsd::DATE => is_xsd_date(lex),
            vocab::xsd::DATE_TIME => lex
                .split_once('T')
                .is_some_and(|(date, time)| is_xsd_date(date) && time.len() >= 8),
            vocab::rdf::LANG_STRING => self.language.is_some(),
            _ => true,
        }
    }

    /// Value comparison used by range and `lessThan` constraints.
    ///
    /// Numbers compare numerically across numeric datatypes; strings, dates
    /// and date-times compare lexically within the same datatype. Anything
    /// else is incomparable.
    pub fn partial_cmp_value(&self, other: &Literal) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.numeric_value(), other.numeric_value()) {
            return a.partial_cmp(&b);
        }
        if self.datatype != other.datatype {
            return None;
        }
        match self.datatype.as_str() {
            vocab::xsd::STRING | vocab::xsd::DATE | vocab::xsd::DATE_TIME => {
                Some(self.lexical.cmp(&other.lexical))
            }
            vocab::rdf::LANG_STRING if self.language == other.language => {
                Some(self.lexical.cmp(&other.lexical))
            }
            _ => None,
        }
    }
}

fn is_xsd_date(lex: &str) -> bool {
    let parts: Vec<&str> = lex.splitn(3, '-').collect();
    if parts.len() != 3 {
        return false;
    }
    let day = parts[2].get(..2).unwrap_or(parts[2]);
    parts[0].len() == 4
        && parts[0].chars().all(|c| c.is_ascii_digit())
        && parts[1].parse::<u8>().is_ok_and(|m| (1..=12).contains(&m))
        && day.parse::<u8>().is_ok_and(|d| (1..=31).contains(&d))
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", ntriples::escape(&self.lexical))?;
        match &self.language {
            Some(lang) => write!(f, "@{lang}"),
            None if self.datatype.as_str() == vocab::xsd::STRING => Ok(()),
            None => write!(f, "^^{}", self.datatype),
        }
    }
}

// ============================================================================
// Terms
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    Iri(Iri),
    BlankNode(Arc<str>),
    Literal(Literal),
}

impl Term {
    pub fn iri(iri: &str) -> Self {
        Term::Iri(Iri::new(iri))
    }

    pub fn blank(id: &str) -> Self {
        Term::BlankNode(Arc::from(id))
    }

    pub fn literal(lexical: &str) -> Self {
        Term::Literal(Literal::simple(lexical))
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    pub fn is_blank_node(&self) -> bool {
        matches!(self, Term::BlankNode(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal(_))
    }

    /// IRI or blank node (anything that may appear in subject position).
    pub fn is_resource(&self) -> bool {
        !self.is_literal()
    }

    pub fn as_iri(&self) -> Option<&Iri> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Term::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// The string form used by string-based constraints (`sh:pattern`,
    /// `sh:minLength`, ...): the IRI text or the lexical form.
    pub fn str_value(&self) -> &str {
        match self {
            Term::Iri(iri) => iri.as_str(),
            Term::BlankNode(id) => id,
            Term::Literal(lit) => lit.lexical(),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => iri.fmt(f),
            Term::BlankNode(id) => write!(f, "_:{id}"),
            Term::Literal(lit) => lit.fmt(f),
        }
    }
}

impl From<Iri> for Term {
    fn from(value: Iri) -> Self {
        Term::Iri(value)
    }
}

impl From<Literal> for Term {
    fn from(value: Literal) -> Self {
        Term::Literal(value)
    }
}

// ============================================================================
// Statements and patterns
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Statement {
    pub subject: Term,
    pub predicate: Iri,
    pub object: Term,
    /// Named graph; `None` is the default graph.
    pub context: Option<Term>,
}

impl Statement {
    pub fn new(subject: impl Into<Term>, predicate: impl Into<Iri>, object: impl Into<Term>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            context: None,
        }
    }

    pub fn in_context(mut self, context: impl Into<Term>) -> Self {
        self.context = Some(context.into());
        self
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(ctx) = &self.context {
            write!(f, " {ctx}")?;
        }
        write!(f, " .")
    }
}

/// Which graphs a pattern looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ContextFilter {
    #[default]
    Any,
    /// Only the listed graphs; `None` stands for the default graph.
    Only(Vec<Option<Term>>),
}

impl ContextFilter {
    pub fn accepts(&self, context: Option<&Term>) -> bool {
        match self {
            ContextFilter::Any => true,
            ContextFilter::Only(graphs) => graphs.iter().any(|g| g.as_ref() == context),
        }
    }
}

/// Wildcard statement lookup; `None` slots match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StatementPattern {
    pub subject: Option<Term>,
    pub predicate: Option<Iri>,
    pub object: Option<Term>,
    pub contexts: ContextFilter,
}

impl StatementPattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new(subject: Option<Term>, predicate: Option<Iri>, object: Option<Term>) -> Self {
        Self {
            subject,
            predicate,
            object,
            contexts: ContextFilter::Any,
        }
    }

    pub fn with_subject(mut self, subject: Term) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_predicate(mut self, predicate: Iri) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_object(mut self, object: Term) -> Self {
        self.object = Some(object);
        self
    }

    pub fn in_contexts(mut self, contexts: ContextFilter) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn matches(&self, statement: &Statement) -> bool {
        self.subject.as_ref().map_or(true, |s| *s == statement.subject)
            && self
                .predicate
                .as_ref()
                .map_or(true, |p| *p == statement.predicate)
            && self.object.as_ref().map_or(true, |o| *o == statement.object)
            && self.contexts.accepts(statement.context.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_display_round_trips_through_parser() {
        let cases = [
            Term::literal("plain"),
            Term::Literal(Literal::lang("hallo", "DE")),
            Term::Literal(Literal::integer(42)),
            Term::literal("quote \" and \\ and\nnewline"),
            Term::iri("http://example.org/a"),
            Term::blank("b0"),
        ];
        for term in cases {
            let text = term.to_string();
            assert_eq!(parse_term(&text).unwrap(), term, "{text}");
        }
    }

    #[test]
    fn test_language_tags_are_normalized() {
        let lit = Literal::lang("colour", "en-GB");
        assert_eq!(lit.language(), Some("en-gb"));
        assert_eq!(lit.datatype().as_str(), vocab::rdf::LANG_STRING);
    }

    #[test]
    fn test_numeric_comparison_crosses_datatypes() {
        let a = Literal::integer(3);
        let b = Literal::typed("3.5", Iri::new(vocab::xsd::DECIMAL));
        assert_eq!(a.partial_cmp_value(&b), Some(Ordering::Less));
        let s = Literal::simple("3");
        assert_eq!(a.partial_cmp_value(&s), None);
    }

    #[test]
    fn test_well_formed_checks() {
        assert!(Literal::integer(7).is_well_formed());
        assert!(!Literal::typed("seven", Iri::new(vocab::xsd::INTEGER)).is_well_formed());
        assert!(!Literal::typed("-1", Iri::new(vocab::xsd::NON_NEGATIVE_INTEGER)).is_well_formed());
        assert!(Literal::typed("2024-02-29", Iri::new(vocab::xsd::DATE)).is_well_formed());
        assert!(!Literal::typed("2024-13-01", Iri::new(vocab::xsd::DATE)).is_well_formed());
        assert!(!Literal::typed("maybe", Iri::new(vocab::xsd::BOOLEAN)).is_well_formed());
    }

    #[test]
    fn test_pattern_matching_with_contexts() {
        let g = Term::iri("http://example.org/g");
        let st = Statement::new(Term::iri("http://example.org/s"), "http://example.org/p", Term::literal("o"))
            .in_context(g.clone());

        assert!(StatementPattern::any().matches(&st));
        assert!(StatementPattern::any()
            .with_predicate(Iri::new("http://example.org/p"))
            .in_contexts(ContextFilter::Only(vec![Some(g)]))
            .matches(&st));
        assert!(!StatementPattern::any()
            .in_contexts(ContextFilter::Only(vec![None]))
            .matches(&st));
    }
}
