//! Validation reports.

use crate::constraints::Component;
use crate::shape::{Severity, Shape, ShapeKind};
use crate::tuple::ValidationTuple;
use serde::{Deserialize, Serialize};
use shapegate_model::{Iri, Term};
use ahash::AHashMap;
use std::fmt;

/// Terms travel through JSON as N-Triples text.
mod term_text {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use shapegate_model::{ntriples, Term};

    pub fn serialize<S: Serializer>(term: &Term, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(term)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Term, D::Error> {
        let text = String::deserialize(deserializer)?;
        ntriples::parse_term(&text).map_err(de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(term: &Option<Term>, serializer: S) -> Result<S::Ok, S::Error> {
            match term {
                Some(term) => serializer.collect_str(term),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Term>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|text| ntriples::parse_term(&text).map_err(de::Error::custom))
                .transpose()
        }
    }
}

/// One violation (or warning, or info).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValidationResult {
    #[serde(with = "term_text")]
    pub focus_node: Term,
    #[serde(with = "term_text::option", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Term>,
    /// The shape's path in SPARQL property-path syntax. For `sh:closed`,
    /// the offending predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(with = "term_text")]
    pub source_shape: Term,
    pub constraint_component: Iri,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationResult {
    pub(crate) fn from_tuple(shape: &Shape, component: &Component, tuple: &ValidationTuple) -> Self {
        let (path, value) = match component {
            Component::Closed(_) => (
                tuple.chain().get(1).map(|p| p.to_string()),
                tuple.value().cloned(),
            ),
            _ => (
                match shape.kind() {
                    ShapeKind::Property(path) => Some(path.to_string()),
                    ShapeKind::Node => None,
                },
                tuple.value().cloned(),
            ),
        };
        let message = component
            .message()
            .or_else(|| shape.messages().first().map(String::as_str))
            .map(str::to_string);
        Self {
            focus_node: tuple.focus().clone(),
            value,
            path,
            source_shape: shape.id().clone(),
            constraint_component: component.iri(),
            severity: shape.severity(),
            message,
        }
    }

    pub fn is_violation(&self) -> bool {
        self.severity == Severity::Violation
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.severity,
            self.constraint_component.local_name(),
            self.focus_node
        )?;
        if let Some(path) = &self.path {
            write!(f, " path {path}")?;
        }
        if let Some(value) = &self.value {
            write!(f, " value {value}")?;
        }
        write!(f, " (shape {})", self.source_shape)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// No violation-severity result was found, including any dropped by
    /// the limits.
    pub conforms: bool,
    pub results: Vec<ValidationResult>,
    /// Set when a result limit dropped results.
    pub truncated: bool,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self {
            conforms: true,
            results: Vec::new(),
            truncated: false,
        }
    }
}

impl ValidationReport {
    /// Sorts `results` (violations first), removes duplicates and applies
    /// the limits.
    pub fn from_results(
        mut results: Vec<ValidationResult>,
        limit_total: Option<usize>,
        limit_per_constraint: Option<usize>,
    ) -> Self {
        results.sort_by(|a, b| a.severity.cmp(&b.severity).then_with(|| a.cmp(b)));
        results.dedup();
        let conforms = !results.iter().any(ValidationResult::is_violation);
        let mut truncated = false;

        if let Some(limit) = limit_per_constraint {
            let mut seen: AHashMap<(Term, Iri), usize> = AHashMap::new();
            results.retain(|r| {
                let count = seen
                    .entry((r.source_shape.clone(), r.constraint_component.clone()))
                    .or_default();
                *count += 1;
                *count <= limit
            });
            truncated |= seen.values().any(|&count| count > limit);
        }
        if let Some(limit) = limit_total {
            if results.len() > limit {
                results.truncate(limit);
                truncated = true;
            }
        }
        Self {
            conforms,
            results,
            truncated,
        }
    }

    pub fn conforms(&self) -> bool {
        self.conforms
    }

    pub fn violation_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_violation()).count()
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &ValidationResult> + '_ {
        self.results.iter().filter(move |r| r.severity == severity)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "conforms: {} ({} result(s){})",
            self.conforms(),
            self.results.len(),
            if self.truncated { ", truncated" } else { "" }
        )?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        Ok(())
    }
}
