//! Statement matchers: triple patterns with named variables.

use crate::connections::ConnectionsGroup;
use shapegate_model::{vocab, Iri, Statement, StatementPattern, Term};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(Arc<str>);

impl Variable {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Bound(Term),
    Var(Variable),
}

impl Slot {
    pub fn var(name: &str) -> Self {
        Slot::Var(Variable::new(name))
    }

    pub fn bound(&self) -> Option<&Term> {
        match self {
            Slot::Bound(term) => Some(term),
            Slot::Var(_) => None,
        }
    }

    pub fn variable(&self) -> Option<&Variable> {
        match self {
            Slot::Var(v) => Some(v),
            Slot::Bound(_) => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Bound(term) => term.fmt(f),
            Slot::Var(v) => v.fmt(f),
        }
    }
}

/// A triple pattern. Variables with the same name in two matchers form a
/// join key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementMatcher {
    pub subject: Slot,
    pub predicate: Slot,
    pub object: Slot,
    /// Expand a bound object class into its subclass closure when matching
    /// `rdf:type` statements.
    pub include_subclasses: bool,
}

impl StatementMatcher {
    pub fn new(subject: Slot, predicate: Iri, object: Slot) -> Self {
        Self {
            subject,
            predicate: Slot::Bound(Term::Iri(predicate)),
            object,
            include_subclasses: false,
        }
    }

    /// `?subject rdf:type class`.
    pub fn instances_of(subject: &Variable, class: Term) -> Self {
        Self {
            subject: Slot::Var(subject.clone()),
            predicate: Slot::Bound(Term::iri(vocab::rdf::TYPE)),
            object: Slot::Bound(class),
            include_subclasses: true,
        }
    }

    /// `?subject ?predicate ?object`.
    pub fn any(subject: &Variable, predicate: &Variable, object: &Variable) -> Self {
        Self {
            subject: Slot::Var(subject.clone()),
            predicate: Slot::Var(predicate.clone()),
            object: Slot::Var(object.clone()),
            include_subclasses: false,
        }
    }

    pub fn swapped(&self) -> Self {
        Self {
            subject: self.object.clone(),
            predicate: self.predicate.clone(),
            object: self.subject.clone(),
            include_subclasses: self.include_subclasses,
        }
    }

    /// Store lookups for this matcher, one per subclass when the object is
    /// an expanded class.
    pub fn patterns(&self, cx: &ConnectionsGroup) -> Vec<StatementPattern> {
        let base = StatementPattern::new(
            self.subject.bound().cloned(),
            self.predicate.bound().and_then(Term::as_iri).cloned(),
            self.object.bound().cloned(),
        );
        match (self.include_subclasses, self.object.bound()) {
            (true, Some(class)) => cx
                .resolve_subclasses(class)
                .into_iter()
                .map(|c| base.clone().with_object(c))
                .collect(),
            _ => vec![base],
        }
    }

    /// Like [`StatementMatcher::patterns`] with `variable` bound to `value`.
    pub fn patterns_binding(
        &self,
        variable: &Variable,
        value: &Term,
        cx: &ConnectionsGroup,
    ) -> Vec<StatementPattern> {
        let bind = |slot: &Slot| match slot {
            Slot::Var(v) if v == variable => Slot::Bound(value.clone()),
            other => other.clone(),
        };
        let bound = StatementMatcher {
            subject: bind(&self.subject),
            predicate: bind(&self.predicate),
            object: bind(&self.object),
            include_subclasses: self.include_subclasses,
        };
        bound.patterns(cx)
    }

    /// The value `statement` gives to `variable`, if the matcher binds it.
    pub fn value_of(&self, variable: &Variable, statement: &Statement) -> Option<Term> {
        if self.subject.variable() == Some(variable) {
            Some(statement.subject.clone())
        } else if self.object.variable() == Some(variable) {
            Some(statement.object.clone())
        } else if self.predicate.variable() == Some(variable) {
            Some(Term::Iri(statement.predicate.clone()))
        } else {
            None
        }
    }

    pub fn variables(&self) -> Vec<&Variable> {
        [&self.subject, &self.predicate, &self.object]
            .into_iter()
            .filter_map(Slot::variable)
            .collect()
    }

    /// Variables shared with `other`.
    pub fn join_keys<'a>(&'a self, other: &StatementMatcher) -> Vec<&'a Variable> {
        let theirs = other.variables();
        self.variables()
            .into_iter()
            .filter(|v| theirs.contains(v))
            .collect()
    }
}

impl fmt::Display for StatementMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if self.include_subclasses {
            write!(f, " (+subclasses)")?;
        }
        Ok(())
    }
}
