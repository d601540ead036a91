//! The unit of data flowing through validation plans.

use shapegate_model::Term;
use std::fmt;

/// Whether a tuple belongs to a node shape or a property shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    NodeShape,
    PropertyShape,
}

/// An ordered chain of terms.
///
/// The first element is the focus node (the active target). When
/// `has_value` is set the last element is the value node; for node shapes
/// the focus is its own value. Tuples are never mutated in place: every
/// transformation returns a new tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidationTuple {
    chain: Vec<Term>,
    scope: Scope,
    has_value: bool,
    contexts: Vec<Option<Term>>,
}

impl ValidationTuple {
    /// A tuple holding only a focus node.
    pub fn target(focus: Term, scope: Scope) -> Self {
        Self {
            chain: vec![focus],
            scope,
            has_value: scope == Scope::NodeShape,
            contexts: Vec::new(),
        }
    }

    /// Focus node plus value node.
    pub fn pair(focus: Term, value: Term, scope: Scope) -> Self {
        Self {
            chain: vec![focus, value],
            scope,
            has_value: true,
            contexts: Vec::new(),
        }
    }

    pub fn focus(&self) -> &Term {
        &self.chain[0]
    }

    /// The last element, the join key for the next path step.
    pub fn active(&self) -> &Term {
        &self.chain[self.chain.len() - 1]
    }

    pub fn value(&self) -> Option<&Term> {
        if self.has_value {
            self.chain.last()
        } else {
            None
        }
    }

    pub fn chain(&self) -> &[Term] {
        &self.chain
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn has_value(&self) -> bool {
        self.has_value
    }

    /// Named graphs the tuple was read from; empty when unknown.
    pub fn contexts(&self) -> &[Option<Term>] {
        &self.contexts
    }

    pub fn with_value(&self, value: Term) -> Self {
        let mut chain = self.chain.clone();
        chain.push(value);
        Self {
            chain,
            scope: self.scope,
            has_value: true,
            contexts: self.contexts.clone(),
        }
    }

    pub fn with_contexts(mut self, contexts: Vec<Option<Term>>) -> Self {
        self.contexts = contexts;
        self
    }

    pub fn with_scope(&self, scope: Scope) -> Self {
        Self {
            chain: self.chain.clone(),
            scope,
            has_value: self.has_value,
            contexts: self.contexts.clone(),
        }
    }

    /// Only the focus node, as a target tuple of the same scope.
    pub fn focus_only(&self) -> Self {
        Self {
            chain: vec![self.focus().clone()],
            scope: self.scope,
            has_value: self.scope == Scope::NodeShape,
            contexts: self.contexts.clone(),
        }
    }

    /// The focus node treated as its own value.
    pub fn focus_as_value(&self) -> Self {
        Self {
            chain: vec![self.focus().clone()],
            scope: self.scope,
            has_value: true,
            contexts: self.contexts.clone(),
        }
    }

    /// The active element as a new focus, used when a value node becomes the
    /// focus of a nested check.
    pub fn active_as_focus(&self, scope: Scope) -> Self {
        Self::target(self.active().clone(), scope).with_contexts(self.contexts.clone())
    }
}

impl fmt::Display for ValidationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, term) in self.chain.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{term}")?;
        }
        write!(f, "]")?;
        if !self.has_value {
            write!(f, " (no value)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_shape_focus_is_value() {
        let t = ValidationTuple::target(Term::iri("http://example.org/a"), Scope::NodeShape);
        assert!(t.has_value());
        assert_eq!(t.value(), Some(t.focus()));
    }

    #[test]
    fn test_property_shape_value_appends() {
        let t = ValidationTuple::target(Term::iri("http://example.org/a"), Scope::PropertyShape);
        assert_eq!(t.value(), None);
        let v = t.with_value(Term::literal("x"));
        assert_eq!(v.focus(), &Term::iri("http://example.org/a"));
        assert_eq!(v.value(), Some(&Term::literal("x")));
        assert_eq!(v.chain().len(), 2);
        assert_eq!(v.focus_only(), t);
        // The original is untouched.
        assert_eq!(t.chain().len(), 1);
    }
}
