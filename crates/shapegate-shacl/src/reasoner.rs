//! `rdfs:subClassOf` closure.

use shapegate_model::{vocab, Iri, StatementPattern, Term};
use shapegate_store::{ChangeSet, StatementSource, StoreError};
use std::collections::{BTreeMap, BTreeSet};

/// The transitive subclass relation of one graph.
///
/// Built once per validation run from the post-commit graph. A class is
/// always a subclass of itself; cycles in the hierarchy are tolerated.
#[derive(Debug, Clone, Default)]
pub struct SubClassReasoner {
    // superclass -> every direct and indirect subclass, itself included
    closure: BTreeMap<Term, BTreeSet<Term>>,
}

impl SubClassReasoner {
    pub fn from_source(source: &dyn StatementSource) -> Result<Self, StoreError> {
        let pattern = StatementPattern::any().with_predicate(Iri::new(vocab::rdfs::SUB_CLASS_OF));
        let mut direct: BTreeMap<Term, BTreeSet<Term>> = BTreeMap::new();
        for st in source.statements(&pattern)? {
            direct.entry(st.object).or_default().insert(st.subject);
        }

        let mut closure = BTreeMap::new();
        for class in direct.keys() {
            let mut reached = BTreeSet::from([class.clone()]);
            let mut stack = vec![class.clone()];
            while let Some(next) = stack.pop() {
                for sub in direct.get(&next).into_iter().flatten() {
                    if reached.insert(sub.clone()) {
                        stack.push(sub.clone());
                    }
                }
            }
            closure.insert(class.clone(), reached);
        }
        Ok(Self { closure })
    }

    /// `class` and every class below it.
    pub fn subclasses_of(&self, class: &Term) -> BTreeSet<Term> {
        self.closure
            .get(class)
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([class.clone()]))
    }

    /// Classes with at least one declared subclass.
    pub fn len(&self) -> usize {
        self.closure.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closure.is_empty()
    }

    /// Whether a change set touches the hierarchy.
    pub fn affected_by(changes: &ChangeSet) -> bool {
        let pattern = StatementPattern::any().with_predicate(Iri::new(vocab::rdfs::SUB_CLASS_OF));
        let found = changes.matching(&pattern).next().is_some();
        found
    }
}
