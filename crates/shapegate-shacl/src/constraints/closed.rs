//! `sh:closed`.

use crate::connections::ConnectionsGroup;
use crate::error::Result;
use crate::plan::{PlanNode, PlanRef, TupleIter};
use crate::tuple::ValidationTuple;
use shapegate_model::{Iri, Term};
use std::collections::BTreeSet;

/// Predicates a closed shape allows: the predicates of its property shapes
/// plus `sh:ignoredProperties`.
#[derive(Debug, Clone, Default)]
pub struct ClosedCheck {
    pub allowed: BTreeSet<Iri>,
}

impl ClosedCheck {
    pub fn new(allowed: BTreeSet<Iri>) -> Self {
        Self { allowed }
    }
}

/// One tuple per statement whose subject is a value node and whose predicate
/// is not allowed. The chain is `[focus, predicate, object]`, so the object
/// is the reported value and the predicate the reported path.
#[derive(Debug)]
pub struct ClosedNode {
    values: PlanRef,
    check: ClosedCheck,
}

impl ClosedNode {
    pub fn new(values: PlanRef, check: ClosedCheck) -> Self {
        Self { values, check }
    }
}

impl PlanNode for ClosedNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let upstream = self.values.iterate(cx)?;
        Ok(Box::new(upstream.flat_map(move |item| -> Vec<Result<ValidationTuple>> {
            let tuple = match item {
                Ok(tuple) => tuple,
                Err(e) => return vec![Err(e)],
            };
            let Some(value) = tuple.value().filter(|v| v.is_resource()) else {
                return Vec::new();
            };
            match cx.current_statements(Some(value), None, None) {
                Ok(statements) => statements
                    .into_iter()
                    .filter(|st| !self.check.allowed.contains(&st.predicate))
                    .map(|st| {
                        Ok(ValidationTuple::pair(
                            tuple.focus().clone(),
                            Term::Iri(st.predicate),
                            tuple.scope(),
                        )
                        .with_value(st.object))
                    })
                    .collect(),
                Err(e) => vec![Err(e.into())],
            }
        })))
    }

    fn signature(&self) -> String {
        let allowed: Vec<&str> = self.check.allowed.iter().map(Iri::as_str).collect();
        format!("Closed[{}]({})", allowed.join(" "), self.values.signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{collect, ValuesNode};
    use crate::testing::{ex, group_with, pred, triple};
    use crate::tuple::Scope;
    use std::sync::Arc;

    #[test]
    fn test_reports_unexpected_predicates() {
        let data = [triple("a", "name", "n"), triple("a", "secret", "s"), triple("b", "secret", "t")];
        let cx = group_with(&data, &[], &[]);
        let values: PlanRef = Arc::new(ValuesNode::new(vec![
            ValidationTuple::target(ex("a"), Scope::NodeShape),
            ValidationTuple::target(Term::literal("lit"), Scope::NodeShape),
        ]));
        let node = ClosedNode::new(values, ClosedCheck::new(BTreeSet::from([pred("name")])));
        let tuples = collect(&node, &cx).unwrap();
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].focus(), &ex("a"));
        assert_eq!(tuples[0].chain()[1], Term::Iri(pred("secret")));
        assert_eq!(tuples[0].value(), Some(&ex("s")));
    }
}
