//! Property pair constraints: compare a focus node's values with its values
//! for another predicate.

use crate::connections::ConnectionsGroup;
use crate::error::Result;
use crate::plan::GroupTest;
use crate::tuple::ValidationTuple;
use shapegate_model::{Iri, Term};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairKind {
    Equals,
    Disjoint,
    LessThan,
    LessThanOrEquals,
}

#[derive(Debug, Clone)]
pub struct PairCheck {
    pub kind: PairKind,
    pub predicate: Iri,
}

impl PairCheck {
    pub fn new(kind: PairKind, predicate: Iri) -> Self {
        Self { kind, predicate }
    }

    pub fn component_id(&self) -> &'static str {
        match self.kind {
            PairKind::Equals => "EqualsConstraintComponent",
            PairKind::Disjoint => "DisjointConstraintComponent",
            PairKind::LessThan => "LessThanConstraintComponent",
            PairKind::LessThanOrEquals => "LessThanOrEqualsConstraintComponent",
        }
    }
}

fn less(value: &Term, other: &Term, or_equal: bool) -> bool {
    let ordering = match (value.as_literal(), other.as_literal()) {
        (Some(a), Some(b)) => a.partial_cmp_value(b),
        _ => None,
    };
    match ordering {
        Some(Ordering::Less) => true,
        Some(Ordering::Equal) => or_equal,
        _ => false,
    }
}

impl GroupTest for PairCheck {
    fn violations(
        &self,
        focus: &Term,
        group: &[ValidationTuple],
        cx: &ConnectionsGroup,
    ) -> Result<Vec<ValidationTuple>> {
        let Some(first) = group.first() else {
            return Ok(Vec::new());
        };
        let values: BTreeSet<&Term> = group.iter().filter_map(ValidationTuple::value).collect();
        let others: BTreeSet<Term> = cx
            .current_statements(Some(focus), Some(&self.predicate), None)?
            .into_iter()
            .map(|st| st.object)
            .collect();

        let failing: Vec<Term> = match self.kind {
            PairKind::Equals => values
                .iter()
                .filter(|v| !others.contains(**v))
                .map(|v| (*v).clone())
                .chain(others.iter().filter(|o| !values.contains(o)).cloned())
                .collect(),
            PairKind::Disjoint => values
                .iter()
                .filter(|v| others.contains(**v))
                .map(|v| (*v).clone())
                .collect(),
            PairKind::LessThan | PairKind::LessThanOrEquals => {
                let or_equal = self.kind == PairKind::LessThanOrEquals;
                values
                    .iter()
                    .filter(|v| others.iter().any(|o| !less(v, o, or_equal)))
                    .map(|v| (*v).clone())
                    .collect()
            }
        };

        let base = first.focus_only();
        Ok(failing
            .into_iter()
            .map(|value| ValidationTuple::pair(base.focus().clone(), value, base.scope()))
            .collect())
    }

    fn signature(&self) -> String {
        format!("{:?} {}", self.kind, self.predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ex, group_with, literal_triple, pred, triple};
    use crate::tuple::Scope;
    use shapegate_model::Literal;

    fn values(focus: &str, values: &[Term]) -> Vec<ValidationTuple> {
        if values.is_empty() {
            return vec![ValidationTuple::target(ex(focus), Scope::PropertyShape)];
        }
        values
            .iter()
            .map(|v| ValidationTuple::pair(ex(focus), v.clone(), Scope::PropertyShape))
            .collect()
    }

    #[test]
    fn test_equals_reports_both_sides() {
        let cx = group_with(&[triple("a", "alias", "x"), triple("a", "alias", "z")], &[], &[]);
        let check = PairCheck::new(PairKind::Equals, pred("alias"));
        let failing: Vec<Term> = check
            .violations(&ex("a"), &values("a", &[ex("x"), ex("y")]), &cx)
            .unwrap()
            .into_iter()
            .filter_map(|t| t.value().cloned())
            .collect();
        assert_eq!(failing, vec![ex("y"), ex("z")]);

        let none = values("a", &[]);
        assert_eq!(check.violations(&ex("a"), &none, &cx).unwrap().len(), 2);
    }

    #[test]
    fn test_disjoint_and_less_than() {
        let cx = group_with(
            &[
                triple("a", "other", "x"),
                literal_triple("a", "end", Literal::integer(10)),
            ],
            &[],
            &[],
        );
        let disjoint = PairCheck::new(PairKind::Disjoint, pred("other"));
        assert_eq!(
            disjoint.violations(&ex("a"), &values("a", &[ex("x"), ex("w")]), &cx).unwrap().len(),
            1
        );

        let start = |n: i64| Term::Literal(Literal::integer(n));
        let lt = PairCheck::new(PairKind::LessThan, pred("end"));
        assert!(lt.violations(&ex("a"), &values("a", &[start(3)]), &cx).unwrap().is_empty());
        assert_eq!(lt.violations(&ex("a"), &values("a", &[start(10)]), &cx).unwrap().len(), 1);
        let lte = PairCheck::new(PairKind::LessThanOrEquals, pred("end"));
        assert!(lte.violations(&ex("a"), &values("a", &[start(10)]), &cx).unwrap().is_empty());
        // IRIs never compare.
        assert_eq!(lt.violations(&ex("a"), &values("a", &[ex("w")]), &cx).unwrap().len(), 1);
    }
}
