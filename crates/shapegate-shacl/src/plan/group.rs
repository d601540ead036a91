//! Per-focus-node aggregation.

use super::{PlanNode, PlanRef, TupleIter};
use crate::connections::ConnectionsGroup;
use crate::error::Result;
use crate::tuple::ValidationTuple;
use shapegate_model::Term;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A test over all tuples sharing a focus node (counts, pairwise
/// comparisons, uniqueness).
pub trait GroupTest: Send + Sync + fmt::Debug {
    /// The failing tuples for `focus`. `group` holds every upstream tuple
    /// with that focus, in upstream order; tuples without a value mark a
    /// focus node that has none.
    fn violations(
        &self,
        focus: &Term,
        group: &[ValidationTuple],
        cx: &ConnectionsGroup,
    ) -> Result<Vec<ValidationTuple>>;

    fn signature(&self) -> String;
}

/// Groups the upstream by focus node and emits what the test reports.
///
/// Grouping needs the whole upstream, so the first pull drains it. Output is
/// ordered by focus node.
#[derive(Debug)]
pub struct GroupFilterNode {
    upstream: PlanRef,
    test: Arc<dyn GroupTest>,
}

impl GroupFilterNode {
    pub fn new(upstream: PlanRef, test: Arc<dyn GroupTest>) -> Self {
        Self { upstream, test }
    }
}

impl PlanNode for GroupFilterNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let mut groups: BTreeMap<Term, Vec<ValidationTuple>> = BTreeMap::new();
        for tuple in self.upstream.iterate(cx)? {
            let tuple = tuple?;
            groups.entry(tuple.focus().clone()).or_default().push(tuple);
        }

        let mut out = Vec::new();
        for (focus, group) in &groups {
            out.extend(self.test.violations(focus, group, cx)?);
        }
        Ok(Box::new(out.into_iter().map(Ok)))
    }

    fn signature(&self) -> String {
        format!(
            "GroupFilter[{}]({})",
            self.test.signature(),
            self.upstream.signature()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{collect, ValuesNode};
    use crate::testing::{ex, group_with};
    use crate::tuple::Scope;

    #[derive(Debug)]
    struct AtMostOne;

    impl GroupTest for AtMostOne {
        fn violations(
            &self,
            focus: &Term,
            group: &[ValidationTuple],
            _cx: &ConnectionsGroup,
        ) -> Result<Vec<ValidationTuple>> {
            let values = group.iter().filter(|t| t.has_value()).count();
            Ok(if values > 1 {
                vec![ValidationTuple::target(focus.clone(), Scope::PropertyShape)]
            } else {
                Vec::new()
            })
        }

        fn signature(&self) -> String {
            "at-most-one".to_string()
        }
    }

    #[test]
    fn test_groups_by_focus() {
        let cx = group_with(&[], &[], &[]);
        let pair = |f: &str, v: &str| ValidationTuple::pair(ex(f), ex(v), Scope::PropertyShape);
        let upstream: PlanRef = Arc::new(ValuesNode::new(vec![
            pair("b", "1"),
            pair("a", "1"),
            pair("b", "2"),
            ValidationTuple::target(ex("c"), Scope::PropertyShape),
        ]));
        let node = GroupFilterNode::new(upstream, Arc::new(AtMostOne));
        let failing: Vec<Term> = collect(&node, &cx)
            .unwrap()
            .into_iter()
            .map(|t| t.focus().clone())
            .collect();
        assert_eq!(failing, vec![ex("b")]);
    }
}
