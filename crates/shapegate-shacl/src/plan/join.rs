//! Joins against the store along a path, in batches.

use super::{PlanNode, PlanRef, TupleIter, View};
use crate::connections::ConnectionsGroup;
use crate::error::Result;
use crate::path::Path;
use crate::tuple::{Scope, ValidationTuple};
use shapegate_model::Term;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// Drop upstream tuples without a match.
    Inner,
    /// Keep upstream tuples without a match, with no value.
    LeftOuter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Upstream active nodes are focus nodes; emits focus/value tuples.
    Forward,
    /// Upstream active nodes are value nodes; emits the focus nodes that
    /// reach them as target tuples of `scope`.
    Reverse(Scope),
}

/// Buffers up to `join_batch_size` upstream tuples and resolves the whole
/// batch with one store lookup.
#[derive(Debug)]
pub struct BulkedJoinNode {
    upstream: PlanRef,
    view: View,
    path: Path,
    kind: JoinKind,
    direction: Direction,
}

impl BulkedJoinNode {
    pub fn new(upstream: PlanRef, view: View, path: Path, kind: JoinKind) -> Self {
        Self {
            upstream,
            view,
            path,
            kind,
            direction: Direction::Forward,
        }
    }

    pub fn reverse(upstream: PlanRef, view: View, path: Path, scope: Scope) -> Self {
        Self {
            upstream,
            view,
            path,
            kind: JoinKind::Inner,
            direction: Direction::Reverse(scope),
        }
    }
}

impl PlanNode for BulkedJoinNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        Ok(Box::new(BulkedJoinIter {
            node: self,
            cx,
            upstream: self.upstream.iterate(cx)?,
            ready: VecDeque::new(),
            done: false,
        }))
    }

    fn signature(&self) -> String {
        format!(
            "BulkedJoin[{:?}, {:?}, {:?}, {}]({})",
            self.kind,
            self.direction,
            self.view,
            self.path,
            self.upstream.signature()
        )
    }
}

struct BulkedJoinIter<'a> {
    node: &'a BulkedJoinNode,
    cx: &'a ConnectionsGroup,
    upstream: TupleIter<'a>,
    ready: VecDeque<ValidationTuple>,
    done: bool,
}

impl BulkedJoinIter<'_> {
    fn process(&mut self, batch: Vec<ValidationTuple>) -> Result<()> {
        let mut starts: Vec<Term> = batch.iter().map(|t| t.active().clone()).collect();
        starts.sort();
        starts.dedup();

        let forward = matches!(self.node.direction, Direction::Forward);
        let source = self.cx.view(self.node.view);
        let mut ends: BTreeMap<Term, Vec<Term>> = BTreeMap::new();
        for (start, end) in self.node.path.pairs(source, &starts, forward)? {
            ends.entry(start).or_default().push(end);
        }

        for tuple in batch {
            match (ends.get(tuple.active()), self.node.direction) {
                (Some(matches), Direction::Forward) => {
                    for end in matches {
                        self.ready.push_back(tuple.with_value(end.clone()));
                    }
                }
                (Some(matches), Direction::Reverse(scope)) => {
                    for end in matches {
                        self.ready.push_back(
                            ValidationTuple::target(end.clone(), scope)
                                .with_contexts(tuple.contexts().to_vec()),
                        );
                    }
                }
                (None, Direction::Forward) if self.node.kind == JoinKind::LeftOuter => {
                    self.ready.push_back(tuple);
                }
                (None, _) => {}
            }
        }
        Ok(())
    }
}

impl Iterator for BulkedJoinIter<'_> {
    type Item = Result<ValidationTuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.ready.pop_front() {
                return Some(Ok(tuple));
            }
            if self.done {
                return None;
            }

            let batch_size = self.cx.join_batch_size().max(1);
            let mut batch = Vec::with_capacity(batch_size);
            while batch.len() < batch_size {
                match self.upstream.next() {
                    Some(Ok(tuple)) => batch.push(tuple),
                    Some(Err(e)) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                    None => {
                        self.done = true;
                        break;
                    }
                }
            }
            if let Err(e) = self.process(batch) {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{collect, ValuesNode};
    use crate::testing::{ex, group_with_options, pred, triple};
    use std::sync::Arc;

    #[test]
    fn test_left_outer_keeps_unmatched_and_batches_lookups() {
        let base = [triple("a", "knows", "b"), triple("a", "knows", "c"), triple("d", "knows", "e")];
        let cx = group_with_options(&base, &[], &[], |o| o.join_batch_size = 2);
        let focus: PlanRef = Arc::new(ValuesNode::new(
            ["a", "d", "z"]
                .iter()
                .map(|n| ValidationTuple::target(ex(n), Scope::PropertyShape))
                .collect(),
        ));
        let path = Path::Predicate(pred("knows"));

        let before = cx.view(View::Current).scan_count();
        let outer = BulkedJoinNode::new(focus.clone(), View::Current, path.clone(), JoinKind::LeftOuter);
        let tuples = collect(&outer, &cx).unwrap();
        // Three focus nodes in batches of two: two lookups.
        assert_eq!(cx.view(View::Current).scan_count() - before, 2);
        assert_eq!(tuples.len(), 4);
        assert!(tuples.iter().any(|t| t.focus() == &ex("z") && t.value().is_none()));

        let inner = BulkedJoinNode::new(focus, View::Current, path, JoinKind::Inner);
        let tuples = collect(&inner, &cx).unwrap();
        assert_eq!(tuples.len(), 3);
        assert!(tuples.iter().all(|t| t.value().is_some()));
    }

    #[test]
    fn test_reverse_join_finds_focus_nodes() {
        let base = [triple("child", "parentOf", "parent")];
        let cx = group_with_options(&base, &[], &[], |_| {});
        let values: PlanRef = Arc::new(ValuesNode::new(vec![ValidationTuple::target(
            ex("parent"),
            Scope::PropertyShape,
        )]));
        let inverse = Path::Inverse(Box::new(Path::Predicate(pred("parentOf"))));
        let reverse = BulkedJoinNode::reverse(values, View::Current, inverse, Scope::PropertyShape);
        let focus: Vec<Term> = collect(&reverse, &cx)
            .unwrap()
            .into_iter()
            .map(|t| t.focus().clone())
            .collect();
        // Under ^parentOf, parent reaches child; nothing reaches parent.
        assert_eq!(focus, Vec::<Term>::new());

        let child_values: PlanRef = Arc::new(ValuesNode::new(vec![ValidationTuple::target(
            ex("child"),
            Scope::PropertyShape,
        )]));
        let inverse = Path::Inverse(Box::new(Path::Predicate(pred("parentOf"))));
        let reverse = BulkedJoinNode::reverse(child_values, View::Current, inverse, Scope::PropertyShape);
        let focus: Vec<Term> = collect(&reverse, &cx)
            .unwrap()
            .into_iter()
            .map(|t| t.focus().clone())
            .collect();
        assert_eq!(focus, vec![ex("parent")]);
    }
}
