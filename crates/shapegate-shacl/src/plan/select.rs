//! Nodes that read statements directly from a view.

use super::{PlanNode, PlanRef, TupleIter, View};
use crate::connections::ConnectionsGroup;
use crate::error::Result;
use crate::matcher::{StatementMatcher, Variable};
use crate::tuple::{Scope, ValidationTuple};
use shapegate_model::{StatementPattern, Term};
use std::collections::BTreeSet;

/// Scans one view for a matcher and emits a tuple per matching statement.
///
/// The focus variable becomes the tuple's focus; the optional value
/// variable its value. Order within one scan is the store's scan order.
#[derive(Debug)]
pub struct SelectNode {
    view: View,
    matcher: StatementMatcher,
    focus: Variable,
    value: Option<Variable>,
    scope: Scope,
}

impl SelectNode {
    /// Focus-only tuples.
    pub fn targets(view: View, matcher: StatementMatcher, focus: Variable, scope: Scope) -> Self {
        Self {
            view,
            matcher,
            focus,
            value: None,
            scope,
        }
    }

    /// Focus/value tuples.
    pub fn pairs(
        view: View,
        matcher: StatementMatcher,
        focus: Variable,
        value: Variable,
        scope: Scope,
    ) -> Self {
        Self {
            view,
            matcher,
            focus,
            value: Some(value),
            scope,
        }
    }
}

impl PlanNode for SelectNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let patterns = self.matcher.patterns(cx);
        let source = cx.view(self.view);
        let statements = match patterns.as_slice() {
            [single] => source.statements(single)?,
            many => source.statements_batch(many)?,
        };
        let tuples = statements.filter_map(move |st| {
            let focus = self.matcher.value_of(&self.focus, &st)?;
            let tuple = match &self.value {
                Some(value) => ValidationTuple::pair(focus, self.matcher.value_of(value, &st)?, self.scope),
                None => ValidationTuple::target(focus, self.scope),
            };
            Some(Ok(tuple.with_contexts(vec![st.context])))
        });
        Ok(Box::new(cx.track(tuples)))
    }

    fn signature(&self) -> String {
        match &self.value {
            Some(value) => format!(
                "Select[{:?}]({} => {}, {})[{:?}]",
                self.view, self.matcher, self.focus, value, self.scope
            ),
            None => format!(
                "Select[{:?}]({} => {})[{:?}]",
                self.view, self.matcher, self.focus, self.scope
            ),
        }
    }
}

/// Every subject and object of an added or removed statement, as a target
/// tuple.
#[derive(Debug)]
pub struct ChangedNodesNode {
    scope: Scope,
}

impl ChangedNodesNode {
    pub fn new(scope: Scope) -> Self {
        Self { scope }
    }
}

impl PlanNode for ChangedNodesNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let scope = self.scope;
        Ok(Box::new(
            cx.touched_nodes()
                .into_iter()
                .map(move |node| Ok(ValidationTuple::target(node, scope))),
        ))
    }

    fn signature(&self) -> String {
        format!("ChangedNodes[{:?}]", self.scope)
    }
}

/// Nodes within `hops` edges (in either direction, in the current view) of
/// the upstream tuples' active nodes, including those nodes themselves.
#[derive(Debug)]
pub struct NeighborhoodNode {
    upstream: PlanRef,
    hops: usize,
    scope: Scope,
}

impl NeighborhoodNode {
    pub fn new(upstream: PlanRef, hops: usize, scope: Scope) -> Self {
        Self {
            upstream,
            hops,
            scope,
        }
    }
}

impl PlanNode for NeighborhoodNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let mut reached = BTreeSet::new();
        for tuple in self.upstream.iterate(cx)? {
            reached.insert(tuple?.active().clone());
        }

        let source = cx.view(View::Current);
        let mut frontier: Vec<Term> = reached.iter().cloned().collect();
        for _ in 0..self.hops {
            if frontier.is_empty() {
                break;
            }
            let mut patterns = Vec::with_capacity(frontier.len() * 2);
            for node in &frontier {
                if node.is_resource() {
                    patterns.push(StatementPattern::any().with_subject(node.clone()));
                }
                patterns.push(StatementPattern::any().with_object(node.clone()));
            }
            let mut next = Vec::new();
            for st in cx.track(source.statements_batch(&patterns)?) {
                for node in [st.subject, st.object] {
                    if reached.insert(node.clone()) {
                        next.push(node);
                    }
                }
            }
            frontier = next;
        }

        let scope = self.scope;
        Ok(Box::new(
            reached
                .into_iter()
                .map(move |node| Ok(ValidationTuple::target(node, scope))),
        ))
    }

    fn signature(&self) -> String {
        format!(
            "Neighborhood[{}, {:?}]({})",
            self.hops,
            self.scope,
            self.upstream.signature()
        )
    }
}
