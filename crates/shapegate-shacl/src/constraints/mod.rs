//! Constraint components.
//!
//! Each component turns a stream of focus tuples into the stream of its
//! violations. How the focus stream is built (incrementally from the
//! transaction's changes, from every target, or from one nested node) is
//! the caller's business; [`PlanMode`] only tells the component whether
//! fragments may be shared through the connections group cache.

mod closed;
mod count;
mod logical;
mod pair;
mod sparql;
mod value;

pub use closed::{ClosedCheck, ClosedNode};
pub use count::{HasValueAmong, MaxCount, MinCount, Qualified, UniqueLang};
pub use logical::{conforms, LogicalCheck, LogicalKind};
pub use pair::{PairCheck, PairKind};
pub use sparql::{QueryValuesNode, SparqlConstraint, SparqlNode};
pub use value::{NodeKind, PatternCheck, RangeKind, ValueCheck};

use crate::connections::ConnectionsGroup;
use crate::error::Result;
use crate::plan::{
    BulkedJoinNode, FilterNode, GroupFilterNode, JoinKind, MapperNode, Mapping, PlanRef, View,
};
use crate::shape::{Shape, ShapeKind};
use shapegate_model::{vocab, Iri};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Focus nodes derived from the transaction's changes.
    Incremental,
    /// Every target in the post-commit graph.
    Bulk,
    /// A single node checked against a nested shape. Nothing is cached.
    Nested,
}

#[derive(Debug, Clone)]
pub enum Component {
    Value(ValueCheck),
    MinCount(usize),
    MaxCount(usize),
    /// Property shape form of `sh:hasValue`.
    HasValue(HasValueAmong),
    UniqueLang,
    Pair(PairCheck),
    Closed(ClosedCheck),
    Logical(LogicalCheck),
    Qualified(Qualified),
    Sparql(SparqlConstraint),
}

impl Component {
    /// Local name of the SHACL constraint component.
    pub fn id(&self) -> &'static str {
        match self {
            Component::Value(check) => check.component_id(),
            Component::MinCount(_) => "MinCountConstraintComponent",
            Component::MaxCount(_) => "MaxCountConstraintComponent",
            Component::HasValue(_) => "HasValueConstraintComponent",
            Component::UniqueLang => "UniqueLangConstraintComponent",
            Component::Pair(check) => check.component_id(),
            Component::Closed(_) => "ClosedConstraintComponent",
            Component::Logical(check) => check.component_id(),
            Component::Qualified(check) => check.component_id(),
            Component::Sparql(_) => "SPARQLConstraintComponent",
        }
    }

    pub fn iri(&self) -> Iri {
        Iri::new(format!("{}{}", vocab::sh::NS, self.id()))
    }

    /// How many edges beyond the value node a change can sit and still alter
    /// this component's verdict on that value. `None` when unbounded.
    ///
    /// Edges along the shape's own path and the focus node's pair-predicate
    /// edges are accounted for separately.
    pub fn reach(&self) -> Option<usize> {
        match self {
            Component::Value(check) => Some(check.reach()),
            Component::MinCount(_)
            | Component::MaxCount(_)
            | Component::HasValue(_)
            | Component::UniqueLang
            | Component::Pair(_) => Some(0),
            Component::Closed(_) => Some(1),
            Component::Logical(check) => check
                .shapes
                .iter()
                .try_fold(0, |acc, shape| Some(acc.max(shape.depth()?))),
            Component::Qualified(check) => check.shape.depth(),
            Component::Sparql(_) => None,
        }
    }

    /// The other predicate of a property pair constraint.
    pub fn pair_predicate(&self) -> Option<&Iri> {
        match self {
            Component::Pair(check) => Some(&check.predicate),
            _ => None,
        }
    }

    /// Per-value components whose values can come from the query engine.
    pub fn supports_query_approach(&self) -> bool {
        matches!(self, Component::Value(_))
    }

    /// Message attached to the component itself, overriding the shape's.
    pub fn message(&self) -> Option<&str> {
        match self {
            Component::Sparql(constraint) => constraint.message.as_deref(),
            _ => None,
        }
    }

    /// A plan yielding exactly the violations of this component for the
    /// focus tuples `focus` produces.
    pub fn plan(
        &self,
        shape: &Shape,
        focus: PlanRef,
        cx: &ConnectionsGroup,
        mode: PlanMode,
    ) -> Result<PlanRef> {
        let plan: PlanRef = match self {
            Component::Value(check) => {
                let values = value_plan(shape, focus, JoinKind::Inner, cx, mode);
                Arc::new(FilterNode::failing(values, Arc::new(check.clone())))
            }
            Component::Logical(check) => {
                let values = value_plan(shape, focus, JoinKind::Inner, cx, mode);
                Arc::new(FilterNode::failing(values, Arc::new(check.clone())))
            }
            Component::MinCount(0) => Arc::new(crate::plan::EmptyNode),
            Component::MinCount(min) => {
                let values = value_plan(shape, focus, JoinKind::LeftOuter, cx, mode);
                Arc::new(GroupFilterNode::new(values, Arc::new(MinCount(*min))))
            }
            Component::MaxCount(max) => {
                let values = value_plan(shape, focus, JoinKind::Inner, cx, mode);
                Arc::new(GroupFilterNode::new(values, Arc::new(MaxCount(*max))))
            }
            Component::HasValue(check) => {
                let values = value_plan(shape, focus, JoinKind::LeftOuter, cx, mode);
                Arc::new(GroupFilterNode::new(values, Arc::new(check.clone())))
            }
            Component::UniqueLang => {
                let values = value_plan(shape, focus, JoinKind::Inner, cx, mode);
                Arc::new(GroupFilterNode::new(values, Arc::new(UniqueLang)))
            }
            Component::Pair(check) => {
                let values = value_plan(shape, focus, JoinKind::LeftOuter, cx, mode);
                Arc::new(GroupFilterNode::new(values, Arc::new(check.clone())))
            }
            Component::Qualified(check) => {
                let values = value_plan(shape, focus, JoinKind::LeftOuter, cx, mode);
                Arc::new(GroupFilterNode::new(values, Arc::new(check.clone())))
            }
            Component::Closed(check) => {
                let values = value_plan(shape, focus, JoinKind::Inner, cx, mode);
                Arc::new(ClosedNode::new(values, check.clone()))
            }
            Component::Sparql(constraint) => Arc::new(SparqlNode::new(focus, constraint.clone())),
        };
        if cx.log_plans() && mode != PlanMode::Nested {
            tracing::debug!(shape = %shape.id(), component = self.id(), plan = %plan.signature(), "validation plan");
        }
        Ok(plan)
    }
}

/// Value nodes of the focus tuples: the path's ends for property shapes, the
/// focus itself for node shapes.
pub(crate) fn value_plan(
    shape: &Shape,
    focus: PlanRef,
    kind: JoinKind,
    cx: &ConnectionsGroup,
    mode: PlanMode,
) -> PlanRef {
    let values: PlanRef = match shape.kind() {
        ShapeKind::Property(path) => {
            Arc::new(BulkedJoinNode::new(focus, View::Current, path.clone(), kind))
        }
        ShapeKind::Node => Arc::new(MapperNode::new(focus, Mapping::FocusAsValue)),
    };
    match mode {
        PlanMode::Nested => values,
        _ => cx.cached_node_for(values),
    }
}
