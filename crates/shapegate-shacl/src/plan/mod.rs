//! Lazy, pull-based validation plans.
//!
//! A plan is a DAG of [`PlanNode`]s. Calling [`PlanNode::iterate`] returns a
//! single-pass stream of [`ValidationTuple`]s; nothing is evaluated until
//! the stream is pulled. Dropping a stream releases the store iterators it
//! holds, which the connections group counts (see
//! [`ConnectionsGroup::open_iterators`]).
//!
//! Every node has a structural [`PlanNode::signature`]: two nodes with the
//! same signature produce the same tuples within one connections group,
//! which is what [`ConnectionsGroup::cached_node_for`] keys its cache on.

mod cache;
mod group;
mod join;
mod select;

pub use cache::CacheNode;
pub use group::{GroupFilterNode, GroupTest};
pub use join::{BulkedJoinNode, Direction, JoinKind};
pub use select::{ChangedNodesNode, NeighborhoodNode, SelectNode};

use crate::connections::ConnectionsGroup;
use crate::error::{Result, ShaclError};
use crate::tuple::{Scope, ValidationTuple};
use ahash::AHashSet;
use std::fmt;
use std::sync::Arc;

pub type TupleIter<'a> = Box<dyn Iterator<Item = Result<ValidationTuple>> + Send + 'a>;

pub trait PlanNode: Send + Sync + fmt::Debug {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>>;

    /// Structural identity of the node and everything below it.
    fn signature(&self) -> String;
}

pub type PlanRef = Arc<dyn PlanNode>;

/// Which statements a node reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    /// Statements the transaction adds.
    Added,
    /// Statements the transaction removes.
    Removed,
    /// The store before the transaction.
    Base,
    /// The store as it will be after commit.
    Current,
}

/// Drain a plan.
pub fn collect(node: &dyn PlanNode, cx: &ConnectionsGroup) -> Result<Vec<ValidationTuple>> {
    node.iterate(cx)?.collect()
}

/// A plan that cannot be built. Constructing it fails with
/// [`ShaclError::UnsupportedOperation`], which makes the caller fall back to
/// bulk validation.
pub fn unsupported(reason: impl Into<String>) -> Result<PlanRef> {
    Err(ShaclError::UnsupportedOperation(reason.into()))
}

// ============================================================================
// Sources
// ============================================================================

/// A fixed list of tuples.
#[derive(Debug)]
pub struct ValuesNode {
    tuples: Vec<ValidationTuple>,
}

impl ValuesNode {
    pub fn new(tuples: Vec<ValidationTuple>) -> Self {
        Self { tuples }
    }
}

impl PlanNode for ValuesNode {
    fn iterate<'a>(&'a self, _cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        Ok(Box::new(self.tuples.iter().cloned().map(Ok)))
    }

    fn signature(&self) -> String {
        let items: Vec<String> = self.tuples.iter().map(|t| t.to_string()).collect();
        format!("Values({})", items.join(" "))
    }
}

#[derive(Debug, Default)]
pub struct EmptyNode;

impl PlanNode for EmptyNode {
    fn iterate<'a>(&'a self, _cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        Ok(Box::new(std::iter::empty()))
    }

    fn signature(&self) -> String {
        "Empty".to_string()
    }
}

// ============================================================================
// Filters
// ============================================================================

/// A side-effect free, deterministic test on one tuple.
pub trait TupleTest: Send + Sync + fmt::Debug {
    fn test(&self, tuple: &ValidationTuple, cx: &ConnectionsGroup) -> Result<bool>;

    fn signature(&self) -> String;
}

/// Keeps the tuples whose test result equals `keep`.
#[derive(Debug)]
pub struct FilterNode {
    upstream: PlanRef,
    test: Arc<dyn TupleTest>,
    keep: bool,
}

impl FilterNode {
    pub fn passing(upstream: PlanRef, test: Arc<dyn TupleTest>) -> Self {
        Self {
            upstream,
            test,
            keep: true,
        }
    }

    pub fn failing(upstream: PlanRef, test: Arc<dyn TupleTest>) -> Self {
        Self {
            upstream,
            test,
            keep: false,
        }
    }
}

impl PlanNode for FilterNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let upstream = self.upstream.iterate(cx)?;
        Ok(Box::new(upstream.filter_map(move |item| match item {
            Ok(tuple) => match self.test.test(&tuple, cx) {
                Ok(result) if result == self.keep => Some(Ok(tuple)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            },
            Err(e) => Some(Err(e)),
        })))
    }

    fn signature(&self) -> String {
        format!(
            "Filter[{}{}]({})",
            if self.keep { "" } else { "!" },
            self.test.signature(),
            self.upstream.signature()
        )
    }
}

// ============================================================================
// Reshaping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mapping {
    /// Drop everything but the focus node.
    FocusOnly,
    /// Use the focus node as the value node.
    FocusAsValue,
    /// The active element becomes the focus of a new target tuple.
    ActiveAsFocus(Scope),
}

#[derive(Debug)]
pub struct MapperNode {
    upstream: PlanRef,
    mapping: Mapping,
}

impl MapperNode {
    pub fn new(upstream: PlanRef, mapping: Mapping) -> Self {
        Self { upstream, mapping }
    }
}

impl PlanNode for MapperNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let mapping = self.mapping;
        Ok(Box::new(self.upstream.iterate(cx)?.map(move |item| {
            item.map(|tuple| match mapping {
                Mapping::FocusOnly => tuple.focus_only(),
                Mapping::FocusAsValue => tuple.focus_as_value(),
                Mapping::ActiveAsFocus(scope) => tuple.active_as_focus(scope),
            })
        })))
    }

    fn signature(&self) -> String {
        format!("Map[{:?}]({})", self.mapping, self.upstream.signature())
    }
}

/// Concatenation of several inputs.
#[derive(Debug)]
pub struct UnionNode {
    inputs: Vec<PlanRef>,
}

impl UnionNode {
    pub fn new(inputs: Vec<PlanRef>) -> Self {
        Self { inputs }
    }
}

impl PlanNode for UnionNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        // Inputs open lazily, one after the other.
        let iter = self.inputs.iter().flat_map(move |input| -> TupleIter<'a> {
            match input.iterate(cx) {
                Ok(inner) => inner,
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        });
        Ok(Box::new(iter))
    }

    fn signature(&self) -> String {
        let parts: Vec<String> = self.inputs.iter().map(|i| i.signature()).collect();
        format!("Union({})", parts.join(", "))
    }
}

/// Drops repeated tuples (same chain, scope and value flag).
#[derive(Debug)]
pub struct UniqueNode {
    upstream: PlanRef,
}

impl UniqueNode {
    pub fn new(upstream: PlanRef) -> Self {
        Self { upstream }
    }
}

impl PlanNode for UniqueNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let mut seen = AHashSet::new();
        Ok(Box::new(self.upstream.iterate(cx)?.filter(move |item| {
            match item {
                Ok(tuple) => seen.insert((tuple.chain().to_vec(), tuple.scope(), tuple.has_value())),
                Err(_) => true,
            }
        })))
    }

    fn signature(&self) -> String {
        format!("Unique({})", self.upstream.signature())
    }
}
