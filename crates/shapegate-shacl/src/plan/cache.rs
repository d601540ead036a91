//! Shared plan fragments.

use super::{PlanNode, TupleIter};
use crate::connections::{CacheId, ConnectionsGroup};
use crate::error::Result;

/// Stands in for a plan fragment registered with
/// [`ConnectionsGroup::cached_node_for`].
///
/// The first iteration drains the fragment and stores its tuples in the
/// connections group; every later iteration replays them. The cache lives
/// as long as the group, which is one transaction's validation run.
#[derive(Debug)]
pub struct CacheNode {
    id: CacheId,
    signature: String,
}

impl CacheNode {
    pub(crate) fn new(id: CacheId, signature: String) -> Self {
        Self { id, signature }
    }

    pub fn id(&self) -> CacheId {
        self.id
    }
}

impl PlanNode for CacheNode {
    fn iterate<'a>(&'a self, cx: &'a ConnectionsGroup) -> Result<TupleIter<'a>> {
        let tuples = cx.cached_result(self.id)?;
        Ok(Box::new((0..tuples.len()).map(move |i| Ok(tuples[i].clone()))))
    }

    fn signature(&self) -> String {
        // Same output as the wrapped node.
        self.signature.clone()
    }
}
