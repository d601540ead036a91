//! Everything one validation run reads from.

use crate::error::Result;
use crate::plan::{collect, CacheNode, PlanNode, PlanRef, View};
use crate::query::QueryEngine;
use crate::reasoner::SubClassReasoner;
use crate::tuple::ValidationTuple;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use shapegate_model::{Iri, Statement, StatementPattern, Term};
use shapegate_store::{ChangeSet, OverlayView, StatementSource, StoreError};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Index of a cached plan fragment within one [`ConnectionsGroup`].
pub type CacheId = usize;

#[derive(Debug, Clone, Copy)]
pub struct GroupOptions {
    pub cache_enabled: bool,
    pub join_batch_size: usize,
    pub subclass_reasoning: bool,
    pub log_plans: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            join_batch_size: 512,
            subclass_reasoning: true,
            log_plans: false,
        }
    }
}

struct CacheSlot {
    node: PlanRef,
    result: Mutex<Option<Arc<[ValidationTuple]>>>,
}

/// The four views of a transaction (added, removed, base, current), plus the
/// per-run state plans share: the fragment cache, the subclass closure, the
/// nested-shape conformance memo and the open-iterator count.
///
/// A group lives for one validation run and is shared by every shape
/// validated in it, possibly from several threads.
pub struct ConnectionsGroup {
    added: Arc<ChangeSet>,
    removed: Arc<ChangeSet>,
    base: Arc<dyn StatementSource>,
    current: Arc<dyn StatementSource>,
    reasoner: Option<SubClassReasoner>,
    query_engine: Arc<dyn QueryEngine>,
    options: GroupOptions,
    cache_index: DashMap<String, CacheId>,
    cache_slots: RwLock<Vec<Arc<CacheSlot>>>,
    conformance: DashMap<(Term, Term), bool>,
    open_iterators: AtomicUsize,
}

impl ConnectionsGroup {
    pub fn new(
        base: Arc<dyn StatementSource>,
        added: Arc<ChangeSet>,
        removed: Arc<ChangeSet>,
        query_engine: Arc<dyn QueryEngine>,
        options: GroupOptions,
    ) -> Result<Self> {
        let current: Arc<dyn StatementSource> =
            Arc::new(OverlayView::new(base.clone(), added.clone(), removed.clone()));
        let reasoner = if options.subclass_reasoning {
            Some(SubClassReasoner::from_source(current.as_ref())?)
        } else {
            None
        };
        Ok(Self {
            added,
            removed,
            base,
            current,
            reasoner,
            query_engine,
            options,
            cache_index: DashMap::new(),
            cache_slots: RwLock::new(Vec::new()),
            conformance: DashMap::new(),
            open_iterators: AtomicUsize::new(0),
        })
    }

    pub fn view(&self, view: View) -> &dyn StatementSource {
        match view {
            View::Added => self.added.as_ref(),
            View::Removed => self.removed.as_ref(),
            View::Base => self.base.as_ref(),
            View::Current => self.current.as_ref(),
        }
    }

    pub fn added(&self) -> &ChangeSet {
        &self.added
    }

    pub fn removed(&self) -> &ChangeSet {
        &self.removed
    }

    pub fn added_statements(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Iri>,
        object: Option<&Term>,
    ) -> std::result::Result<Vec<Statement>, StoreError> {
        self.statements_in(View::Added, subject, predicate, object)
    }

    pub fn removed_statements(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Iri>,
        object: Option<&Term>,
    ) -> std::result::Result<Vec<Statement>, StoreError> {
        self.statements_in(View::Removed, subject, predicate, object)
    }

    pub fn base_statements(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Iri>,
        object: Option<&Term>,
    ) -> std::result::Result<Vec<Statement>, StoreError> {
        self.statements_in(View::Base, subject, predicate, object)
    }

    pub fn current_statements(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Iri>,
        object: Option<&Term>,
    ) -> std::result::Result<Vec<Statement>, StoreError> {
        self.statements_in(View::Current, subject, predicate, object)
    }

    fn statements_in(
        &self,
        view: View,
        subject: Option<&Term>,
        predicate: Option<&Iri>,
        object: Option<&Term>,
    ) -> std::result::Result<Vec<Statement>, StoreError> {
        let pattern = StatementPattern::new(subject.cloned(), predicate.cloned(), object.cloned());
        Ok(self.track(self.view(view).statements(&pattern)?).collect())
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    /// Subjects and objects of every added or removed statement.
    pub fn touched_nodes(&self) -> BTreeSet<Term> {
        let mut nodes = self.added.touched_nodes();
        nodes.extend(self.removed.touched_nodes());
        nodes
    }

    /// `class` and, with subclass reasoning on, every class below it.
    pub fn resolve_subclasses(&self, class: &Term) -> BTreeSet<Term> {
        match &self.reasoner {
            Some(reasoner) => reasoner.subclasses_of(class),
            None => BTreeSet::from([class.clone()]),
        }
    }

    pub fn reasoning_enabled(&self) -> bool {
        self.reasoner.is_some()
    }

    pub fn query_engine(&self) -> &dyn QueryEngine {
        self.query_engine.as_ref()
    }

    pub fn join_batch_size(&self) -> usize {
        self.options.join_batch_size
    }

    pub fn log_plans(&self) -> bool {
        self.options.log_plans
    }

    // ------------------------------------------------------------------------
    // Fragment cache
    // ------------------------------------------------------------------------

    /// A node producing the same tuples as `node`, evaluated at most once per
    /// group. Nodes with equal signatures share one cache entry. With the
    /// cache disabled `node` comes back unchanged.
    pub fn cached_node_for(&self, node: PlanRef) -> PlanRef {
        if !self.options.cache_enabled {
            return node;
        }
        let signature = node.signature();
        let id = *self
            .cache_index
            .entry(signature.clone())
            .or_insert_with(|| {
                let mut slots = self.cache_slots.write();
                slots.push(Arc::new(CacheSlot {
                    node,
                    result: Mutex::new(None),
                }));
                slots.len() - 1
            });
        Arc::new(CacheNode::new(id, signature))
    }

    /// The tuples of cache entry `id`, computing them on first use.
    pub(crate) fn cached_result(&self, id: CacheId) -> Result<Arc<[ValidationTuple]>> {
        let slot = self.cache_slots.read().get(id).cloned();
        let Some(slot) = slot else {
            return Err(crate::error::ShaclError::UnsupportedOperation(format!(
                "unknown cache entry {id}"
            )));
        };
        // Concurrent readers of one entry wait for the first evaluation.
        let mut result = slot.result.lock();
        if let Some(tuples) = result.as_ref() {
            return Ok(tuples.clone());
        }
        let tuples: Arc<[ValidationTuple]> = collect(slot.node.as_ref(), self)?.into();
        *result = Some(tuples.clone());
        Ok(tuples)
    }

    pub fn cache_len(&self) -> usize {
        self.cache_slots.read().len()
    }

    // ------------------------------------------------------------------------
    // Nested shape memo
    // ------------------------------------------------------------------------

    pub(crate) fn known_conformance(&self, shape: &Term, node: &Term) -> Option<bool> {
        self.conformance
            .get(&(shape.clone(), node.clone()))
            .map(|entry| *entry.value())
    }

    pub(crate) fn record_conformance(&self, shape: &Term, node: &Term, conforms: bool) {
        self.conformance.insert((shape.clone(), node.clone()), conforms);
    }

    // ------------------------------------------------------------------------
    // Iterator accounting
    // ------------------------------------------------------------------------

    /// Counts `iter` as open until it is dropped.
    pub fn track<'a, I>(&'a self, iter: I) -> TrackedIter<'a, I>
    where
        I: Iterator + Send + 'a,
    {
        self.open_iterators.fetch_add(1, Ordering::SeqCst);
        TrackedIter {
            inner: iter,
            open: &self.open_iterators,
        }
    }

    /// Store iterators currently held by plans.
    pub fn open_iterators(&self) -> usize {
        self.open_iterators.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ConnectionsGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionsGroup")
            .field("added", &self.added.len())
            .field("removed", &self.removed.len())
            .field("options", &self.options)
            .field("cache_entries", &self.cache_len())
            .finish()
    }
}

/// A store iterator registered with a [`ConnectionsGroup`].
pub struct TrackedIter<'a, I> {
    inner: I,
    open: &'a AtomicUsize,
}

impl<I: Iterator> Iterator for TrackedIter<'_, I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<I> Drop for TrackedIter<'_, I> {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ex, group_with, pred, triple};
    use shapegate_model::vocab;

    #[test]
    fn test_iterators_close_on_drop() {
        let cx = group_with(&[triple("a", "knows", "b")], &[], &[]);
        let pattern = StatementPattern::any().with_predicate(pred("knows"));
        let iter = cx.track(cx.view(View::Current).statements(&pattern).unwrap());
        assert_eq!(cx.open_iterators(), 1);
        drop(iter);
        assert_eq!(cx.open_iterators(), 0);
        let knows = pred("knows");
        assert_eq!(cx.current_statements(None, Some(&knows), None).unwrap().len(), 1);
        assert!(cx.added_statements(Some(&ex("a")), None, None).unwrap().is_empty());
        assert_eq!(cx.base_statements(Some(&ex("a")), None, None).unwrap().len(), 1);
        assert_eq!(cx.open_iterators(), 0);
    }

    #[test]
    fn test_touched_nodes_and_subclasses() {
        let hierarchy = Statement::new(ex("Dog"), vocab::rdfs::SUB_CLASS_OF, ex("Animal"));
        let cx = group_with(&[], &[hierarchy, triple("rex", "knows", "tom")], &[triple("x", "knows", "y")]);
        assert_eq!(cx.change_count(), 3);
        let touched = cx.touched_nodes();
        assert!(touched.contains(&ex("rex")));
        assert!(touched.contains(&ex("y")));
        assert!(!touched.contains(&Term::Iri(pred("knows"))));
        assert_eq!(
            cx.resolve_subclasses(&ex("Animal")),
            BTreeSet::from([ex("Animal"), ex("Dog")])
        );
    }
}
