//! Transaction-local statement sets.

use crate::{dedup_batch, ScanCounter, StatementIter, StatementSource, StoreError};
use ahash::AHashMap;
use shapegate_model::{Iri, Statement, StatementPattern, Term};
use std::collections::BTreeSet;

/// An ordered set of statements indexed by subject and predicate.
///
/// Iteration order is the statements' total order, so anything derived from
/// a change set is deterministic.
#[derive(Debug, Default)]
pub struct ChangeSet {
    statements: BTreeSet<Statement>,
    by_subject: AHashMap<Term, BTreeSet<Statement>>,
    by_predicate: AHashMap<Iri, BTreeSet<Statement>>,
    scans: ScanCounter,
}

impl Clone for ChangeSet {
    fn clone(&self) -> Self {
        Self {
            statements: self.statements.clone(),
            by_subject: self.by_subject.clone(),
            by_predicate: self.by_predicate.clone(),
            scans: ScanCounter::new(),
        }
    }
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, statement: Statement) -> bool {
        if self.statements.contains(&statement) {
            return false;
        }
        self.by_subject
            .entry(statement.subject.clone())
            .or_default()
            .insert(statement.clone());
        self.by_predicate
            .entry(statement.predicate.clone())
            .or_default()
            .insert(statement.clone());
        self.statements.insert(statement)
    }

    pub fn remove(&mut self, statement: &Statement) -> bool {
        if !self.statements.remove(statement) {
            return false;
        }
        if let Some(set) = self.by_subject.get_mut(&statement.subject) {
            set.remove(statement);
            if set.is_empty() {
                self.by_subject.remove(&statement.subject);
            }
        }
        if let Some(set) = self.by_predicate.get_mut(&statement.predicate) {
            set.remove(statement);
            if set.is_empty() {
                self.by_predicate.remove(&statement.predicate);
            }
        }
        true
    }

    pub fn has(&self, statement: &Statement) -> bool {
        self.statements.contains(statement)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Statement> + '_ {
        self.statements.iter()
    }

    /// Matching statements without counting a scan.
    pub fn matching<'a>(
        &'a self,
        pattern: &'a StatementPattern,
    ) -> impl Iterator<Item = &'a Statement> + 'a {
        let by_subject = pattern
            .subject
            .as_ref()
            .map(|s| self.by_subject.get(s));
        let by_predicate = pattern
            .predicate
            .as_ref()
            .map(|p| self.by_predicate.get(p));

        // Pick the narrower index when both slots are bound.
        let candidates: Option<&BTreeSet<Statement>> = match (by_subject, by_predicate) {
            (Some(None), _) | (_, Some(None)) => None,
            (Some(Some(s)), Some(Some(p))) => Some(if s.len() <= p.len() { s } else { p }),
            (Some(Some(s)), None) => Some(s),
            (None, Some(Some(p))) => Some(p),
            (None, None) => Some(&self.statements),
        };
        candidates
            .into_iter()
            .flat_map(|set| set.iter())
            .filter(move |st| pattern.matches(st))
    }

    /// Distinct subjects and objects of all statements.
    pub fn touched_nodes(&self) -> BTreeSet<Term> {
        let mut nodes = BTreeSet::new();
        for st in &self.statements {
            nodes.insert(st.subject.clone());
            nodes.insert(st.object.clone());
        }
        nodes
    }
}

impl FromIterator<Statement> for ChangeSet {
    fn from_iter<I: IntoIterator<Item = Statement>>(iter: I) -> Self {
        let mut set = ChangeSet::new();
        for st in iter {
            set.insert(st);
        }
        set
    }
}

impl StatementSource for ChangeSet {
    fn statements(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>, StoreError> {
        self.scans.record();
        let found: Vec<Statement> = self.matching(pattern).cloned().collect();
        Ok(Box::new(found.into_iter()))
    }

    fn statements_batch(
        &self,
        patterns: &[StatementPattern],
    ) -> Result<StatementIter<'_>, StoreError> {
        self.scans.record();
        let found = dedup_batch(
            patterns
                .iter()
                .flat_map(|p| self.matching(p).cloned().collect::<Vec<_>>()),
        );
        Ok(Box::new(found.into_iter()))
    }

    fn contains(&self, statement: &Statement) -> Result<bool, StoreError> {
        Ok(self.has(statement))
    }

    fn scan_count(&self) -> u64 {
        self.scans.get()
    }
}

// ============================================================================
// Pending changes
// ============================================================================

/// A transaction's buffered mutations.
///
/// Adding a statement that is pending removal cancels the removal (and vice
/// versa); adding a statement already present in the base, or removing one
/// that is absent, is a no-op. After any sequence of calls `added` and
/// `removed` are disjoint, `added` holds nothing the base already has and
/// `removed` holds only base statements.
#[derive(Debug, Default, Clone)]
pub struct PendingChanges {
    added: ChangeSet,
    removed: ChangeSet,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the buffer changed.
    pub fn add(
        &mut self,
        statement: Statement,
        base: &dyn StatementSource,
    ) -> Result<bool, StoreError> {
        if self.removed.remove(&statement) {
            return Ok(true);
        }
        if self.added.has(&statement) || base.contains(&statement)? {
            return Ok(false);
        }
        Ok(self.added.insert(statement))
    }

    /// Returns whether the buffer changed.
    pub fn remove(
        &mut self,
        statement: &Statement,
        base: &dyn StatementSource,
    ) -> Result<bool, StoreError> {
        if self.added.remove(statement) {
            return Ok(true);
        }
        if self.removed.has(statement) || !base.contains(statement)? {
            return Ok(false);
        }
        Ok(self.removed.insert(statement.clone()))
    }

    pub fn added(&self) -> &ChangeSet {
        &self.added
    }

    pub fn removed(&self) -> &ChangeSet {
        &self.removed
    }

    /// Total number of buffered mutations.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn clear(&mut self) {
        self.added = ChangeSet::new();
        self.removed = ChangeSet::new();
    }

    pub fn into_parts(self) -> (ChangeSet, ChangeSet) {
        (self.added, self.removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn st(s: u8, o: u8) -> Statement {
        Statement::new(
            Term::iri(&format!("http://example.org/n{s}")),
            "http://example.org/p",
            Term::iri(&format!("http://example.org/n{o}")),
        )
    }

    #[test]
    fn test_add_then_remove_cancels() {
        let store = Arc::new(MemoryStore::new());
        let base = store.snapshot();
        let mut pending = PendingChanges::new();
        assert!(pending.add(st(1, 2), &base).unwrap());
        assert!(pending.remove(&st(1, 2), &base).unwrap());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_noop_mutations_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.insert_all([st(1, 2)]);
        let base = store.snapshot();
        let mut pending = PendingChanges::new();
        assert!(!pending.add(st(1, 2), &base).unwrap());
        assert!(!pending.remove(&st(3, 4), &base).unwrap());
        assert!(pending.remove(&st(1, 2), &base).unwrap());
        assert!(pending.add(st(1, 2), &base).unwrap());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_matching_uses_indexes() {
        let set: ChangeSet = [st(1, 2), st(1, 3), st(2, 3)].into_iter().collect();
        let pattern = StatementPattern::any().with_subject(Term::iri("http://example.org/n1"));
        assert_eq!(set.matching(&pattern).count(), 2);
        let pattern = StatementPattern::any().with_object(Term::iri("http://example.org/n3"));
        assert_eq!(set.matching(&pattern).count(), 2);
        let pattern = StatementPattern::any().with_subject(Term::iri("http://example.org/n9"));
        assert_eq!(set.matching(&pattern).count(), 0);
        assert_eq!(set.touched_nodes().len(), 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_pending_changes_stay_disjoint(
            initial in proptest::collection::vec((0u8..4, 0u8..4), 0..6),
            ops in proptest::collection::vec((any::<bool>(), 0u8..4, 0u8..4), 0..24),
        ) {
            let store = Arc::new(MemoryStore::new());
            store.insert_all(initial.iter().map(|&(s, o)| st(s, o)));
            let base = store.snapshot();
            let mut pending = PendingChanges::new();
            for (add, s, o) in ops {
                if add {
                    pending.add(st(s, o), &base).unwrap();
                } else {
                    pending.remove(&st(s, o), &base).unwrap();
                }
            }
            for a in pending.added().iter() {
                prop_assert!(!pending.removed().has(a));
                prop_assert!(!base.contains(a).unwrap());
            }
            for r in pending.removed().iter() {
                prop_assert!(base.contains(r).unwrap());
            }
        }
    }
}
