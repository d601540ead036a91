//! Multi-version in-memory quad store.
//!
//! Each quad record carries the version that created it and, once removed,
//! the version that deleted it. A reader at version `v` sees exactly the
//! records with `created <= v < deleted`. Commits are serialized through a
//! commit lock and publish a new version only after all of their records are
//! in place, so a snapshot never observes a partial commit.
//!
//! History is kept until [`MemoryStore::compact`] discards it; snapshots
//! older than the compaction horizon then fail with
//! [`StoreError::SnapshotExpired`].

use crate::{
    dedup_batch, ChangeSet, ScanCounter, StatementIter, StatementSource, StoreError, TermId,
    TermInterner,
};
use ahash::AHashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use roaring::RoaringBitmap;
use shapegate_model::{ContextFilter, Statement, StatementPattern, Term};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Quad {
    subject: TermId,
    predicate: TermId,
    object: TermId,
    context: Option<TermId>,
}

#[derive(Debug, Clone)]
struct QuadRecord {
    quad: Quad,
    created: u64,
    deleted: Option<u64>,
}

impl QuadRecord {
    fn visible_at(&self, version: u64) -> bool {
        self.created <= version && self.deleted.map_or(true, |d| d > version)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    records: Vec<QuadRecord>,
    /// Every record ever created for a quad, oldest first.
    history: AHashMap<Quad, Vec<u32>>,
    by_subject: AHashMap<TermId, RoaringBitmap>,
    by_predicate: AHashMap<TermId, RoaringBitmap>,
    by_object: AHashMap<TermId, RoaringBitmap>,
    /// Records not yet compacted away.
    retained: RoaringBitmap,
}

impl StoreState {
    fn live_record(&self, quad: &Quad) -> Option<u32> {
        self.history.get(quad).and_then(|ids| {
            ids.iter()
                .copied()
                .find(|&id| self.records[id as usize].deleted.is_none())
        })
    }

    fn push(&mut self, quad: Quad, version: u64) {
        let id = self.records.len() as u32;
        self.records.push(QuadRecord {
            quad,
            created: version,
            deleted: None,
        });
        self.history.entry(quad).or_default().push(id);
        self.by_subject.entry(quad.subject).or_default().insert(id);
        self.by_predicate.entry(quad.predicate).or_default().insert(id);
        self.by_object.entry(quad.object).or_default().insert(id);
        self.retained.insert(id);
    }

    fn forget(&mut self, id: u32) {
        let quad = self.records[id as usize].quad;
        for (index, key) in [
            (&mut self.by_subject, quad.subject),
            (&mut self.by_predicate, quad.predicate),
            (&mut self.by_object, quad.object),
        ] {
            if let Some(bitmap) = index.get_mut(&key) {
                bitmap.remove(id);
                if bitmap.is_empty() {
                    index.remove(&key);
                }
            }
        }
        if let Some(ids) = self.history.get_mut(&quad) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.history.remove(&quad);
            }
        }
        self.retained.remove(id);
    }
}

/// Whether a commit checks for write-write conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCheck {
    /// Last writer wins.
    None,
    /// Fail if any statement in the change set was added or removed by a
    /// commit newer than the transaction's read version.
    WriteWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub version: u64,
    pub horizon: u64,
    pub live_statements: usize,
    pub records: usize,
    pub terms: usize,
}

#[derive(Debug)]
pub struct MemoryStore {
    interner: TermInterner,
    state: RwLock<StoreState>,
    version: AtomicU64,
    horizon: AtomicU64,
    commit_lock: Mutex<()>,
    scans: ScanCounter,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            interner: TermInterner::new(),
            state: RwLock::new(StoreState::default()),
            version: AtomicU64::new(0),
            horizon: AtomicU64::new(0),
            commit_lock: Mutex::new(()),
            scans: ScanCounter::new(),
        }
    }

    /// Latest committed version.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Oldest version that can still be read.
    pub fn horizon(&self) -> u64 {
        self.horizon.load(Ordering::SeqCst)
    }

    /// Freeze the latest committed version.
    pub fn snapshot(self: &Arc<Self>) -> Snapshot {
        Snapshot {
            store: Arc::clone(self),
            version: self.version(),
            scans: Arc::new(ScanCounter::new()),
        }
    }

    pub fn snapshot_at(self: &Arc<Self>, version: u64) -> Result<Snapshot, StoreError> {
        let horizon = self.horizon();
        if version < horizon {
            return Err(StoreError::SnapshotExpired { version, horizon });
        }
        Ok(Snapshot {
            store: Arc::clone(self),
            version: version.min(self.version()),
            scans: Arc::new(ScanCounter::new()),
        })
    }

    /// Acquire the commit lock.
    ///
    /// Holding the guard keeps every other commit out, which lets a caller
    /// re-check the latest state and then commit against it atomically.
    pub fn lock_commits(&self) -> CommitGuard<'_> {
        CommitGuard {
            store: self,
            _guard: self.commit_lock.lock(),
        }
    }

    /// Apply `added` and `removed` atomically as a new version.
    pub fn commit(
        &self,
        added: &ChangeSet,
        removed: &ChangeSet,
        read_version: u64,
        check: ConflictCheck,
    ) -> Result<u64, StoreError> {
        self.lock_commits().commit(added, removed, read_version, check)
    }

    /// Convenience for loading data outside of a transaction.
    pub fn insert_all(&self, statements: impl IntoIterator<Item = Statement>) -> u64 {
        let mut added = ChangeSet::new();
        for st in statements {
            added.insert(st);
        }
        self.lock_commits().apply(&added, &ChangeSet::new())
    }

    /// Discard history that no reader at `keep_from` or later can observe.
    ///
    /// Returns the number of records dropped. Snapshots older than
    /// `keep_from` become unreadable.
    pub fn compact(&self, keep_from: u64) -> usize {
        let keep_from = keep_from.min(self.version());
        let mut state = self.state.write();
        let dead: Vec<u32> = state
            .retained
            .iter()
            .filter(|&id| {
                state.records[id as usize]
                    .deleted
                    .map_or(false, |d| d <= keep_from)
            })
            .collect();
        for &id in &dead {
            state.forget(id);
        }
        self.horizon.fetch_max(keep_from, Ordering::SeqCst);
        tracing::debug!(
            keep_from,
            dropped = dead.len(),
            "compacted store history"
        );
        dead.len()
    }

    pub fn len(&self) -> usize {
        let version = self.version();
        let state = self.state.read();
        state
            .retained
            .iter()
            .filter(|&id| state.records[id as usize].visible_at(version))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        let live_statements = self.len();
        let state = self.state.read();
        StoreStats {
            version: self.version(),
            horizon: self.horizon(),
            live_statements,
            records: state.retained.len() as usize,
            terms: self.interner.len(),
        }
    }

    fn quad_of(&self, statement: &Statement) -> Option<Quad> {
        Some(Quad {
            subject: self.interner.id_of(&statement.subject)?,
            predicate: self
                .interner
                .id_of(&Term::Iri(statement.predicate.clone()))?,
            object: self.interner.id_of(&statement.object)?,
            context: match &statement.context {
                Some(ctx) => Some(self.interner.id_of(ctx)?),
                None => None,
            },
        })
    }

    fn intern_quad(&self, statement: &Statement) -> Quad {
        Quad {
            subject: self.interner.intern(&statement.subject),
            predicate: self.interner.intern(&Term::Iri(statement.predicate.clone())),
            object: self.interner.intern(&statement.object),
            context: statement.context.as_ref().map(|c| self.interner.intern(c)),
        }
    }

    fn materialize(&self, quad: &Quad) -> Option<Statement> {
        let Term::Iri(predicate) = self.interner.resolve(quad.predicate)? else {
            return None;
        };
        Some(Statement {
            subject: self.interner.resolve(quad.subject)?,
            predicate,
            object: self.interner.resolve(quad.object)?,
            context: match quad.context {
                Some(ctx) => Some(self.interner.resolve(ctx)?),
                None => None,
            },
        })
    }

    pub(crate) fn scan_at(
        &self,
        version: u64,
        pattern: &StatementPattern,
    ) -> Result<Vec<Statement>, StoreError> {
        let horizon = self.horizon();
        if version < horizon {
            return Err(StoreError::SnapshotExpired { version, horizon });
        }

        let state = self.state.read();

        // Bound slots narrow the candidates; an unknown term matches nothing.
        let mut candidates: Option<RoaringBitmap> = None;
        let slots = [
            (pattern.subject.clone(), &state.by_subject),
            (pattern.predicate.clone().map(Term::Iri), &state.by_predicate),
            (pattern.object.clone(), &state.by_object),
        ];
        for (term, index) in slots {
            let Some(term) = term else { continue };
            let Some(bitmap) = self.interner.id_of(&term).and_then(|id| index.get(&id)) else {
                return Ok(Vec::new());
            };
            candidates = Some(match candidates {
                Some(acc) => acc & bitmap,
                None => bitmap.clone(),
            });
        }
        let candidates = candidates.unwrap_or_else(|| state.retained.clone());

        let graphs: Option<Vec<Option<TermId>>> = match &pattern.contexts {
            ContextFilter::Any => None,
            ContextFilter::Only(graphs) => Some(
                graphs
                    .iter()
                    .filter_map(|g| match g {
                        None => Some(None),
                        Some(term) => self.interner.id_of(term).map(Some),
                    })
                    .collect(),
            ),
        };
        if graphs.as_ref().is_some_and(|g| g.is_empty()) {
            return Ok(Vec::new());
        }

        Ok(candidates
            .iter()
            .map(|id| &state.records[id as usize])
            .filter(|record| record.visible_at(version))
            .filter(|record| {
                graphs
                    .as_ref()
                    .map_or(true, |g| g.contains(&record.quad.context))
            })
            .filter_map(|record| self.materialize(&record.quad))
            .collect())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementSource for MemoryStore {
    fn statements(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>, StoreError> {
        self.scans.record();
        Ok(Box::new(self.scan_at(self.version(), pattern)?.into_iter()))
    }

    fn statements_batch(
        &self,
        patterns: &[StatementPattern],
    ) -> Result<StatementIter<'_>, StoreError> {
        self.scans.record();
        let version = self.version();
        let mut out = Vec::new();
        for pattern in patterns {
            out.extend(self.scan_at(version, pattern)?);
        }
        Ok(Box::new(dedup_batch(out.into_iter()).into_iter()))
    }

    fn scan_count(&self) -> u64 {
        self.scans.get()
    }
}

/// Exclusive right to commit, see [`MemoryStore::lock_commits`].
pub struct CommitGuard<'a> {
    store: &'a MemoryStore,
    _guard: MutexGuard<'a, ()>,
}

impl CommitGuard<'_> {
    pub fn commit(
        &self,
        added: &ChangeSet,
        removed: &ChangeSet,
        read_version: u64,
        check: ConflictCheck,
    ) -> Result<u64, StoreError> {
        let store = self.store;
        let current = store.version();
        if added.is_empty() && removed.is_empty() {
            return Ok(current);
        }

        let mut state = store.state.write();

        if check == ConflictCheck::WriteWrite && current > read_version {
            let horizon = store.horizon();
            if read_version < horizon {
                return Err(StoreError::SnapshotExpired {
                    version: read_version,
                    horizon,
                });
            }
            for st in added.iter().chain(removed.iter()) {
                let Some(quad) = store.quad_of(st) else { continue };
                let Some(ids) = state.history.get(&quad) else { continue };
                let newest = ids
                    .iter()
                    .map(|&id| {
                        let record = &state.records[id as usize];
                        record.deleted.unwrap_or(0).max(record.created)
                    })
                    .max()
                    .unwrap_or(0);
                if newest > read_version {
                    return Err(StoreError::WriteConflict {
                        statement: st.to_string(),
                        read_version,
                        conflicting_version: newest,
                    });
                }
            }
        }

        Ok(self.apply_locked(&mut state, added, removed))
    }

    /// Apply without any conflict check. Cannot fail.
    pub fn apply(&self, added: &ChangeSet, removed: &ChangeSet) -> u64 {
        if added.is_empty() && removed.is_empty() {
            return self.store.version();
        }
        let mut state = self.store.state.write();
        self.apply_locked(&mut state, added, removed)
    }

    fn apply_locked(&self, state: &mut StoreState, added: &ChangeSet, removed: &ChangeSet) -> u64 {
        let store = self.store;
        let version = store.version() + 1;
        for st in removed.iter() {
            let Some(quad) = store.quad_of(st) else { continue };
            if let Some(id) = state.live_record(&quad) {
                state.records[id as usize].deleted = Some(version);
            }
        }
        for st in added.iter() {
            let quad = store.intern_quad(st);
            if state.live_record(&quad).is_none() {
                state.push(quad, version);
            }
        }

        store.version.store(version, Ordering::SeqCst);

        tracing::trace!(
            version,
            added = added.len(),
            removed = removed.len(),
            "committed change set"
        );
        version
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// A frozen version of a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct Snapshot {
    store: Arc<MemoryStore>,
    version: u64,
    scans: Arc<ScanCounter>,
}

impl Snapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl StatementSource for Snapshot {
    fn statements(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>, StoreError> {
        self.scans.record();
        Ok(Box::new(
            self.store.scan_at(self.version, pattern)?.into_iter(),
        ))
    }

    fn statements_batch(
        &self,
        patterns: &[StatementPattern],
    ) -> Result<StatementIter<'_>, StoreError> {
        self.scans.record();
        let mut out = Vec::new();
        for pattern in patterns {
            out.extend(self.store.scan_at(self.version, pattern)?);
        }
        Ok(Box::new(dedup_batch(out.into_iter()).into_iter()))
    }

    fn scan_count(&self) -> u64 {
        self.scans.get()
    }
}
