//! Shapegate store: the statement sources validation reads from.
//!
//! - [`MemoryStore`]: interned, bitmap-indexed quads with multi-version
//!   concurrency control. Every commit produces a new version; a
//!   [`Snapshot`] pins one version and keeps reading it while later commits
//!   land.
//! - [`ChangeSet`]: an ordered, indexed set of statements (a transaction's
//!   added or removed statements).
//! - [`PendingChanges`]: transaction-local add/remove buffering.
//! - [`OverlayView`]: `base + added - removed`, the graph as it will look
//!   after commit.
//!
//! All of them implement [`StatementSource`], the only interface the
//! validator depends on. Every source counts its scans so callers can check
//! how often the store was actually touched.

mod changes;
mod interner;
mod memory;
mod overlay;

pub use changes::{ChangeSet, PendingChanges};
pub use interner::{TermId, TermInterner};
pub use memory::{CommitGuard, ConflictCheck, MemoryStore, Snapshot, StoreStats};
pub use overlay::OverlayView;

use shapegate_model::{ContextFilter, Statement, StatementPattern};
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// Errors
// ============================================================================

/// Every variant means the caller read a view the store can no longer honor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The snapshot's version was compacted away.
    #[error("snapshot at version {version} is no longer readable (oldest readable version is {horizon})")]
    SnapshotExpired { version: u64, horizon: u64 },

    /// Another transaction committed a change to the same statement after
    /// this transaction's snapshot was taken.
    #[error("concurrent modification of {statement} (read version {read_version}, conflicting version {conflicting_version})")]
    WriteConflict {
        statement: String,
        read_version: u64,
        conflicting_version: u64,
    },
}

// ============================================================================
// Statement sources
// ============================================================================

pub type StatementIter<'a> = Box<dyn Iterator<Item = Statement> + Send + 'a>;

/// Read access to a set of statements.
pub trait StatementSource: Send + Sync {
    /// Statements matching `pattern`. One call is one scan.
    fn statements(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>, StoreError>;

    /// Statements matching any of `patterns`, fetched as a single scan.
    ///
    /// Joins use this to look up a whole batch of bindings at once.
    fn statements_batch(
        &self,
        patterns: &[StatementPattern],
    ) -> Result<StatementIter<'_>, StoreError>;

    fn contains(&self, statement: &Statement) -> Result<bool, StoreError> {
        let pattern = StatementPattern::new(
            Some(statement.subject.clone()),
            Some(statement.predicate.clone()),
            Some(statement.object.clone()),
        )
        .in_contexts(ContextFilter::Only(vec![statement.context.clone()]));
        Ok(self.statements(&pattern)?.next().is_some())
    }

    /// Number of scans served so far.
    fn scan_count(&self) -> u64;
}

/// Scan instrumentation shared by all sources.
#[derive(Debug, Default)]
pub struct ScanCounter(AtomicU64);

impl ScanCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Collects the distinct statements matching any pattern, in first-seen order.
pub(crate) fn dedup_batch(statements: impl Iterator<Item = Statement>) -> Vec<Statement> {
    let mut seen = ahash::AHashSet::new();
    statements.filter(|st| seen.insert(st.clone())).collect()
}
