//! The post-commit graph as seen from inside a transaction.

use crate::{dedup_batch, ChangeSet, ScanCounter, StatementIter, StatementSource, StoreError};
use shapegate_model::{Statement, StatementPattern};
use std::sync::Arc;

/// `base + added - removed`.
pub struct OverlayView {
    base: Arc<dyn StatementSource>,
    added: Arc<ChangeSet>,
    removed: Arc<ChangeSet>,
    scans: ScanCounter,
}

impl OverlayView {
    pub fn new(
        base: Arc<dyn StatementSource>,
        added: Arc<ChangeSet>,
        removed: Arc<ChangeSet>,
    ) -> Self {
        Self {
            base,
            added,
            removed,
            scans: ScanCounter::new(),
        }
    }

    fn overlay<'a>(
        &'a self,
        base: StatementIter<'a>,
        pattern: &StatementPattern,
    ) -> StatementIter<'a> {
        let added: Vec<Statement> = self.added.matching(pattern).cloned().collect();
        Box::new(
            base.filter(move |st| !self.removed.has(st) && !self.added.has(st))
                .chain(added),
        )
    }
}

impl StatementSource for OverlayView {
    fn statements(&self, pattern: &StatementPattern) -> Result<StatementIter<'_>, StoreError> {
        self.scans.record();
        let base = self.base.statements(pattern)?;
        Ok(self.overlay(base, pattern))
    }

    fn statements_batch(
        &self,
        patterns: &[StatementPattern],
    ) -> Result<StatementIter<'_>, StoreError> {
        self.scans.record();
        let base: Vec<Statement> = self
            .base
            .statements_batch(patterns)?
            .filter(|st| !self.removed.has(st) && !self.added.has(st))
            .collect();
        let added = patterns
            .iter()
            .flat_map(|p| self.added.matching(p).cloned().collect::<Vec<_>>());
        Ok(Box::new(
            dedup_batch(base.into_iter().chain(added)).into_iter(),
        ))
    }

    fn contains(&self, statement: &Statement) -> Result<bool, StoreError> {
        if self.added.has(statement) {
            return Ok(true);
        }
        if self.removed.has(statement) {
            return Ok(false);
        }
        self.base.contains(statement)
    }

    fn scan_count(&self) -> u64 {
        self.scans.get()
    }
}
