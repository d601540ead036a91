//! The validating store and its transactions.
//!
//! A [`ShaclStore`] wraps a data [`MemoryStore`] and a separate store for
//! the shapes graph. Writes go through a [`Transaction`], which buffers them
//! and validates at commit:
//!
//! ```text
//! Idle ──begin──▶ Collecting ──commit──▶ Validating ──▶ Committed
//!                     │                       │
//!                     └──rollback──┐          └──violation / error──┐
//!                                  ▼                                ▼
//!                              RolledBack ◀────────────────────────┘
//! ```
//!
//! Statements in the shapes-graph context (see
//! [`vocab::shapegate::SHAPES_GRAPH`]) change the shapes. Commit reparses
//! them and validates all data in bulk against the new shapes.

use crate::config::{IsolationLevel, ShaclConfig, TransactionSettings, ValidationApproach};
use crate::connections::{ConnectionsGroup, GroupOptions};
use crate::error::{Result, ShaclError};
use crate::query::{PatternQueryEngine, QueryEngine};
use crate::reasoner::SubClassReasoner;
use crate::report::ValidationReport;
use crate::shape::ShapeSet;
use crate::validator::{ValidationMode, Validator};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use shapegate_model::{vocab, Statement, StatementPattern, Term};
use shapegate_store::{
    ChangeSet, ConflictCheck, MemoryStore, OverlayView, PendingChanges, Snapshot, StatementSource,
    StoreError,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the last validation run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationStats {
    pub mode: ValidationMode,
    pub shapes: usize,
    pub fallbacks: usize,
    pub results: usize,
    pub changed_statements: usize,
    pub cache_entries: usize,
    /// Scans served by the post-commit view.
    pub scans: u64,
    pub open_iterators: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Collecting,
    Validating,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionState::Idle => "idle",
            TransactionState::Collecting => "collecting",
            TransactionState::Validating => "validating",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        }
    }
}

struct ValidationRequest<'r> {
    base: Arc<dyn StatementSource>,
    added: Arc<ChangeSet>,
    removed: Arc<ChangeSet>,
    shapes: &'r ShapeSet,
    mode: ValidationMode,
    parallel: bool,
    cache: bool,
}

pub struct ShaclStore {
    data: Arc<MemoryStore>,
    shapes_graph: Arc<MemoryStore>,
    shapes: RwLock<Arc<ShapeSet>>,
    generation: AtomicU64,
    config: ShaclConfig,
    query_engine: Arc<dyn QueryEngine>,
    validation_enabled: AtomicBool,
    /// Exclusive for transactions that change shapes, shared for the rest,
    /// from reading the shapes until the commit has landed.
    shapes_lock: RwLock<()>,
    last_stats: Mutex<Option<ValidationStats>>,
}

impl ShaclStore {
    pub fn new(config: ShaclConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    pub fn with_store(data: Arc<MemoryStore>, config: ShaclConfig) -> Self {
        Self {
            data,
            shapes_graph: Arc::new(MemoryStore::new()),
            shapes: RwLock::new(Arc::new(ShapeSet::empty())),
            generation: AtomicU64::new(0),
            validation_enabled: AtomicBool::new(config.validation_enabled),
            config,
            query_engine: Arc::new(PatternQueryEngine::new()),
            shapes_lock: RwLock::new(()),
            last_stats: Mutex::new(None),
        }
    }

    pub fn with_query_engine(mut self, engine: Arc<dyn QueryEngine>) -> Self {
        self.query_engine = engine;
        self
    }

    pub fn data(&self) -> &Arc<MemoryStore> {
        &self.data
    }

    pub fn shapes_graph(&self) -> &Arc<MemoryStore> {
        &self.shapes_graph
    }

    pub fn shapes(&self) -> Arc<ShapeSet> {
        self.shapes.read().clone()
    }

    pub fn config(&self) -> &ShaclConfig {
        &self.config
    }

    /// Adds `statements` to the shapes graph in a transaction of its own and
    /// validates the existing data against the result.
    pub fn load_shapes(&self, statements: impl IntoIterator<Item = Statement>) -> Result<ValidationReport> {
        let mut tx = self.begin(TransactionSettings::default())?;
        for st in statements {
            tx.add(st.in_context(Term::iri(vocab::shapegate::SHAPES_GRAPH)))?;
        }
        tx.commit()
    }

    pub fn begin(&self, settings: TransactionSettings) -> Result<Transaction<'_>> {
        let mut tx = Transaction {
            store: self,
            settings,
            state: TransactionState::Idle,
            snapshot: self.data.snapshot(),
            shapes_snapshot: self.shapes_graph.snapshot(),
            data: PendingChanges::new(),
            shapes: PendingChanges::new(),
        };
        tx.state = TransactionState::Collecting;
        tracing::trace!(
            isolation = settings.isolation.as_str(),
            version = tx.snapshot.version(),
            "transaction started"
        );
        Ok(tx)
    }

    pub fn disable_validation(&self) {
        self.validation_enabled.store(false, Ordering::SeqCst);
        tracing::debug!("validation disabled");
    }

    pub fn enable_validation(&self) {
        self.validation_enabled.store(true, Ordering::SeqCst);
        tracing::debug!("validation enabled");
    }

    pub fn is_validation_enabled(&self) -> bool {
        self.validation_enabled.load(Ordering::SeqCst)
    }

    /// Validates the latest committed data against every shape.
    pub fn revalidate(&self) -> Result<ValidationReport> {
        let shapes = self.shapes();
        let base: Arc<dyn StatementSource> = Arc::new(self.data.snapshot());
        self.run_validation(ValidationRequest {
            base,
            added: Arc::new(ChangeSet::new()),
            removed: Arc::new(ChangeSet::new()),
            shapes: &shapes,
            mode: ValidationMode::Bulk,
            parallel: self.config.parallel_validation,
            cache: self.config.cache_select_nodes,
        })
    }

    pub fn last_validation_stats(&self) -> Option<ValidationStats> {
        self.last_stats.lock().clone()
    }

    fn run_validation(&self, request: ValidationRequest<'_>) -> Result<ValidationReport> {
        let started = Instant::now();
        let config = &self.config;
        let options = GroupOptions {
            cache_enabled: request.cache,
            join_batch_size: config.join_batch_size.max(1),
            subclass_reasoning: config.rdfs_subclass_reasoning,
            log_plans: config.log_validation_plans,
        };
        let cx = ConnectionsGroup::new(
            request.base,
            request.added,
            request.removed,
            self.query_engine.clone(),
            options,
        )?;
        let query_approach = config.sparql_validation_approach_limit > 0
            && cx.change_count() < config.sparql_validation_approach_limit;

        let outcome = Validator::new(&cx, request.mode)
            .with_query_approach(query_approach)
            .run(request.shapes.effective(), request.parallel)?;
        let report = ValidationReport::from_results(
            outcome.results,
            config.validation_results_limit_total,
            config.validation_results_limit_per_constraint,
        );

        let stats = ValidationStats {
            mode: request.mode,
            shapes: request.shapes.effective().len(),
            fallbacks: outcome.fallbacks,
            results: report.len(),
            changed_statements: cx.change_count(),
            cache_entries: cx.cache_len(),
            scans: cx.view(crate::plan::View::Current).scan_count(),
            open_iterators: cx.open_iterators(),
            elapsed: started.elapsed(),
        };
        if config.performance_logging {
            tracing::info!(
                mode = ?stats.mode,
                shapes = stats.shapes,
                fallbacks = stats.fallbacks,
                results = stats.results,
                changed = stats.changed_statements,
                cache_entries = stats.cache_entries,
                scans = stats.scans,
                elapsed_ms = stats.elapsed.as_millis() as u64,
                "validation finished"
            );
        }
        if config.log_validation_violations {
            for result in &report.results {
                tracing::info!(%result, "validation result");
            }
        }
        *self.last_stats.lock() = Some(stats);
        Ok(report)
    }

    fn install_shapes(&self, shapes: ShapeSet) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, shapes = shapes.len(), "shapes reloaded");
        *self.shapes.write() = Arc::new(shapes.with_generation(generation));
    }
}

impl std::fmt::Debug for ShaclStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaclStore")
            .field("version", &self.data.version())
            .field("shapes", &self.shapes.read().len())
            .field("validation_enabled", &self.is_validation_enabled())
            .finish()
    }
}

fn is_shapes_statement(statement: &Statement) -> bool {
    matches!(&statement.context, Some(Term::Iri(iri)) if iri.as_str() == vocab::shapegate::SHAPES_GRAPH)
}

fn overlay(base: Snapshot, changes: &PendingChanges) -> OverlayView {
    OverlayView::new(
        Arc::new(base),
        Arc::new(changes.added().clone()),
        Arc::new(changes.removed().clone()),
    )
}

/// `changes` re-expressed against a newer base.
fn rebase(changes: &PendingChanges, base: &dyn StatementSource) -> std::result::Result<PendingChanges, StoreError> {
    let mut rebased = PendingChanges::new();
    for st in changes.removed().iter() {
        rebased.remove(st, base)?;
    }
    for st in changes.added().iter() {
        rebased.add(st.clone(), base)?;
    }
    Ok(rebased)
}

/// A unit of buffered writes, validated as a whole at commit.
pub struct Transaction<'s> {
    store: &'s ShaclStore,
    settings: TransactionSettings,
    state: TransactionState,
    snapshot: Snapshot,
    shapes_snapshot: Snapshot,
    data: PendingChanges,
    shapes: PendingChanges,
}

impl<'s> Transaction<'s> {
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn settings(&self) -> TransactionSettings {
        self.settings
    }

    /// Number of buffered data and shape changes.
    pub fn pending(&self) -> usize {
        self.data.len() + self.shapes.len()
    }

    fn expect_collecting(&self) -> Result<()> {
        if self.state == TransactionState::Collecting {
            Ok(())
        } else {
            Err(ShaclError::InvalidState {
                expected: TransactionState::Collecting.as_str(),
                found: self.state.as_str(),
            })
        }
    }

    /// The committed state reads resolve against.
    fn read_base(&self) -> Snapshot {
        match self.settings.isolation {
            IsolationLevel::None => self.store.data.snapshot(),
            IsolationLevel::Snapshot | IsolationLevel::Serializable => self.snapshot.clone(),
        }
    }

    /// Returns whether the statement was not already present.
    pub fn add(&mut self, statement: Statement) -> Result<bool> {
        self.expect_collecting()?;
        if is_shapes_statement(&statement) {
            Ok(self.shapes.add(statement, &self.shapes_snapshot)?)
        } else {
            let base = self.read_base();
            Ok(self.data.add(statement, &base)?)
        }
    }

    /// Returns whether the statement was present.
    pub fn remove(&mut self, statement: &Statement) -> Result<bool> {
        self.expect_collecting()?;
        if is_shapes_statement(statement) {
            Ok(self.shapes.remove(statement, &self.shapes_snapshot)?)
        } else {
            let base = self.read_base();
            Ok(self.data.remove(statement, &base)?)
        }
    }

    /// Removes every statement matching `pattern` as this transaction sees
    /// it. Returns how many were removed.
    pub fn remove_matching(&mut self, pattern: &StatementPattern) -> Result<usize> {
        self.expect_collecting()?;
        let mut matched = self.statements(pattern)?;
        let shapes_view = overlay(self.shapes_snapshot.clone(), &self.shapes);
        matched.extend(shapes_view.statements(pattern)?);
        let mut removed = 0;
        for st in &matched {
            if self.remove(st)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Data statements matching `pattern`, including this transaction's own
    /// writes.
    pub fn statements(&self, pattern: &StatementPattern) -> Result<Vec<Statement>> {
        let view = overlay(self.read_base(), &self.data);
        let found = view.statements(pattern)?.collect();
        Ok(found)
    }

    /// Validates the transaction's pending state against every shape in
    /// bulk, without committing.
    pub fn revalidate(&mut self) -> Result<ValidationReport> {
        self.expect_collecting()?;
        let shapes = self.pending_shapes()?;
        let store = self.store;
        store.run_validation(ValidationRequest {
            base: Arc::new(self.read_base()),
            added: Arc::new(self.data.added().clone()),
            removed: Arc::new(self.data.removed().clone()),
            shapes: &shapes,
            mode: ValidationMode::Bulk,
            parallel: self.parallel(),
            cache: self.cache(),
        })
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.expect_collecting()?;
        self.data.clear();
        self.shapes.clear();
        self.state = TransactionState::RolledBack;
        tracing::trace!("transaction rolled back");
        Ok(())
    }

    /// Validates and applies the buffered changes.
    ///
    /// `Ok` carries the report (conforming, possibly with warnings). A
    /// violation yields [`ShaclError::ValidationFailed`]; either way of
    /// failing leaves the store untouched.
    pub fn commit(&mut self) -> Result<ValidationReport> {
        self.expect_collecting()?;
        self.state = TransactionState::Validating;
        let outcome = self.validate_and_apply();
        match &outcome {
            Ok(_) => self.state = TransactionState::Committed,
            Err(ShaclError::ValidationFailed(report)) => {
                tracing::debug!(violations = report.violation_count(), "transaction rejected");
                self.state = TransactionState::RolledBack;
            }
            Err(e) => {
                tracing::warn!(error = %e, "validation failed, rolling back");
                self.state = TransactionState::RolledBack;
            }
        }
        outcome
    }

    fn parallel(&self) -> bool {
        self.settings
            .parallel
            .unwrap_or(self.store.config.parallel_validation)
    }

    fn cache(&self) -> bool {
        self.settings
            .cache
            .unwrap_or(self.store.config.cache_select_nodes)
    }

    /// Shapes as they will be after commit.
    fn pending_shapes(&self) -> Result<Arc<ShapeSet>> {
        if self.shapes.is_empty() {
            return Ok(self.store.shapes());
        }
        let view = overlay(self.shapes_snapshot.clone(), &self.shapes);
        let parsed = ShapeSet::parse(&view)?;
        for (shape, constraint) in parsed.sparql_constraints() {
            self.store
                .query_engine
                .prepare(&constraint.select)
                .map_err(|e| ShaclError::malformed_shape(shape, format!("sh:select: {e}")))?;
        }
        Ok(Arc::new(parsed))
    }

    fn select_mode(&self, shapes_changed: bool, changes: &PendingChanges) -> ValidationMode {
        let config = &self.store.config;
        if shapes_changed {
            tracing::debug!("shapes changed, validating in bulk");
            return ValidationMode::Bulk;
        }
        if self.settings.approach == ValidationApproach::Bulk {
            return ValidationMode::Bulk;
        }
        if changes.len() > config.transactional_validation_limit {
            tracing::debug!(
                changes = changes.len(),
                limit = config.transactional_validation_limit,
                "transaction exceeds the incremental limit, validating in bulk"
            );
            return ValidationMode::Bulk;
        }
        if config.rdfs_subclass_reasoning
            && (SubClassReasoner::affected_by(changes.added())
                || SubClassReasoner::affected_by(changes.removed()))
        {
            tracing::debug!("class hierarchy changed, validating in bulk");
            return ValidationMode::Bulk;
        }
        ValidationMode::Incremental
    }

    fn validate(
        &self,
        base: Snapshot,
        changes: &PendingChanges,
        shapes: &ShapeSet,
        mode: ValidationMode,
    ) -> Result<ValidationReport> {
        self.store.run_validation(ValidationRequest {
            base: Arc::new(base),
            added: Arc::new(changes.added().clone()),
            removed: Arc::new(changes.removed().clone()),
            shapes,
            mode,
            parallel: self.parallel(),
            cache: self.cache(),
        })
    }

    fn validate_and_apply(&mut self) -> Result<ValidationReport> {
        let store = self.store;
        let shapes_changed = !self.shapes.is_empty();
        // No data commit lands between a shape change's validation and its
        // install.
        let (_exclusive, _shared) = if shapes_changed {
            (Some(store.shapes_lock.write()), None)
        } else {
            (None, Some(store.shapes_lock.read()))
        };
        if shapes_changed && store.shapes_graph.version() != self.shapes_snapshot.version() {
            return Err(StoreError::WriteConflict {
                statement: vocab::shapegate::SHAPES_GRAPH.to_string(),
                read_version: self.shapes_snapshot.version(),
                conflicting_version: store.shapes_graph.version(),
            }
            .into());
        }
        let shapes = self.pending_shapes()?;

        let validate = store.is_validation_enabled()
            && self.settings.approach != ValidationApproach::Disabled
            && (shapes_changed || !self.data.is_empty());
        if !validate {
            tracing::debug!(
                enabled = store.is_validation_enabled(),
                approach = ?self.settings.approach,
                "committing without validation"
            );
        }
        let mode = self.select_mode(shapes_changed, &self.data);

        let (rebased, read_version, report) = match self.settings.isolation {
            IsolationLevel::None => {
                let base = store.data.snapshot();
                let read_version = base.version();
                let report = if validate {
                    self.validate(base, &self.data, &shapes, mode)?
                } else {
                    ValidationReport::default()
                };
                if !report.conforms() {
                    return Err(ShaclError::ValidationFailed(Box::new(report)));
                }
                let guard = store.data.lock_commits();
                guard.commit(self.data.added(), self.data.removed(), read_version, ConflictCheck::None)?;
                (false, read_version, report)
            }
            IsolationLevel::Snapshot | IsolationLevel::Serializable => {
                let recheck = shapes_changed
                    || self.settings.isolation == IsolationLevel::Serializable
                    || store.config.serializable_validation;
                let read_version = self.snapshot.version();
                let mut report = if validate {
                    self.validate(self.snapshot.clone(), &self.data, &shapes, mode)?
                } else {
                    ValidationReport::default()
                };
                let guard = store.data.lock_commits();
                let mut rebased = false;
                if validate && recheck && store.data.version() != read_version {
                    // Others committed since `begin`: validate against what
                    // this commit will actually build on.
                    let latest = store.data.snapshot();
                    let changes = rebase(&self.data, &latest)?;
                    tracing::debug!(
                        read_version,
                        latest = latest.version(),
                        "store moved, revalidating against latest state"
                    );
                    report = self.validate(latest, &changes, &shapes, mode)?;
                    rebased = true;
                }
                if !report.conforms() {
                    return Err(ShaclError::ValidationFailed(Box::new(report)));
                }
                guard.commit(self.data.added(), self.data.removed(), read_version, ConflictCheck::WriteWrite)?;
                (rebased, read_version, report)
            }
        };
        tracing::trace!(
            read_version,
            rebased,
            results = report.len(),
            "data committed"
        );

        if shapes_changed {
            store.shapes_graph.commit(
                self.shapes.added(),
                self.shapes.removed(),
                self.shapes_snapshot.version(),
                ConflictCheck::WriteWrite,
            )?;
            store.install_shapes((*shapes).clone());
        }
        self.data.clear();
        self.shapes.clear();
        Ok(report)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Collecting && !self.data.is_empty() {
            tracing::debug!(pending = self.pending(), "transaction dropped without commit");
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("settings", &self.settings)
            .field("read_version", &self.snapshot.version())
            .field("pending", &self.pending())
            .finish()
    }
}
