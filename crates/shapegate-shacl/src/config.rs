//! Validator configuration.
//!
//! Every knob lives here and is handed to [`crate::ShaclStore`] at
//! construction; nothing is read from process-wide state.

use serde::{Deserialize, Serialize};

/// Store-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaclConfig {
    /// Validate shapes on a rayon pool instead of one after the other.
    pub parallel_validation: bool,
    /// Share the results of identical plan fragments across shapes.
    pub cache_select_nodes: bool,
    /// Expand `sh:targetClass` and `sh:class` through `rdfs:subClassOf`.
    pub rdfs_subclass_reasoning: bool,
    /// Re-verify `Snapshot` transactions against the latest committed state
    /// under the commit lock, as `Serializable` transactions always do.
    pub serializable_validation: bool,
    pub log_validation_plans: bool,
    pub log_validation_violations: bool,
    pub performance_logging: bool,
    /// Transactions with more changed statements than this are validated in
    /// bulk.
    pub transactional_validation_limit: usize,
    pub validation_results_limit_total: Option<usize>,
    pub validation_results_limit_per_constraint: Option<usize>,
    /// Transactions with fewer changed statements than this validate simple
    /// property constraints in bulk through the query engine. `0` disables
    /// the query approach.
    pub sparql_validation_approach_limit: usize,
    /// Upstream tuples buffered per store lookup in bulked joins.
    pub join_batch_size: usize,
    /// Initial state of the store-wide validation switch.
    pub validation_enabled: bool,
}

impl Default for ShaclConfig {
    fn default() -> Self {
        Self {
            parallel_validation: true,
            cache_select_nodes: true,
            rdfs_subclass_reasoning: true,
            serializable_validation: true,
            log_validation_plans: false,
            log_validation_violations: false,
            performance_logging: false,
            transactional_validation_limit: 500_000,
            validation_results_limit_total: None,
            validation_results_limit_per_constraint: None,
            sparql_validation_approach_limit: 0,
            join_batch_size: 512,
            validation_enabled: true,
        }
    }
}

impl ShaclConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Reads see the latest committed state at validation time.
    None,
    /// Reads see the state at `begin`.
    #[default]
    Snapshot,
    /// Like `Snapshot`, plus re-validation against the latest committed state
    /// before commit.
    Serializable,
}

impl IsolationLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            IsolationLevel::None => "none",
            IsolationLevel::Snapshot => "snapshot",
            IsolationLevel::Serializable => "serializable",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationApproach {
    /// Commit without validating.
    Disabled,
    /// Validate only what the transaction's changes can affect.
    #[default]
    Incremental,
    /// Validate every shape against the whole post-commit graph.
    Bulk,
}

/// Per-transaction settings. Unset hints fall back to the store config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSettings {
    pub isolation: IsolationLevel,
    pub approach: ValidationApproach,
    pub parallel: Option<bool>,
    pub cache: Option<bool>,
}

impl TransactionSettings {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            ..Self::default()
        }
    }

    pub fn with_approach(mut self, approach: ValidationApproach) -> Self {
        self.approach = approach;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }
}
