//! # Shapegate SHACL
//!
//! Transactional SHACL validation over a [`shapegate_store::MemoryStore`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ShaclStore / Transaction                  │
//! │        (buffering, approach selection, isolation)           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                         Validator                           │
//! │      (incremental / bulk focus plans, bulk fallback)        │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │     Constraint components    │        Shapes + paths        │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │   Plan nodes (select, join, filter, group, union, cache)    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ConnectionsGroup (added / removed / base / current views)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shapegate_shacl::{ShaclConfig, ShaclStore, TransactionSettings};
//!
//! let store = ShaclStore::new(ShaclConfig::default());
//! store.load_shapes(shapes)?;
//!
//! let mut tx = store.begin(TransactionSettings::default())?;
//! tx.add(statement)?;
//! match tx.commit() {
//!     Ok(report) => println!("committed, {} warning(s)", report.len()),
//!     Err(e) => match e.report() {
//!         Some(report) => println!("{report}"),
//!         None => return Err(e.into()),
//!     },
//! }
//! ```

pub mod config;
pub mod connections;
pub mod constraints;
pub mod error;
pub mod graph;
pub mod matcher;
pub mod path;
pub mod plan;
pub mod query;
pub mod reasoner;
pub mod report;
pub mod sail;
pub mod shape;
pub mod tuple;
pub mod validator;

#[cfg(test)]
mod testing;

pub use config::{IsolationLevel, ShaclConfig, TransactionSettings, ValidationApproach};
pub use connections::{ConnectionsGroup, GroupOptions};
pub use error::{Result, ShaclError};
pub use matcher::{Slot, StatementMatcher, Variable};
pub use path::Path;
pub use plan::{PlanNode, PlanRef, View};
pub use query::{Bindings, PatternQueryEngine, QueryEngine, QueryError};
pub use report::{ValidationReport, ValidationResult};
pub use sail::{ShaclStore, Transaction, TransactionState, ValidationStats};
pub use shape::{Severity, Shape, ShapeKind, ShapeSet, Target};
pub use tuple::{Scope, ValidationTuple};
pub use validator::{ValidationMode, Validator};
