//! Validation errors.

use crate::report::ValidationReport;
use shapegate_store::StoreError;

pub type Result<T> = std::result::Result<T, ShaclError>;

#[derive(Debug, thiserror::Error)]
pub enum ShaclError {
    /// A property path in the shapes graph could not be parsed.
    #[error("malformed path at {node}: {reason}")]
    MalformedPath { node: String, reason: String },

    /// A shape definition is invalid.
    #[error("malformed shape {shape}: {reason}")]
    MalformedShape { shape: String, reason: String },

    /// The path cannot be evaluated incrementally. Recovered by falling back
    /// to bulk validation of the shape.
    #[error("path {0} is not supported for incremental validation")]
    UnsupportedPath(String),

    /// A plan could not be built incrementally. Recovered like
    /// [`ShaclError::UnsupportedPath`].
    #[error("unsupported plan operation: {0}")]
    UnsupportedOperation(String),

    /// The transaction's view of the store became stale.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(#[from] StoreError),

    /// The transaction was rejected; the report lists every violation.
    #[error("validation failed with {} violation(s)", .0.violation_count())]
    ValidationFailed(Box<ValidationReport>),

    /// A constraint component failed while evaluating (for example a
    /// malformed SPARQL query).
    #[error("constraint {component} failed: {reason}")]
    ConstraintEvaluation { component: String, reason: String },

    /// The transaction API was used out of order.
    #[error("invalid transaction state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },
}

impl ShaclError {
    pub(crate) fn malformed_path(node: impl ToString, reason: impl Into<String>) -> Self {
        ShaclError::MalformedPath {
            node: node.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed_shape(shape: impl ToString, reason: impl Into<String>) -> Self {
        ShaclError::MalformedShape {
            shape: shape.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that make a shape fall back to bulk validation.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            ShaclError::UnsupportedPath(_) | ShaclError::UnsupportedOperation(_)
        )
    }

    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            ShaclError::ValidationFailed(report) => Some(report),
            _ => None,
        }
    }
}
