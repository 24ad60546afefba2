//! Error and warning kinds produced while computing lineage

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Result type alias for lineage analysis
pub type LineageResult<T> = Result<T, LineageError>;

/// Conditions raised by the detector and the lineage resolver.
///
/// Some variants abort the analysis of a statement (`MalformedAst`,
/// `PositionalMismatch`, `DepthExceeded`, ...), others are attached to the
/// statement as warnings while the analysis carries on
/// (`AmbiguousReference`, `UnresolvedWildcard`, `DuplicateOutputName`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineageError {
    /// An expected child node is missing or has an unusable shape
    #[error("Malformed statement: {0}")]
    MalformedAst(String),

    /// An unqualified column matches more than one FROM binding
    #[error("Column '{column}' is ambiguous between {}", candidates.join(", "))]
    AmbiguousReference {
        column: String,
        candidates: Vec<String>,
    },

    /// A wildcard needs column metadata that is not available
    #[error("Cannot expand '{0}' without catalog information")]
    UnresolvedWildcard(String),

    /// INSERT column count differs from the SELECT output count
    #[error("INSERT lists {targets} columns but the query produces {outputs}")]
    PositionalMismatch { targets: usize, outputs: usize },

    /// A child scope exposes the same output name more than once
    #[error("Output column '{column}' appears more than once in scope {scope}, using the first")]
    DuplicateOutputName { column: String, scope: usize },

    /// Nesting went past the configured limit
    #[error("Nesting depth exceeds the limit of {0}")]
    DepthExceeded(usize),

    /// `exit_scope` was called with nothing on the stack
    #[error("Scope stack underflow")]
    ScopeUnderflow,

    /// A detector was asked to analyze a second statement without a reset
    #[error("Detector already holds a statement, call reset() first")]
    DetectorReused,

    /// Statement kind carries no column lineage we know how to compute
    #[error("Unsupported statement: {0}")]
    UnsupportedStatement(String),
}

impl LineageError {
    /// True for conditions that are reported but do not stop the analysis
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            LineageError::AmbiguousReference { .. }
                | LineageError::UnresolvedWildcard(_)
                | LineageError::DuplicateOutputName { .. }
        )
    }
}

impl Serialize for LineageError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
