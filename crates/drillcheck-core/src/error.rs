//! Error types shared across drillcheck crates.
//!
//! Evaluation, identifier resolution and comparison never fail: they report
//! through their result types. These errors cover the boundaries around them:
//! malformed content, strict identifier checks, and execution collaborators.
//! `ExecutionError` lives here so the grading engine can downcast and classify
//! collaborator failures without string matching.

use thiserror::Error;

/// Content rejected by a validated constructor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A table or column name is empty or not a plain SQL identifier.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// A table declares the same column twice.
    #[error("duplicate column '{column}' in table '{table}'")]
    DuplicateColumn { table: String, column: String },

    /// A table declares no columns.
    #[error("table '{0}' has no columns")]
    EmptyTable(String),

    /// Rubric weights are negative, non-finite or all zero.
    #[error("invalid rubric weights: {0}")]
    InvalidWeights(String),

    /// An unknown difficulty label.
    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),

    /// A stored evaluation result violates its invariants.
    #[error("malformed evaluation result: {0}")]
    MalformedResult(String),
}

/// Strict identifier validation found issues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SqlValidationError {
    #[error("{} identifier issue(s): {}", .0.len(), .0.join("; "))]
    UnresolvedIdentifiers(Vec<String>),
}

/// Failures reported by SQL and Python execution collaborators.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The submitted statement or script could not be parsed.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The submission ran and raised an error.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// The submission was rejected before running.
    #[error("forbidden construct: {0}")]
    Forbidden(String),

    /// The run exceeded its time budget.
    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    /// The interpreter could not be found or started.
    #[error("interpreter unavailable: {0}")]
    Unavailable(String),
}

impl ExecutionError {
    /// Returns `true` if the failure is caused by the submission itself
    /// rather than by the environment it runs in.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ExecutionError::Syntax(_)
                | ExecutionError::Runtime(_)
                | ExecutionError::Forbidden(_)
                | ExecutionError::Timeout(_)
        )
    }
}
