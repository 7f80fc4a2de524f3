//! Error types for txfs.
//!
//! All operations return `Result<T>` which aliases `Result<T, TxError>`.

use crate::txn::TransactionId;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from transactional and direct file operations.
#[derive(Debug, Error)]
pub enum TxError {
    /// Destination exists and overwrite was not requested.
    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    /// A path the operation requires is missing.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Operation enlisted outside an active transaction.
    ///
    /// Indicates a programming error; never retried.
    #[error("Registration error: {0}")]
    Registration(String),

    /// One or more undo steps failed during rollback.
    #[error("Rollback failed: {0}")]
    RollbackFailed(FailureReport),

    /// Backup artifacts could not be removed after commit.
    #[error("Cleanup failed: {0}")]
    CleanupFailed(FailureReport),

    /// A participant vetoed the commit; all work was rolled back.
    #[error("Transaction {0} aborted")]
    Aborted(TransactionId),

    /// Several participants failed during a terminal callback.
    #[error("{}", join_errors(.0))]
    Participants(Vec<TxError>),

    /// Plan file is malformed or failed pre-flight checks.
    #[error("Invalid plan: {0}")]
    Plan(String),

    /// File system operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml_edit::TomlError),

    /// Unexpected error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TxError {
    /// Merges errors reported by several participants.
    ///
    /// Returns `None` when the list is empty and the error itself when it
    /// holds exactly one.
    pub fn merge(mut errors: Vec<TxError>) -> Option<TxError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(TxError::Participants(errors)),
        }
    }
}

fn join_errors(errors: &[TxError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single undo or cleanup step that failed.
#[derive(Debug)]
pub struct OperationFailure {
    /// Operation kind, e.g. `write-text`.
    pub operation: &'static str,
    /// Path the step was acting on.
    pub path: PathBuf,
    /// Underlying cause.
    pub error: std::io::Error,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.operation, self.path.display(), self.error)
    }
}

/// Failures accumulated over a full rollback or cleanup pass.
#[derive(Debug, Default)]
pub struct FailureReport(pub Vec<OperationFailure>);

impl FailureReport {
    pub fn push(&mut self, failure: OperationFailure) {
        self.0.push(failure);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationFailure> {
        self.0.iter()
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

/// Result type alias for txfs operations.
pub type Result<T> = std::result::Result<T, TxError>;
