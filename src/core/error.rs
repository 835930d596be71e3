use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlackboardError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Dependency cycle rejected for '{path}': {}", cycle.join(" -> "))]
    CycleDetected { path: String, cycle: Vec<String> },
    #[error("Version control error: {0}")]
    VcsError(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl BlackboardError {
    /// Process exit status for the CLI. Not-found is distinguishable from other failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            BlackboardError::NotFound(_) => 2,
            _ => 1,
        }
    }
}
