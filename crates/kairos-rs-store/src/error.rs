//! Error types for store operations.

/// Errors returned by the memory, history, and job stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Memory keys must contain a non-whitespace character.
    #[error("invalid memory key: key must not be empty")]
    InvalidKey,
    /// A job schedule was missing, doubled, or unparseable.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    /// A job field other than the schedule was invalid.
    #[error("invalid job: {0}")]
    InvalidJob(String),
    /// A job with this name already exists.
    #[error("duplicate job name: {0}")]
    DuplicateName(String),
    /// No job with this id exists.
    #[error("job not found: {0}")]
    JobNotFound(i64),
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// A persisted row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether this error rejects caller input rather than reporting a fault.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidKey
                | StoreError::InvalidSchedule(_)
                | StoreError::InvalidJob(_)
                | StoreError::DuplicateName(_)
        )
    }
}
