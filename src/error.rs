use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unreadable input: {0}")]
    InvalidInput(String),

    #[error("Unknown import type: {0}")]
    UnknownImportType(String),

    #[error("Unknown import: {0}")]
    UnknownImport(i64),

    #[error("Import {0} has already been committed")]
    AlreadyCommitted(i64),

    #[error("Import {id} cannot be committed: {reason}")]
    NotCommittable { id: i64, reason: String },

    #[error("No column defined for field position {0}")]
    MissingColumn(usize),

    #[error("Line is {len} bytes, limit is {limit}")]
    LineTooLong { len: usize, limit: usize },

    #[error("Commit verification failed after {attempts} attempts: expected {expected} rows, found {found}")]
    CommitVerification {
        attempts: u32,
        expected: usize,
        found: usize,
    },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FleetError>;
