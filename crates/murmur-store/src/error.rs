use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// The composite index backing ordered message queries is absent.  This
    /// is a schema/deployment problem, not a transient fault.
    #[error("Missing index for ordered query: {0}")]
    MissingIndex(String),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A document referenced by id does not exist.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON column (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A write was rejected because the document violates an invariant.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("Database lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_missing_index(&self) -> bool {
        matches!(self, StoreError::MissingIndex(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        let detail = e.to_string();
        if detail.contains("no such index") {
            StoreError::MissingIndex(detail)
        } else {
            StoreError::Sqlite(e)
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
