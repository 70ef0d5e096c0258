use parcel_shared::InvariantViolation;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Session file could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The record would break a model invariant.
    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    #[error("Folder already exists: {0}")]
    FolderExists(String),

    #[error("Invalid folder name: {0:?}")]
    InvalidFolderName(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
