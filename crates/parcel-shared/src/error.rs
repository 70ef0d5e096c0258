use thiserror::Error;

/// A [`crate::StoredFile`] that breaks the model invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("live file {0} has no remote locator")]
    LiveWithoutLocator(String),

    #[error("file {0} is not trashed but carries a deletion timestamp")]
    DeletedAtWithoutTrash(String),

    #[error("invalid folder path: {0}")]
    FolderPath(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DestinationError {
    #[error("empty destination id")]
    Empty,

    #[error("destination id is not numeric: {0}")]
    NotNumeric(String),
}
