use thiserror::Error;

use parcel_net::TransportError;
use parcel_store::StoreError;

use crate::drive::BatchReport;

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Session expired, sign in again")]
    AuthExpired,

    #[error("Could not resolve destination: {0}")]
    Resolution(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{} of {} remote deletions failed", .0.failures.len(), .0.attempted())]
    PartialBatchFailure(BatchReport),

    #[error("Cancelled")]
    Cancelled,

    #[error("Local index error: {0}")]
    Index(#[source] StoreError),
}

impl From<StoreError> for DriveError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::FolderNotFound(path) => DriveError::NotFound(format!("folder {path}")),
            StoreError::FolderExists(path) => {
                DriveError::Validation(format!("folder {path} already exists"))
            }
            StoreError::InvalidFolderName(name) => {
                DriveError::Validation(format!("invalid folder name {name:?}"))
            }
            StoreError::Invariant(v) => DriveError::Validation(v.to_string()),
            other => DriveError::Index(other),
        }
    }
}

impl From<TransportError> for DriveError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::AuthExpired => DriveError::AuthExpired,
            TransportError::NoDestination => {
                DriveError::Resolution("no storage destination selected".into())
            }
            TransportError::Resolution(m) => DriveError::Resolution(m),
            TransportError::Validation(m) => DriveError::Validation(m),
            TransportError::Transfer(m) => DriveError::Transfer(m),
            TransportError::NotFound(m) => DriveError::NotFound(m),
            TransportError::Cancelled => DriveError::Cancelled,
        }
    }
}

impl DriveError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, DriveError::AuthExpired)
    }
}

pub type Result<T> = std::result::Result<T, DriveError>;
