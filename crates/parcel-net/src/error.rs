use thiserror::Error;

/// Failures reported by the messaging library and the transport façade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The credential was rejected. Never retried with the same credential.
    #[error("Session expired or revoked")]
    AuthExpired,

    #[error("No storage destination selected")]
    NoDestination,

    #[error("Could not resolve destination: {0}")]
    Resolution(String),

    /// Rejected before any network call.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Remote record not found: {0}")]
    NotFound(String),

    #[error("Transfer cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TransportError>;
