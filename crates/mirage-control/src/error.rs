//! Error type for the control server.

use mirage_core::db::DatabaseError;
use mirage_crypto::CryptoError;

/// Errors produced by control-plane operations.
///
/// The HTTP layer maps these to status codes or console envelopes; the
/// message of authentication failures is never shown to clients.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("storage: {0}")]
    Database(#[from] DatabaseError),

    #[error("channel: {0}")]
    Crypto(#[from] CryptoError),

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("key mismatch: {0}")]
    KeyMismatch(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),
}

impl ControlError {
    /// Collapse a storage `NotFound` into the control-level variant.
    pub fn from_lookup(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound(what) => Self::NotFound(what),
            other => Self::Database(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
