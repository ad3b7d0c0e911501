//! Error taxonomy for the object-store boundary
//!
//! Transient vs permanent is encoded in the variant, not the message:
//! the retry loop in the adapter matches on these variants directly.

use std::io;
use thiserror::Error;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors a storage client may surface to the adapter
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// Service-side error with the provider's diagnostic fields
    #[error("Storage service error: type {error_type}, code {code}: {message}, request id: {request_id}, extended request id: {extended_request_id}")]
    Service {
        error_type: String,
        code: String,
        message: String,
        request_id: String,
        extended_request_id: String,
    },

    /// Service rejected the request because the stage credentials expired
    #[error("Stage credentials expired")]
    ExpiredCredential,

    /// Client-side encryption key rejected (missing strong-crypto policy)
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    /// Object does not exist
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// Call interrupted before completion
    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    /// Socket or operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Local I/O failure while reading or writing transfer bodies
    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    /// Transient errors are retried with backoff until the outer budget
    /// is exhausted.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Service { .. })
    }

    /// Interrupted calls and timeouts are re-driven without backoff while
    /// budget remains.
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            StorageError::Interrupted(_) | StorageError::Timeout(_)
        )
    }

    pub fn is_expired_credential(&self) -> bool {
        matches!(self, StorageError::ExpiredCredential)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Build a service error carrying the wire-side error code; the
    /// expired-token code maps onto the dedicated variant.
    pub fn from_service_code(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: impl Into<String>,
        extended_request_id: impl Into<String>,
    ) -> Self {
        let code = code.into();
        if code.eq_ignore_ascii_case("ExpiredToken") {
            return StorageError::ExpiredCredential;
        }
        StorageError::Service {
            error_type: error_type.into(),
            code,
            message: message.into(),
            request_id: request_id.into(),
            extended_request_id: extended_request_id.into(),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => StorageError::Timeout(err.to_string()),
            io::ErrorKind::Interrupted => StorageError::Interrupted(err.to_string()),
            _ => StorageError::Io(err.to_string()),
        }
    }
}
