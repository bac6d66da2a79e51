//! Common error types shared across crates.

use thiserror::Error;

use crate::protocol::ErrorResponse;

/// Top-level service error type.
///
/// Each variant carries a stable machine-readable code (see
/// [`ServiceError::code`]) so that whichever transport sits in front of the
/// codec can map failures without parsing messages.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The key store is unreachable or the key document is absent or malformed.
    #[error("config retrieval failure: {0}")]
    ConfigRetrievalFailure(String),

    /// The requested key id does not exist, even after a forced refresh.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Encryption failed in the crypto layer.
    #[error("encryption failure: {0}")]
    EncryptionFailure(String),

    /// Decryption or authentication failed, or the envelope was malformed.
    #[error("decryption failure: {0}")]
    DecryptionFailure(String),

    /// The operation is not supported by the configured key provider.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The request was malformed: invalid JSON or an unknown codec name.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Returns the machine-readable code used in [`ErrorResponse::code`].
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::ConfigRetrievalFailure(_) => "config_retrieval_failure",
            ServiceError::KeyNotFound(_) => "key_not_found",
            ServiceError::EncryptionFailure(_) => "encryption_failure",
            ServiceError::DecryptionFailure(_) => "decryption_failure",
            ServiceError::UnsupportedOperation(_) => "unsupported_operation",
            ServiceError::BadRequest(_) => "bad_request",
            ServiceError::Internal(_) => "internal_error",
        }
    }

    /// Build the error document for this error.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.code(), self.to_string())
    }
}
