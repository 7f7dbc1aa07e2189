//! Error types and handling for portal-guard
//!
//! Every fallible operation in the crate returns [`Result`]. Validation-style
//! failures (bad CSRF token, unknown operation, bad input) are recoverable by
//! the caller and map to 4xx responses; everything else is internal.

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for portal-guard
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// CSRF token validation failures
    #[error("CSRF validation failed: {0}")]
    Csrf(#[from] CsrfError),

    /// Token or metrics store failures
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Resource not found (e.g. an operation that was never recorded)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal system errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus encoding errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Reasons a presented CSRF token is rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfError {
    /// No token was presented
    #[error("No CSRF token provided")]
    Missing,

    /// Token is too short to have been issued by us
    #[error("Invalid CSRF token format (too short)")]
    Malformed,

    /// Token is not in the store
    #[error("Invalid CSRF token (not found in storage)")]
    NotFound,

    /// Token TTL has elapsed
    #[error("CSRF token expired")]
    Expired,

    /// Token is bound to a different session
    #[error("CSRF token bound to a different session")]
    SessionMismatch,
}

impl CsrfError {
    /// Short machine-readable reason, used in `{valid, error}` summaries
    pub fn reason(&self) -> &'static str {
        match self {
            CsrfError::Missing => "missing",
            CsrfError::Malformed => "malformed",
            CsrfError::NotFound => "not_found",
            CsrfError::Expired => "expired",
            CsrfError::SessionMismatch => "session_mismatch",
        }
    }
}

/// Storage backend errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis command or connection failure
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Stored payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a client error (4xx equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Csrf(_) | Error::NotFound(_) | Error::InvalidInput(_)
        )
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Store(StoreError::Redis(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(StoreError::Serialization(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csrf_reasons_are_stable() {
        assert_eq!(CsrfError::Expired.reason(), "expired");
        assert_eq!(CsrfError::NotFound.reason(), "not_found");
        assert_eq!(CsrfError::Missing.reason(), "missing");
    }

    #[test]
    fn client_errors_are_classified() {
        assert!(Error::from(CsrfError::Expired).is_client_error());
        assert!(Error::not_found("op").is_client_error());
        assert!(!Error::internal("boom").is_client_error());
        assert!(!Error::config("bad").is_client_error());
    }
}
