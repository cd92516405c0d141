//! Error types for the core domain.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification shared by every error surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Admission denied by the rate limiter.
    Denied,
    /// Bad declared type, size, filename or identifier.
    InvalidInput,
    /// No identity was supplied.
    Unauthorized,
    /// Identity lacks ownership or privilege.
    Forbidden,
    NotFound,
    /// Incompatible state or ownership mismatch.
    Conflict,
    /// Metadata or content store unreachable.
    Unavailable,
    Internal,
}

impl ErrorKind {
    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Denied | Self::Unavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Denied => "denied",
            Self::InvalidInput => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("invalid content type: {0}")]
    InvalidContentType(String),

    #[error("invalid object key: {0}")]
    InvalidObjectKey(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Serialization(_) => ErrorKind::Internal,
            _ => ErrorKind::InvalidInput,
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Denied.is_retryable());
        assert!(ErrorKind::Unavailable.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
        assert!(!ErrorKind::InvalidInput.is_retryable());
        assert!(!ErrorKind::Forbidden.is_retryable());
    }

    #[test]
    fn test_core_errors_are_client_errors() {
        assert_eq!(
            Error::InvalidFilename("..".to_string()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            Error::Serialization("eof".to_string()).kind(),
            ErrorKind::Internal
        );
    }
}
