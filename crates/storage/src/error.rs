//! Storage error types.

use atelier_core::ErrorKind;
use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("write grant not found or already used")]
    GrantNotFound,

    #[error("write grant expired")]
    GrantExpired,

    #[error("presigning failed: {0}")]
    Presign(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl StorageError {
    /// Classify this error for callers.
    ///
    /// Anything that is not a definite answer from the store counts as the store
    /// being unavailable.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::GrantNotFound => ErrorKind::NotFound,
            Self::GrantExpired => ErrorKind::Forbidden,
            Self::InvalidKey(_) => ErrorKind::InvalidInput,
            Self::Config(_) | Self::Unsupported(_) => ErrorKind::Internal,
            Self::Io(_) | Self::S3(_) | Self::Presign(_) => ErrorKind::Unavailable,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
