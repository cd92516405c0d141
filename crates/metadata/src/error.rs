//! Metadata store error types.

use atelier_core::ErrorKind;
use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A stored row could not be mapped back to a domain record.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl MetadataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) | Self::Constraint(_) => ErrorKind::Conflict,
            Self::Database(_) | Self::Io(_) => ErrorKind::Unavailable,
            Self::Config(_) | Self::Corrupt(_) => ErrorKind::Internal,
        }
    }

    /// Map unique and foreign-key violations to their own variants.
    pub(crate) fn from_write(err: sqlx::Error, what: impl Into<String>) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return Self::AlreadyExists(what.into());
            }
            if db.is_foreign_key_violation() {
                return Self::Constraint(format!("{}: {}", what.into(), db.message()));
            }
        }
        Self::Database(err)
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
