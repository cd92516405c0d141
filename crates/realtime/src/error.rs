//! Errors raised by change sources and the reconciler.

use atelier_core::ErrorKind;
use thiserror::Error;

/// Failure of a change stream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The subscriber fell behind and events were dropped; resync required.
    #[error("subscriber lagged, {0} events skipped")]
    Lagged(u64),

    #[error("change feed closed")]
    Closed,

    /// Could not reach or keep the connection to a remote feed.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode change event: {0}")]
    Decode(String),

    #[error("feed rejected subscription ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl FeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Lagged(_) | Self::Closed | Self::Transport(_) => ErrorKind::Unavailable,
            Self::Decode(_) => ErrorKind::Internal,
            Self::Rejected { status: 401, .. } => ErrorKind::Unauthorized,
            Self::Rejected { status: 403, .. } => ErrorKind::Forbidden,
            Self::Rejected { status: 404, .. } => ErrorKind::NotFound,
            Self::Rejected { status, .. } if *status >= 500 => ErrorKind::Unavailable,
            Self::Rejected { .. } => ErrorKind::InvalidInput,
        }
    }
}

/// Failure talking to a reconciler actor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcilerError {
    /// The actor has shut down; the handle is inert.
    #[error("reconciler is closed")]
    Closed,
}

impl ReconcilerError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Unavailable
    }
}
