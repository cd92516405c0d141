//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use atelier_core::WriteGrant;
use bytes::Bytes;
use time::{Duration, OffsetDateTime};

/// Parameters for issuing a write grant.
#[derive(Clone, Debug)]
pub struct GrantRequest {
    /// Exact key the grant allows writing.
    pub key: String,
    /// Content type the transfer must declare.
    pub content_type: String,
    /// Upper bound on the transferred body.
    pub max_size_bytes: u64,
    /// How long the grant stays valid.
    pub ttl: Duration,
}

impl GrantRequest {
    pub fn expires_at(&self, now: OffsetDateTime) -> OffsetDateTime {
        now + self.ttl
    }
}

/// A redeemed write grant: what the holder is allowed to write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrantClaim {
    pub key: String,
    pub content_type: String,
    pub max_size_bytes: u64,
}

/// Object store abstraction for asset content.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List objects with a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Issue a short-lived credential allowing one direct write of `request.key`.
    async fn issue_write_grant(&self, request: &GrantRequest) -> StorageResult<WriteGrant>;

    /// Consume an in-process write grant token.
    ///
    /// Only backends that serve the data plane themselves support this; backends
    /// whose grants are redeemed by the remote store return `Unsupported`.
    fn claim_write_grant(&self, token: &str) -> StorageResult<GrantClaim> {
        let _ = token;
        Err(StorageError::Unsupported(format!(
            "{} does not redeem write grants in-process",
            self.backend_name()
        )))
    }

    /// Drop expired, never-redeemed grants. Returns how many were dropped.
    fn purge_expired_grants(&self) -> usize {
        0
    }

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "s3", "filesystem").
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// The default implementation returns Ok(()), suitable for backends that
    /// don't require connectivity verification.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}
