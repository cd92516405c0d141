//! Storage test utilities.

use async_trait::async_trait;
use atelier_core::WriteGrant;
use atelier_storage::{
    FilesystemBackend, GrantClaim, GrantRequest, ObjectMeta, ObjectStore, StorageError,
    StorageResult,
};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};

/// Filesystem store with switchable failures, for exercising the paths where
/// the content store misbehaves but metadata does not.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FaultyStore {
    inner: FilesystemBackend,
    fail_delete: AtomicBool,
    fail_grant: AtomicBool,
}

#[allow(dead_code)]
impl FaultyStore {
    pub fn new(inner: FilesystemBackend) -> Self {
        Self {
            inner,
            fail_delete: AtomicBool::new(false),
            fail_grant: AtomicBool::new(false),
        }
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_grants(&self, fail: bool) {
        self.fail_grant.store(fail, Ordering::SeqCst);
    }

    fn injected(what: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(format!("injected {what} failure")))
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn issue_write_grant(&self, request: &GrantRequest) -> StorageResult<WriteGrant> {
        if self.fail_grant.load(Ordering::SeqCst) {
            return Err(Self::injected("grant"));
        }
        self.inner.issue_write_grant(request).await
    }

    fn claim_write_grant(&self, token: &str) -> StorageResult<GrantClaim> {
        self.inner.claim_write_grant(token)
    }

    fn purge_expired_grants(&self) -> usize {
        self.inner.purge_expired_grants()
    }

    fn backend_name(&self) -> &'static str {
        "faulty-filesystem"
    }
}
