//! Local filesystem storage backend.
//!
//! Besides the object operations this backend mints its own write grants: the
//! server exposes `PUT /v1/blobs/{token}` and redeems them through
//! [`ObjectStore::claim_write_grant`].

use crate::error::{StorageError, StorageResult};
use crate::grants::GrantTable;
use crate::traits::{GrantClaim, GrantRequest, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use atelier_core::WriteGrant;
use atelier_core::validation::validate_object_key;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

const DEFAULT_PUBLIC_BASE_URL: &str = "http://127.0.0.1:8080";

/// Route prefix under which the server redeems filesystem write grants.
pub const BLOB_ROUTE_PREFIX: &str = "/v1/blobs/";

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
    public_base_url: String,
    grants: GrantTable,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            grants: GrantTable::new(),
        })
    }

    /// Set the externally reachable base URL used in write-grant URLs.
    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Resolve a key to a path under the root, off the async runtime.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Map a key to a path, rejecting anything that would resolve outside the root.
    ///
    /// Symlinks are followed for the target itself (if present) or for its nearest
    /// existing ancestor, so a link planted inside the root cannot redirect reads or
    /// writes elsewhere.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        validate_object_key(key).map_err(|e| StorageError::InvalidKey(e.to_string()))?;
        if Path::new(key)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;
        let path = root.join(key);

        // The target itself if it exists, else the closest ancestor that does.
        let mut probe = path.as_path();
        loop {
            match std::fs::symlink_metadata(probe) {
                Ok(meta) => {
                    let resolved = probe.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!("dangling symlink in path: {key}"))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !resolved.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::Io(err)),
            }
            match probe.parent() {
                Some(parent) => probe = parent,
                None => return Ok(path),
            }
        }
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn map_not_found(key: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }

    /// Number of issued, not yet claimed grants.
    pub fn outstanding_grants(&self) -> usize {
        self.grants.len()
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::map_not_found(key, e))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        // Unique temp name so concurrent writers of one key never share a file.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!("{file_name}.tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| Self::map_not_found(key, e))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let base_path = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.key_path(prefix).await?
        };
        let mut results = Vec::new();

        match fs::try_exists(&base_path).await {
            Ok(true) => {}
            Ok(false) => return Ok(results),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => return Err(StorageError::Io(e)),
        }

        let mut stack = vec![base_path];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // file_type() does not follow symlinks; links are skipped entirely.
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && let Ok(rel) = path.strip_prefix(&self.root)
                {
                    let key = rel.to_string_lossy().replace('\\', "/");
                    // In-flight temp files from put() are not objects.
                    if !key.contains(".tmp.") {
                        results.push(key);
                    }
                }
            }
        }

        results.sort();
        Ok(results)
    }

    #[instrument(skip(self, request), fields(backend = "filesystem", key = %request.key))]
    async fn issue_write_grant(&self, request: &GrantRequest) -> StorageResult<WriteGrant> {
        // Fail at issue time rather than at redemption for keys we could never write.
        self.key_path(&request.key).await?;

        let expires_at = request.expires_at(OffsetDateTime::now_utc());
        let token = self.grants.issue(
            GrantClaim {
                key: request.key.clone(),
                content_type: request.content_type.clone(),
                max_size_bytes: request.max_size_bytes,
            },
            expires_at,
        );

        Ok(WriteGrant {
            method: "PUT".to_string(),
            url: format!("{}{BLOB_ROUTE_PREFIX}{token}", self.public_base_url),
            headers: vec![("content-type".to_string(), request.content_type.clone())],
            expires_at,
            max_size_bytes: request.max_size_bytes,
        })
    }

    fn claim_write_grant(&self, token: &str) -> StorageResult<GrantClaim> {
        self.grants.claim(token, OffsetDateTime::now_utc())
    }

    fn purge_expired_grants(&self) -> usize {
        self.grants.purge_expired(OffsetDateTime::now_utc())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn grant_request(key: &str) -> GrantRequest {
        GrantRequest {
            key: key.to_string(),
            content_type: "image/png".to_string(),
            max_size_bytes: 1024,
            ttl: Duration::minutes(5),
        }
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let key = "assets/2026/01/abc/photo.png";
        let data = Bytes::from("hello world");

        backend.put(key, data.clone()).await.unwrap();
        assert!(backend.exists(key).await.unwrap());
        assert_eq!(backend.get(key).await.unwrap(), data);
        assert_eq!(backend.head(key).await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let err = backend.delete("assets/missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_returns_relative_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        backend.put("assets/a/one", Bytes::from("1")).await.unwrap();
        backend.put("assets/b/two", Bytes::from("2")).await.unwrap();
        backend.put("other/three", Bytes::from("3")).await.unwrap();

        let keys = backend.list("assets/").await.unwrap();
        assert_eq!(keys, vec!["assets/a/one", "assets/b/two"]);
        assert!(backend.list("nothing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        assert!(backend.exists("../escape").await.is_err());
        assert!(backend.exists("/absolute/path").await.is_err());
        assert!(backend.exists("foo/../bar").await.is_err());
        assert!(backend.exists("valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();
        std::fs::write(outside_dir.path().join("secret.txt"), "secret data").unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        symlink(outside_dir.path(), dir.path().join("escape")).unwrap();

        let result = backend.get("escape/secret.txt").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = backend
            .put("escape/nested/file.txt", Bytes::from("data"))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!outside_dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_write_grant_url_and_claim() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path())
            .await
            .unwrap()
            .with_public_base_url("https://media.example.com/");

        let grant = backend
            .issue_write_grant(&grant_request("assets/2026/01/abc/photo.png"))
            .await
            .unwrap();
        assert_eq!(grant.method, "PUT");
        assert_eq!(grant.max_size_bytes, 1024);
        let token = grant
            .url
            .strip_prefix("https://media.example.com/v1/blobs/")
            .unwrap();
        assert_eq!(backend.outstanding_grants(), 1);

        let claim = backend.claim_write_grant(token).unwrap();
        assert_eq!(claim.key, "assets/2026/01/abc/photo.png");
        assert_eq!(claim.content_type, "image/png");
        assert!(matches!(
            backend.claim_write_grant(token),
            Err(StorageError::GrantNotFound)
        ));
    }

    #[tokio::test]
    async fn test_write_grant_rejects_bad_key() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let result = backend
            .issue_write_grant(&grant_request("../outside"))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert_eq!(backend.outstanding_grants(), 0);
    }
}
