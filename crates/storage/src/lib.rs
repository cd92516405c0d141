//! Content store abstraction and backends for atelier.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait used by the upload coordinator
//! - Short-lived, single-object write grants (in-process tokens or presigned URLs)
//! - Backends: local filesystem and S3-compatible

pub mod backends;
pub mod error;
pub mod grants;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use grants::GrantTable;
pub use traits::{GrantClaim, GrantRequest, ObjectMeta, ObjectStore};

use atelier_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
///
/// `public_base_url` is where the server is reachable; the filesystem backend builds
/// its write-grant URLs from it.
pub async fn from_config(
    config: &StorageConfig,
    public_base_url: &str,
) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path)
                .await?
                .with_public_base_url(public_base_url);
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}
