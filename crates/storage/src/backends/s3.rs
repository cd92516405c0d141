//! S3-compatible storage backend using AWS SDK.
//!
//! Write grants are presigned `PutObject` URLs: the client transfers straight to the
//! bucket, and the grant is bound to one key and content type for the configured TTL.

use crate::error::{StorageError, StorageResult};
use crate::traits::{GrantRequest, ObjectMeta, ObjectStore};
use async_trait::async_trait;
use atelier_core::WriteGrant;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use bytes::Bytes;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Marker carried by lazy-credential failures so they surface as config errors.
const CREDENTIALS_ERROR_MARKER: &str = "atelier-s3-credentials";

/// Resolves the AWS default credential chain on the first signed request instead
/// of at construction time.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self
            .chain
            .get_or_init(|| async {
                aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                    .region(aws_config::Region::new(self.region.clone()))
                    .build()
                    .await
            })
            .await;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if err.to_string().contains(CREDENTIALS_ERROR_MARKER) {
        return StorageError::Config(
            "S3 credential resolution failed. Configure AWS credentials explicitly or ensure ambient AWS credentials are available."
                .to_string(),
        );
    }
    StorageError::S3(Box::new(err))
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool {
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.raw().status().as_u16() == 404
    )
}

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// # Arguments
    /// * `force_path_style` - Use path-style URLs (`endpoint/bucket/key`) instead of
    ///   virtual-hosted style (`bucket.endpoint/key`). Required for MinIO and some
    ///   S3-compatible services.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        builder = match (access_key_id, secret_access_key) {
            (Some(key_id), Some(secret)) => builder.credentials_provider(
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "atelier-config"),
            ),
            _ => builder.credentials_provider(LazyDefaultCredentialsProvider::new(
                resolved_region.clone(),
            )),
        };

        // Bare host:port endpoints (e.g. "minio:9000") get an http:// scheme.
        let normalized_endpoint = endpoint.map(|url| {
            let lower = url.to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                url
            } else {
                format!("http://{url}")
            }
        });
        if let Some(url) = &normalized_endpoint {
            builder = builder.endpoint_url(url);
        }
        if force_path_style {
            builder = builder.force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            endpoint: normalized_endpoint
                .unwrap_or_else(|| format!("s3.{resolved_region}.amazonaws.com")),
            region: resolved_region,
        })
    }

    /// Endpoint this backend talks to, normalized.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    fn strip_prefix(&self, full_key: &str) -> String {
        match &self.prefix {
            Some(prefix) => full_key
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(full_key)
                .to_string(),
            None => full_key.to_string(),
        }
    }

    fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if is_not_found(&err) {
            return StorageError::NotFound(key.to_string());
        }
        map_s3_operation_error(err)
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let last_modified = output.last_modified().and_then(|dt| {
            OffsetDateTime::from_unix_timestamp(dt.secs())
                .inspect_err(|e| {
                    tracing::warn!(
                        key = %key,
                        timestamp = dt.secs(),
                        error = %e,
                        "Failed to convert S3 timestamp, object will be skipped by the stray sweep"
                    );
                })
                .ok()
        });

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified,
            content_type: output.content_type().map(str::to_string),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(data.into_bytes())
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // delete_object succeeds on missing keys, so probe first to report NotFound.
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let output = request.send().await.map_err(map_s3_operation_error)?;
            results.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(|k| self.strip_prefix(k)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated() == Some(true) => {
                    continuation_token = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(results)
    }

    #[instrument(skip(self, request), fields(backend = "s3", key = %request.key))]
    async fn issue_write_grant(&self, request: &GrantRequest) -> StorageResult<WriteGrant> {
        let ttl = Duration::try_from(request.ttl)
            .map_err(|e| StorageError::Presign(format!("invalid grant ttl: {e}")))?;
        let presign_config =
            PresigningConfig::expires_in(ttl).map_err(|e| StorageError::Presign(e.to_string()))?;
        let expires_at = request.expires_at(OffsetDateTime::now_utc());

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(&request.key))
            .content_type(&request.content_type)
            .presigned(presign_config)
            .await
            .map_err(map_s3_operation_error)?;

        Ok(WriteGrant {
            method: presigned.method().to_string(),
            url: presigned.uri().to_string(),
            headers: presigned
                .headers()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            expires_at,
            max_size_bytes: request.max_size_bytes,
        })
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

        let probe = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(1)
            .send();

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })?
            .map_err(map_s3_operation_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_backend(prefix: Option<String>) -> S3Backend {
        S3Backend::new(
            "test-bucket",
            Some("s3.test".to_string()),
            Some("us-east-1".to_string()),
            prefix,
            Some("access".to_string()),
            Some("secret".to_string()),
            true,
        )
        .await
        .expect("backend should construct for unit tests")
    }

    #[tokio::test]
    async fn test_full_key_and_strip_prefix() {
        let backend = make_backend(Some("prefix/".to_string())).await;
        assert_eq!(backend.full_key("assets/file"), "prefix/assets/file");
        assert_eq!(backend.strip_prefix("prefix/assets/file"), "assets/file");
        assert_eq!(backend.strip_prefix("other/path"), "other/path");

        let backend = make_backend(None).await;
        assert_eq!(backend.full_key("assets/file"), "assets/file");
        assert_eq!(backend.strip_prefix("assets/file"), "assets/file");
    }

    #[tokio::test]
    async fn test_s3_new_requires_complete_credentials() {
        let err = S3Backend::new(
            "bucket",
            None,
            Some("us-east-1".to_string()),
            None,
            Some("access".to_string()),
            None,
            false,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn test_s3_new_normalizes_endpoint() {
        let backend = S3Backend::new(
            "bucket",
            Some("minio:9000".to_string()),
            None,
            None,
            None,
            None,
            true,
        )
        .await
        .unwrap();
        assert_eq!(backend.endpoint(), "http://minio:9000");

        let backend = S3Backend::new("bucket", None, None, None, None, None, false)
            .await
            .unwrap();
        assert_eq!(backend.endpoint(), "s3.us-east-1.amazonaws.com");
    }

    #[tokio::test]
    async fn test_presigned_grant_is_bound_to_key_and_expiry() {
        let backend = make_backend(Some("media".to_string())).await;
        let request = GrantRequest {
            key: "assets/2026/01/abc/photo.png".to_string(),
            content_type: "image/png".to_string(),
            max_size_bytes: 2048,
            ttl: time::Duration::minutes(15),
        };

        let grant = backend.issue_write_grant(&request).await.unwrap();
        assert_eq!(grant.method, "PUT");
        assert!(
            grant
                .url
                .starts_with("http://s3.test/test-bucket/media/assets/2026/01/abc/photo.png?"),
            "unexpected url: {}",
            grant.url
        );
        assert!(grant.url.contains("X-Amz-Expires=900"));
        assert_eq!(grant.max_size_bytes, 2048);
        assert!(grant.expires_at > OffsetDateTime::now_utc());
        assert!(
            backend.claim_write_grant("anything").is_err(),
            "s3 grants are redeemed by the bucket"
        );
    }
}
