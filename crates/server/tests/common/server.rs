//! Server test utilities.

use super::fixtures::png_reservation;
use super::storage::FaultyStore;
use atelier_core::config::{AppConfig, MetadataConfig, StorageConfig};
use atelier_metadata::{MetadataStore, SqliteStore};
use atelier_realtime::ChangeFeed;
use atelier_server::ratelimit::ManualClock;
use atelier_server::{AppState, RateLimitState, StaticIdentityProvider, create_router};
use atelier_storage::{FilesystemBackend, ObjectStore};
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// Base URL the filesystem backend embeds in grant URLs.
pub const TEST_BASE_URL: &str = "http://atelier.test";

/// Starting point of the rate limiter's manual clock.
pub const CLOCK_START_MS: u64 = 1_700_000_000_000;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub store: Arc<FaultyStore>,
    pub clock: ManualClock,
    _temp_dir: TempDir,
}

/// A decoded response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage_path = temp_dir.path().join("storage");
        let db_path = temp_dir.path().join("metadata.db");

        let mut config = AppConfig::for_testing();
        config.server.public_base_url = TEST_BASE_URL.to_string();
        config.storage = StorageConfig::Filesystem {
            path: storage_path.clone(),
        };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path.clone(),
            query_timeout_secs: None,
        };
        modifier(&mut config);

        let backend = FilesystemBackend::new(&storage_path)
            .await
            .expect("Failed to create storage backend")
            .with_public_base_url(TEST_BASE_URL);
        let store = Arc::new(FaultyStore::new(backend));
        let storage: Arc<dyn ObjectStore> = store.clone();

        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None, ChangeFeed::new(config.server.feed_buffer))
                .await
                .expect("Failed to create metadata store"),
        );

        let identity = Arc::new(StaticIdentityProvider::from_config(&config.identity));
        let clock = ManualClock::new(CLOCK_START_MS);
        let rate_limit = RateLimitState::with_clock(&config.rate_limit, Arc::new(clock.clone()));

        let state = AppState::new(config, storage, metadata, identity).with_rate_limit(rate_limit);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            store,
            clock,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request with an optional JSON body and bearer token.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Send a request and return only status and JSON body.
    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, token).await;
        (response.status, response.body)
    }

    /// PUT bytes to a write grant URL issued by the filesystem backend.
    pub async fn put_blob(&self, grant_url: &str, content_type: &str, data: Bytes) -> StatusCode {
        let path = grant_url
            .strip_prefix(TEST_BASE_URL)
            .expect("grant URL should point at the test server");
        let request = Request::builder()
            .method("PUT")
            .uri(path)
            .header("Content-Type", content_type)
            .body(Body::from(data))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap().status()
    }

    /// Reserve a PNG of `data.len()` bytes, transfer it and confirm it.
    /// Returns the confirmed record.
    pub async fn upload_png(&self, token: &str, data: Bytes, parent: Option<&str>) -> Value {
        let (status, reserved) = self
            .json(
                "POST",
                "/v1/assets",
                Some(png_reservation(data.len(), parent)),
                Some(token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "reserve failed: {reserved}");

        let grant_url = reserved["write_grant"]["url"].as_str().unwrap();
        assert!(self.put_blob(grant_url, "image/png", data).await.is_success());

        let asset_id = reserved["asset_id"].as_str().unwrap();
        let (status, confirmed) = self
            .json(
                "POST",
                &format!("/v1/assets/{asset_id}/confirm"),
                None,
                Some(token),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "confirm failed: {confirmed}");
        confirmed["record"].clone()
    }

    /// Register a parent entity owned by the token's subject.
    pub async fn register_entity(&self, token: &str, entity_id: &str) {
        let (status, body) = self
            .json(
                "POST",
                "/v1/entities",
                Some(serde_json::json!({ "entity_id": entity_id })),
                Some(token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }
}
