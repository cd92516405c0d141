use anyhow::{Context, Result};
use atelier_core::asset::{
    AssetResponse, AttachAssetRequest, CascadeDeleteResponse, ConfirmAssetResponse,
    DeleteAssetResponse, EntityAssetsResponse, ReclaimStats, RegisterEntityRequest,
    ReserveAssetRequest, ReserveAssetResponse,
};
use atelier_core::{AssetId, ParentEntity, WriteGrant};
use reqwest::header::{HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Longest we wait before retrying a reservation.
const DEFAULT_RETRY_DELAY_CAP: Duration = Duration::from_secs(30);

/// Delay before a retry when the server gave no hint.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(default)]
    retryable: bool,
}

/// A non-success response from the API.
#[derive(Debug, thiserror::Error)]
#[error("API error ({status}) {code}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    /// Server-suggested wait, from `Retry-After`.
    pub retry_after: Option<Duration>,
}

impl ApiError {
    async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();

        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Self {
                status,
                code: body.code,
                message: body.message,
                retryable: body.retryable,
                retry_after,
            },
            Err(_) => Self {
                status,
                code: "unknown".to_string(),
                message: text,
                retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
                retry_after,
            },
        }
    }
}

/// Whether an error from [`ApiClient`] is worth retrying.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    if let Some(api) = err.downcast_ref::<ApiError>() {
        return api.retryable;
    }
    err.downcast_ref::<reqwest::Error>()
        .is_some_and(|e| e.is_connect() || e.is_timeout())
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    retry_delay_cap: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.map(str::to_string),
            retry_delay_cap: DEFAULT_RETRY_DELAY_CAP,
        })
    }

    /// Cap the wait before a retried reservation.
    pub fn with_retry_delay_cap(mut self, cap: Duration) -> Self {
        self.retry_delay_cap = cap;
        self
    }

    /// API URL under the base path; each segment is percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("server URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = self.authed(req).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await.into());
        }
        let body = response.text().await?;
        serde_json::from_str(&body).context("failed to decode API response")
    }

    pub async fn reserve(&self, req: &ReserveAssetRequest) -> Result<ReserveAssetResponse> {
        let url = self.url(&["v1", "assets"])?;
        self.send_json(self.http.post(url).json(req)).await
    }

    /// Reserve, retrying the whole step once when the failure is retryable.
    pub async fn reserve_with_retry(
        &self,
        req: &ReserveAssetRequest,
    ) -> Result<ReserveAssetResponse> {
        match self.reserve(req).await {
            Ok(response) => Ok(response),
            Err(err) if is_retryable(&err) => {
                let delay = err
                    .downcast_ref::<ApiError>()
                    .and_then(|e| e.retry_after)
                    .unwrap_or(DEFAULT_RETRY_DELAY)
                    .min(self.retry_delay_cap);
                tracing::warn!(error = %err, delay_ms = delay.as_millis() as u64, "Reservation failed, retrying once");
                tokio::time::sleep(delay).await;
                self.reserve(req).await
            }
            Err(err) => Err(err),
        }
    }

    /// Send the object bytes as the write grant prescribes.
    ///
    /// The grant is the only credential: no bearer token is attached, since
    /// presigned object-store URLs reject extra authorization.
    pub async fn transfer(&self, grant: &WriteGrant, data: Vec<u8>) -> Result<()> {
        let method = Method::from_bytes(grant.method.as_bytes())
            .with_context(|| format!("invalid grant method: {}", grant.method))?;
        let url = Url::parse(&grant.url).context("invalid grant URL")?;

        let mut req = self.http.request(method, url);
        for (name, value) in &grant.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid grant header: {name}"))?;
            let value = HeaderValue::from_str(value).context("invalid grant header value")?;
            req = req.header(name, value);
        }

        let response = req.body(data).send().await?;
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await.into());
        }
        Ok(())
    }

    pub async fn confirm(&self, asset_id: AssetId) -> Result<ConfirmAssetResponse> {
        let url = self.url(&["v1", "assets", &asset_id.to_string(), "confirm"])?;
        self.send_json(self.http.post(url)).await
    }

    pub async fn attach(&self, asset_id: AssetId, entity_id: &str) -> Result<AssetResponse> {
        let url = self.url(&["v1", "assets", &asset_id.to_string(), "attach"])?;
        let body = AttachAssetRequest {
            parent_entity_id: entity_id.to_string(),
        };
        self.send_json(self.http.post(url).json(&body)).await
    }

    pub async fn get(&self, asset_id: AssetId) -> Result<AssetResponse> {
        let url = self.url(&["v1", "assets", &asset_id.to_string()])?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn delete(&self, asset_id: AssetId) -> Result<DeleteAssetResponse> {
        let url = self.url(&["v1", "assets", &asset_id.to_string()])?;
        self.send_json(self.http.delete(url)).await
    }

    pub async fn register_entity(&self, entity_id: &str) -> Result<ParentEntity> {
        let url = self.url(&["v1", "entities"])?;
        let body = RegisterEntityRequest {
            entity_id: entity_id.to_string(),
        };
        self.send_json(self.http.post(url).json(&body)).await
    }

    pub async fn entity_assets(&self, entity_id: &str) -> Result<EntityAssetsResponse> {
        let url = self.url(&["v1", "entities", entity_id, "assets"])?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn delete_entity(&self, entity_id: &str) -> Result<CascadeDeleteResponse> {
        let url = self.url(&["v1", "entities", entity_id])?;
        self.send_json(self.http.delete(url)).await
    }

    pub async fn reclaim(&self) -> Result<ReclaimStats> {
        let url = self.url(&["v1", "admin", "reclaim"])?;
        self.send_json(self.http.post(url)).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url(&["v1", "health"])?;
        let response = self.http.get(url).send().await?;
        // A degraded server answers 503 with the same body.
        let body = response.text().await?;
        serde_json::from_str(&body).context("failed to decode health response")
    }
}

// =============================================================================
// Response types not shared through atelier-core
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub metadata: ComponentHealth,
    pub storage: ComponentHealth,
}

#[derive(Debug, Deserialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(default)]
    pub backend: Option<String>,
}
