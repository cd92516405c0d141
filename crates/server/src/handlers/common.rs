//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use atelier_core::AssetId;
use axum::extract::Request;
use serde::de::DeserializeOwned;

/// Maximum size of a JSON control-plane request body (64 KiB).
pub const MAX_JSON_BODY_SIZE: usize = 64 * 1024;

/// Read and decode a JSON request body.
pub async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Parse an asset id path segment.
pub fn parse_asset_id(raw: &str) -> ApiResult<AssetId> {
    AssetId::parse(raw).map_err(|_| ApiError::BadRequest(format!("invalid asset id: {raw}")))
}
