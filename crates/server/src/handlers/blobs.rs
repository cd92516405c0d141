//! Data plane for the filesystem backend.
//!
//! Object stores with native presigned URLs never route content through the
//! server. The filesystem backend instead issues grant tokens that are
//! redeemed here, once, by a PUT of the object bytes.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use atelier_core::validation::{normalize_content_type, validate_object_key};
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use tracing::{info, warn};

/// PUT /v1/blobs/{grant} - Redeem a write grant.
///
/// The grant is consumed before the body is read, so a rejected transfer
/// needs a new reservation. Grants whose asset record is gone are refused.
pub async fn put_blob(
    State(state): State<AppState>,
    Path(grant): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let claim = state.storage.claim_write_grant(&grant)?;
    validate_object_key(&claim.key)?;

    let sent_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing content-type header".to_string()))?;
    let sent_type = normalize_content_type(sent_type)?;
    if sent_type != claim.content_type {
        return Err(ApiError::BadRequest(format!(
            "content-type {sent_type} does not match granted {}",
            claim.content_type
        )));
    }

    let limit = usize::try_from(claim.max_size_bytes).unwrap_or(usize::MAX);
    let body = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| {
            ApiError::BadRequest(format!(
                "body exceeds granted {} bytes or could not be read: {e}",
                claim.max_size_bytes
            ))
        })?;

    // The record may have been deleted or reclaimed since the grant was issued.
    if !state.metadata.object_key_exists(&claim.key).await? {
        return Err(ApiError::NotFound(format!(
            "no asset record for {}",
            claim.key
        )));
    }

    let size = body.len();
    state.storage.put(&claim.key, body).await?;

    // A delete that raced the write already ran its content cleanup.
    if !state.metadata.object_key_exists(&claim.key).await? {
        state.coordinator.delete_content(&claim.key).await;
        warn!(object_key = %claim.key, "Record removed during transfer; object discarded");
        return Err(ApiError::NotFound(format!(
            "no asset record for {}",
            claim.key
        )));
    }
    info!(object_key = %claim.key, size, "Object written through grant");

    Ok(StatusCode::NO_CONTENT)
}
