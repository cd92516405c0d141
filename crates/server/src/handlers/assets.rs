//! Asset control plane handlers.

use crate::auth::require_identity;
use crate::error::ApiResult;
use crate::handlers::common::{parse_asset_id, read_json};
use crate::state::AppState;
use atelier_core::asset::{
    AssetResponse, AttachAssetRequest, ConfirmAssetResponse, DeleteAssetResponse,
    ReserveAssetRequest, ReserveAssetResponse,
};
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;

/// POST /v1/assets - Reserve an asset and obtain a write grant.
pub async fn reserve_asset(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<ReserveAssetResponse>)> {
    let identity = require_identity(&req)?;
    let body: ReserveAssetRequest = read_json(req).await?;
    let response = state.coordinator.reserve(&identity, body).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /v1/assets/{asset_id}/confirm - Mark the transfer complete.
///
/// Replaying a confirmation returns the stored record with `replayed: true`.
pub async fn confirm_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<String>,
    req: Request,
) -> ApiResult<Json<ConfirmAssetResponse>> {
    let identity = require_identity(&req)?;
    let asset_id = parse_asset_id(&asset_id)?;
    Ok(Json(state.coordinator.confirm(&identity, asset_id).await?))
}

/// POST /v1/assets/{asset_id}/attach - Attach a staged asset to its parent.
pub async fn attach_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<String>,
    req: Request,
) -> ApiResult<Json<AssetResponse>> {
    let identity = require_identity(&req)?;
    let asset_id = parse_asset_id(&asset_id)?;
    let body: AttachAssetRequest = read_json(req).await?;
    let record = state
        .coordinator
        .attach(&identity, asset_id, &body.parent_entity_id)
        .await?;
    Ok(Json(AssetResponse { record }))
}

/// GET /v1/assets/{asset_id}
pub async fn get_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<String>,
    req: Request,
) -> ApiResult<Json<AssetResponse>> {
    let identity = require_identity(&req)?;
    let asset_id = parse_asset_id(&asset_id)?;
    let record = state.coordinator.get(&identity, asset_id).await?;
    Ok(Json(AssetResponse { record }))
}

/// DELETE /v1/assets/{asset_id}
///
/// Succeeds once the metadata record is gone, even if the content object
/// could not be removed.
pub async fn delete_asset(
    State(state): State<AppState>,
    Path(asset_id): Path<String>,
    req: Request,
) -> ApiResult<Json<DeleteAssetResponse>> {
    let identity = require_identity(&req)?;
    let asset_id = parse_asset_id(&asset_id)?;
    Ok(Json(state.coordinator.delete(&identity, asset_id).await?))
}
