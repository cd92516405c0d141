//! Parent entity handlers.

use crate::auth::require_identity;
use crate::error::ApiResult;
use crate::handlers::common::read_json;
use crate::state::AppState;
use atelier_core::ParentEntity;
use atelier_core::asset::{CascadeDeleteResponse, EntityAssetsResponse, RegisterEntityRequest};
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;

/// POST /v1/entities - Register a parent entity owned by the caller.
pub async fn register_entity(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<ParentEntity>)> {
    let identity = require_identity(&req)?;
    let body: RegisterEntityRequest = read_json(req).await?;
    let entity = state
        .coordinator
        .register_entity(&identity, &body.entity_id)
        .await?;
    Ok((StatusCode::CREATED, Json(entity)))
}

/// GET /v1/entities/{entity_id}/assets - Snapshot of attached assets.
///
/// Reserved and confirmed assets alike, oldest first. Clients seed their
/// reconciler with this and then follow the feed.
pub async fn list_entity_assets(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    req: Request,
) -> ApiResult<Json<EntityAssetsResponse>> {
    require_identity(&req)?;
    let (entity_id, assets) = state.coordinator.entity_assets(&entity_id).await?;
    Ok(Json(EntityAssetsResponse { entity_id, assets }))
}

/// DELETE /v1/entities/{entity_id} - Delete an entity and every attached asset.
pub async fn delete_entity(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
    req: Request,
) -> ApiResult<Json<CascadeDeleteResponse>> {
    let identity = require_identity(&req)?;
    Ok(Json(
        state.coordinator.delete_entity(&identity, &entity_id).await?,
    ))
}
