//! Admin and health handlers.

use crate::auth::require_elevated;
use crate::error::ApiResult;
use crate::state::AppState;
use atelier_core::asset::ReclaimStats;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use serde::Serialize;
use tracing::{info, warn};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub metadata: ComponentHealth,
    pub storage: ComponentHealth,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<&'static str>,
}

/// GET /v1/health - Liveness plus metadata and storage health.
///
/// Unauthenticated so load balancers can probe it. Responds 503 when either
/// store is unhealthy; error details stay in the logs.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metadata_ok = match state.metadata.health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Metadata store health check failed");
            false
        }
    };
    let storage_ok = match state.storage.health_check().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Content store health check failed");
            false
        }
    };

    let healthy = metadata_ok && storage_ok;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            metadata: ComponentHealth {
                healthy: metadata_ok,
                backend: None,
            },
            storage: ComponentHealth {
                healthy: storage_ok,
                backend: Some(state.storage.backend_name()),
            },
        }),
    )
}

/// POST /v1/admin/reclaim - Run one reclamation pass now.
pub async fn trigger_reclaim(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<ReclaimStats>> {
    let identity = require_elevated(&req)?;
    info!(subject = %identity.subject, "Manual reclamation pass requested");
    Ok(Json(state.reclaimer.run_pass().await?))
}
