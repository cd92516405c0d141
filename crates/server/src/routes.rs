//! Route configuration.

use crate::auth::identity_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::ratelimit::rate_limit_middleware;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let rate_limit = state.rate_limit.clone();
    macro_rules! limited {
        ($action:literal) => {
            middleware::from_fn_with_state(rate_limit.for_action($action), rate_limit_middleware)
        };
    }

    let api_routes = Router::new()
        // Health check (unauthenticated for load balancer probes)
        .route("/v1/health", get(handlers::health_check))
        // Asset control plane
        .route(
            "/v1/assets",
            post(handlers::reserve_asset).route_layer(limited!("asset.reserve")),
        )
        .route(
            "/v1/assets/{asset_id}",
            get(handlers::get_asset)
                .merge(delete(handlers::delete_asset).route_layer(limited!("asset.delete"))),
        )
        .route(
            "/v1/assets/{asset_id}/confirm",
            post(handlers::confirm_asset).route_layer(limited!("asset.confirm")),
        )
        .route(
            "/v1/assets/{asset_id}/attach",
            post(handlers::attach_asset).route_layer(limited!("asset.attach")),
        )
        // Parent entities
        .route(
            "/v1/entities",
            post(handlers::register_entity).route_layer(limited!("entity.register")),
        )
        .route(
            "/v1/entities/{entity_id}",
            delete(handlers::delete_entity).route_layer(limited!("entity.delete")),
        )
        .route(
            "/v1/entities/{entity_id}/assets",
            get(handlers::list_entity_assets),
        )
        .route(
            "/v1/entities/{entity_id}/assets/feed",
            get(handlers::entity_feed),
        )
        // Admin
        .route("/v1/admin/reclaim", post(handlers::trigger_reclaim));

    // Filesystem data plane. The handler enforces the per-grant size cap itself.
    let blob_routes = Router::new()
        .route("/v1/blobs/{grant}", put(handlers::put_blob))
        .layer(DefaultBodyLimit::disable());

    let mut router = Router::new().merge(api_routes).merge(blob_routes);

    // SECURITY: when enabled, /metrics must be network-restricted to scrapers.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    // Layers run outermost first: TraceLayer -> identity -> per-route rate limit -> handler.
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
