//! HTTP control plane for Atelier.
//!
//! This crate provides:
//! - Per-subject sliding-window admission control
//! - The reserve / transfer / confirm upload protocol and asset removal
//! - Server-sent change feeds scoped to a parent entity
//! - Scheduled reclamation of abandoned reservations

pub mod auth;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod ratelimit;
pub mod reclaim;
pub mod routes;
pub mod state;

pub use auth::{IdentityProvider, StaticIdentityProvider, TraceId};
pub use coordinator::{UploadCoordinator, UploadError};
pub use error::ApiError;
pub use ratelimit::{RateLimitState, SlidingWindowLimiter};
pub use reclaim::Reclaimer;
pub use routes::create_router;
pub use state::AppState;
