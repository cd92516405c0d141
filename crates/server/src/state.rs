//! Application state shared across handlers.

use crate::auth::IdentityProvider;
use crate::coordinator::UploadCoordinator;
use crate::ratelimit::RateLimitState;
use crate::reclaim::Reclaimer;
use atelier_core::config::AppConfig;
use atelier_metadata::MetadataStore;
use atelier_storage::ObjectStore;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Content store backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store; also owns the asset change feed.
    pub metadata: Arc<dyn MetadataStore>,
    /// Bearer token to identity lookup.
    pub identity: Arc<dyn IdentityProvider>,
    pub coordinator: Arc<UploadCoordinator>,
    pub reclaimer: Arc<Reclaimer>,
    /// Rate limiting state.
    pub rate_limit: RateLimitState,
}

impl AppState {
    /// Create a new application state.
    ///
    /// This performs configuration validation and logs warnings for potentially
    /// dangerous settings.
    ///
    /// # Panics
    ///
    /// Panics if configuration validation fails with an error.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        match config.validate() {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!("Configuration warning: {}", warning);
                }
            }
            Err(error) => {
                panic!("Invalid configuration: {}", error);
            }
        }

        let coordinator = Arc::new(UploadCoordinator::new(
            metadata.clone(),
            storage.clone(),
            config.uploads.clone(),
        ));
        let reclaimer = Arc::new(Reclaimer::new(coordinator.clone(), config.reclaim.clone()));
        let rate_limit = RateLimitState::new(&config.rate_limit);

        Self {
            config: Arc::new(config),
            storage,
            metadata,
            identity,
            coordinator,
            reclaimer,
            rate_limit,
        }
    }

    /// Replace the rate limiter, e.g. with one driven by a manual clock.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitState) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Sweep interval for the rate limiter, if enabled.
    pub fn rate_limit_sweep_interval(&self) -> Option<Duration> {
        self.rate_limit
            .is_enabled()
            .then(|| Duration::from_secs(self.config.rate_limit.sweep_interval_secs.max(1)))
    }

    /// Interval of the scheduled reclamation pass, if enabled.
    pub fn reclaim_interval(&self) -> Option<Duration> {
        self.config
            .reclaim
            .enabled
            .then(|| self.config.reclaim.interval())
    }
}
