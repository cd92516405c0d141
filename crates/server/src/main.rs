//! Atelier server binary.

use anyhow::{Context, Result};
use atelier_core::config::AppConfig;
use atelier_realtime::ChangeFeed;
use atelier_server::{AppState, StaticIdentityProvider, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Atelier - asset upload coordination server
#[derive(Parser, Debug)]
#[command(name = "atelierd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "ATELIER_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Atelier v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    atelier_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = atelier_storage::from_config(&config.storage, &config.server.public_base_url)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    let feed = ChangeFeed::new(config.server.feed_buffer);
    let metadata = atelier_metadata::from_config(&config.metadata, feed)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let identity = StaticIdentityProvider::from_config(&config.identity);
    if identity.is_empty() {
        tracing::warn!("No identities configured; every request will be anonymous");
    }

    let state = AppState::new(config.clone(), storage, metadata, Arc::new(identity));

    if let Some(interval) = state.rate_limit_sweep_interval() {
        atelier_server::ratelimit::spawn_sweep_task(state.rate_limit.clone(), interval);
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Rate limiter sweep task spawned"
        );
    }

    if let Some(interval) = state.reclaim_interval() {
        atelier_server::reclaim::spawn_reclaim_task(state.reclaimer.clone(), interval);
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Scheduled reclamation enabled"
        );
    } else {
        tracing::info!("Scheduled reclamation disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    // ConnectInfo feeds client IP extraction for anonymous rate limiting.
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Layer the optional config file under `ATELIER_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();

    if config_path.exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!("No config file at {}, using defaults and environment", path);
    }

    figment
        .merge(Env::prefixed("ATELIER_").split("__").ignore(&["config"]))
        .extract()
        .context("failed to load configuration")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
