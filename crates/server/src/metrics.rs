//! Prometheus metrics for the Atelier server.
//!
//! Covers the upload lifecycle, admission control, reclamation and live feeds.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no subject or asset identifiers, only aggregate counts, but
//! the endpoint should still be network-restricted to the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload lifecycle
pub static ASSETS_RESERVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "atelier_assets_reserved_total",
        "Total number of asset reservations created",
    )
    .expect("metric creation failed")
});

pub static ASSETS_CONFIRMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "atelier_assets_confirmed_total",
        "Total number of assets moved from reserved to confirmed",
    )
    .expect("metric creation failed")
});

pub static ASSETS_CONFIRM_REPLAYED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "atelier_assets_confirm_replayed_total",
        "Confirm calls answered idempotently for already-confirmed assets",
    )
    .expect("metric creation failed")
});

pub static ASSETS_ATTACHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "atelier_assets_attached_total",
        "Total number of assets attached to a parent entity",
    )
    .expect("metric creation failed")
});

pub static ASSETS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "atelier_assets_deleted_total",
        "Total number of asset records deleted, including cascades",
    )
    .expect("metric creation failed")
});

pub static CONTENT_DELETE_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "atelier_content_delete_failures_total",
        "Best-effort content deletions that failed and left a stray object",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "atelier_upload_errors_total",
            "Upload coordinator errors by kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

// Reclamation
pub static ORPHANS_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "atelier_orphans_reclaimed_total",
        "Abandoned reservations purged by the reclamation pass",
    )
    .expect("metric creation failed")
});

pub static STRAY_OBJECTS_SWEPT: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "atelier_stray_objects_swept_total",
        "Content objects without a metadata record removed by the sweep",
    )
    .expect("metric creation failed")
});

pub static RECLAIM_PASS_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "atelier_reclaim_pass_duration_seconds",
            "Duration of reclamation passes in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
    )
    .expect("metric creation failed")
});

// Admission control
pub static RATE_LIMIT_DECISIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "atelier_rate_limit_decisions_total",
            "Rate limiter decisions by action and outcome",
        ),
        &["action", "outcome"],
    )
    .expect("metric creation failed")
});

pub static RATE_LIMIT_TRACKED_KEYS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "atelier_rate_limit_tracked_keys",
        "Number of (subject, action) entries held by the limiter",
    )
    .expect("metric creation failed")
});

// Change feeds
pub static FEED_SUBSCRIBERS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "atelier_feed_subscribers",
        "Number of open server-sent event feed connections",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once; only the first call registers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(ASSETS_RESERVED.clone()),
            Box::new(ASSETS_CONFIRMED.clone()),
            Box::new(ASSETS_CONFIRM_REPLAYED.clone()),
            Box::new(ASSETS_ATTACHED.clone()),
            Box::new(ASSETS_DELETED.clone()),
            Box::new(CONTENT_DELETE_FAILURES.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(ORPHANS_RECLAIMED.clone()),
            Box::new(STRAY_OBJECTS_SWEPT.clone()),
            Box::new(RECLAIM_PASS_DURATION.clone()),
            Box::new(RATE_LIMIT_DECISIONS.clone()),
            Box::new(RATE_LIMIT_TRACKED_KEYS.clone()),
            Box::new(FEED_SUBSCRIBERS.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count an upload coordinator error under its kind label.
pub fn record_upload_error(kind: atelier_core::ErrorKind) {
    UPLOAD_ERRORS.with_label_values(&[kind.as_str()]).inc();
}

/// Count a limiter decision.
pub fn record_rate_limit_decision(action: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    RATE_LIMIT_DECISIONS
        .with_label_values(&[action, outcome])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration_is_idempotent() {
        register_metrics();
        register_metrics();
        ASSETS_RESERVED.inc();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&REGISTRY.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("atelier_assets_reserved_total"));
    }
}
