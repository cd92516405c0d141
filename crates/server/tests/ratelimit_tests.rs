//! Integration tests for per-action rate limiting over HTTP.

mod common;

use atelier_core::config::RateLimitRule;
use axum::http::StatusCode;
use common::{ALICE_TOKEN, BOB_TOKEN, CLOCK_START_MS, TestServer, png_reservation};

async fn strict_reserve_server() -> TestServer {
    TestServer::with_config(|config| {
        config.rate_limit.rules.insert(
            "asset.reserve".to_string(),
            RateLimitRule {
                limit: 3,
                window_ms: 60_000,
            },
        );
    })
    .await
}

fn header<'a>(response: &'a common::TestResponse, name: &str) -> &'a str {
    response
        .headers
        .get(name)
        .unwrap_or_else(|| panic!("missing header {name}"))
        .to_str()
        .unwrap()
}

#[tokio::test]
async fn test_admitted_requests_carry_rate_limit_headers() {
    let server = strict_reserve_server().await;

    for expected_remaining in ["2", "1", "0"] {
        let response = server
            .request(
                "POST",
                "/v1/assets",
                Some(png_reservation(8, None)),
                Some(ALICE_TOKEN),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(header(&response, "x-ratelimit-limit"), "3");
        assert_eq!(header(&response, "x-ratelimit-remaining"), expected_remaining);
        assert_eq!(
            header(&response, "x-ratelimit-reset"),
            (CLOCK_START_MS + 60_000).to_string()
        );
    }
}

#[tokio::test]
async fn test_denial_is_429_with_retry_metadata() {
    let server = strict_reserve_server().await;

    for _ in 0..3 {
        server
            .request(
                "POST",
                "/v1/assets",
                Some(png_reservation(8, None)),
                Some(ALICE_TOKEN),
            )
            .await;
    }

    server.clock.advance(15_000);
    let response = server
        .request(
            "POST",
            "/v1/assets",
            Some(png_reservation(8, None)),
            Some(ALICE_TOKEN),
        )
        .await;

    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "retry-after"), "45");
    assert_eq!(header(&response, "x-ratelimit-remaining"), "0");
    assert_eq!(response.body["code"], "rate_limited");
    assert_eq!(response.body["retryable"], true);
    assert_eq!(response.body["retry_after"], 45);
    assert_eq!(response.body["reset_at"], CLOCK_START_MS + 60_000);
    assert_eq!(response.body["remaining"], 0);
}

#[tokio::test]
async fn test_window_slides_at_reset() {
    let server = strict_reserve_server().await;

    for _ in 0..3 {
        server
            .request(
                "POST",
                "/v1/assets",
                Some(png_reservation(8, None)),
                Some(ALICE_TOKEN),
            )
            .await;
    }

    server.clock.advance(59_999);
    let (status, _) = server
        .json(
            "POST",
            "/v1/assets",
            Some(png_reservation(8, None)),
            Some(ALICE_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    server.clock.advance(1);
    let (status, _) = server
        .json(
            "POST",
            "/v1/assets",
            Some(png_reservation(8, None)),
            Some(ALICE_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_limits_are_per_subject_and_per_action() {
    let server = strict_reserve_server().await;

    let mut last = None;
    for _ in 0..3 {
        let (_, body) = server
            .json(
                "POST",
                "/v1/assets",
                Some(png_reservation(8, None)),
                Some(ALICE_TOKEN),
            )
            .await;
        last = Some(body);
    }

    let (status, _) = server
        .json(
            "POST",
            "/v1/assets",
            Some(png_reservation(8, None)),
            Some(BOB_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // A different action for the throttled subject still has its own budget.
    let asset_id = last.unwrap()["asset_id"].as_str().unwrap().to_string();
    let response = server
        .request(
            "DELETE",
            &format!("/v1/assets/{asset_id}"),
            None,
            Some(ALICE_TOKEN),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-limit"), "30");
}

#[tokio::test]
async fn test_anonymous_requests_are_limited_by_address() {
    let server = TestServer::with_config(|config| {
        config.rate_limit.rules.insert(
            "asset.reserve".to_string(),
            RateLimitRule {
                limit: 1,
                window_ms: 60_000,
            },
        );
    })
    .await;

    let (status, _) = server
        .json("POST", "/v1/assets", Some(png_reservation(8, None)), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = server
        .json("POST", "/v1/assets", Some(png_reservation(8, None)), None)
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "rate_limited");

    // Authenticated callers are keyed by subject, not address.
    let (status, _) = server
        .json(
            "POST",
            "/v1/assets",
            Some(png_reservation(8, None)),
            Some(ALICE_TOKEN),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_unlimited_routes_carry_no_headers() {
    let server = strict_reserve_server().await;
    let response = server.request("GET", "/v1/health", None, None).await;
    assert!(response.headers.get("x-ratelimit-limit").is_none());
}

#[tokio::test]
async fn test_disabled_limiter_admits_everything() {
    let server = TestServer::with_config(|config| {
        config.rate_limit.enabled = false;
        config.rate_limit.rules.insert(
            "asset.reserve".to_string(),
            RateLimitRule {
                limit: 1,
                window_ms: 60_000,
            },
        );
    })
    .await;

    for _ in 0..5 {
        let response = server
            .request(
                "POST",
                "/v1/assets",
                Some(png_reservation(8, None)),
                Some(ALICE_TOKEN),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(header(&response, "x-ratelimit-remaining"), "1");
    }
}
