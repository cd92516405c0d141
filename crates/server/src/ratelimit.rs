//! Sliding-window rate limiting.
//!
//! Each `(subject, action)` pair owns a queue of the timestamps admitted inside
//! its trailing window. A request is admitted while fewer than `limit`
//! timestamps survive eviction; the reset time of a decision is always the
//! oldest surviving timestamp plus the window, so bursts are judged exactly.
//!
//! The map is process-local. Running several server instances behind a load
//! balancer multiplies the effective limit by the instance count.
//!
//! # Security Note
//!
//! Anonymous requests are keyed by client IP. X-Forwarded-For and X-Real-IP
//! are only honored when the direct peer matches `trusted_proxies`:
//!
//! - Empty list (default): Only direct connection IP is used (most secure)
//! - List of IPs/CIDRs: Headers trusted only when request comes from these IPs
//! - ["*"]: Trust headers from all sources (NOT recommended for production)

use crate::metrics::{RATE_LIMIT_TRACKED_KEYS, record_rate_limit_decision};
use atelier_core::config::RateLimitConfig;
use atelier_core::{Identity, Subject};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use ipnet::IpNet;
use serde::Serialize;
use std::{
    collections::VecDeque,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub const HEADER_LIMIT: &str = "x-ratelimit-limit";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RESET: &str = "x-ratelimit-reset";

// =============================================================================
// Clock
// =============================================================================

/// Millisecond wall clock used by the limiter.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;
}

/// Unix epoch milliseconds from the system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start_ms)))
    }

    pub fn set(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by_ms: u64) {
        self.0.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Limiter
// =============================================================================

/// Outcome of one admission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    /// Requests still admissible in the current window.
    pub remaining: u32,
    /// Epoch milliseconds at which the oldest in-window request leaves the window.
    pub reset_at: u64,
}

/// In-process sliding-window limiter keyed by `(subject, action)`.
pub struct SlidingWindowLimiter {
    entries: DashMap<(String, String), VecDeque<u64>>,
    clock: Arc<dyn Clock>,
    enabled: bool,
}

impl SlidingWindowLimiter {
    pub fn new(enabled: bool) -> Self {
        Self::with_clock(enabled, Arc::new(SystemClock))
    }

    pub fn with_clock(enabled: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Check and record one request at the current clock time.
    pub fn admit(&self, subject: &str, action: &str, limit: u32, window_ms: u64) -> Decision {
        self.admit_at(subject, action, limit, window_ms, self.clock.now_ms())
    }

    /// Check and record one request at `now_ms`.
    ///
    /// Eviction, the count check and the append all run under the entry's
    /// shard lock, so concurrent callers on the same key cannot both take the
    /// last slot. Denied requests are not recorded.
    pub fn admit_at(
        &self,
        subject: &str,
        action: &str,
        limit: u32,
        window_ms: u64,
        now_ms: u64,
    ) -> Decision {
        if !self.enabled {
            return Decision {
                allowed: true,
                remaining: limit,
                reset_at: now_ms.saturating_add(window_ms),
            };
        }
        if limit == 0 {
            return Decision {
                allowed: false,
                remaining: 0,
                reset_at: now_ms.saturating_add(window_ms),
            };
        }

        let mut entry = self
            .entries
            .entry((subject.to_string(), action.to_string()))
            .or_default();
        let times = entry.value_mut();

        if let Some(cutoff) = now_ms.checked_sub(window_ms) {
            evict_through(times, cutoff);
        }

        if times.len() >= limit as usize {
            let oldest = times.front().copied().unwrap_or(now_ms);
            return Decision {
                allowed: false,
                remaining: 0,
                reset_at: oldest.saturating_add(window_ms),
            };
        }

        // Keep the queue sorted if the wall clock steps backwards.
        let stamp = times.back().map_or(now_ms, |last| now_ms.max(*last));
        times.push_back(stamp);
        let oldest = times.front().copied().unwrap_or(stamp);

        Decision {
            allowed: true,
            remaining: limit - times.len() as u32,
            reset_at: oldest.saturating_add(window_ms),
        }
    }

    /// Drop timestamps older than `horizon_ms` and remove emptied entries.
    /// Returns the number of entries removed.
    pub fn sweep(&self, horizon_ms: u64) -> usize {
        self.sweep_at(horizon_ms, self.clock.now_ms())
    }

    pub fn sweep_at(&self, horizon_ms: u64, now_ms: u64) -> usize {
        let cutoff = now_ms.checked_sub(horizon_ms);
        let mut removed = 0;
        self.entries.retain(|_, times| {
            if let Some(cutoff) = cutoff {
                evict_through(times, cutoff);
            }
            let keep = !times.is_empty();
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of `(subject, action)` entries currently held.
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

fn evict_through(times: &mut VecDeque<u64>, cutoff: u64) {
    while times.front().is_some_and(|t| *t <= cutoff) {
        times.pop_front();
    }
}

// =============================================================================
// Trusted proxies
// =============================================================================

/// A parsed trusted proxy entry (either an IP or CIDR range).
#[derive(Clone, Debug)]
enum TrustedEntry {
    Ip(IpAddr),
    Cidr(IpNet),
}

/// Trusted proxy configuration for IP extraction.
#[derive(Clone, Debug)]
enum TrustedProxies {
    /// Never trust forwarded headers (default, most secure).
    None,
    /// Trust headers from all sources (dangerous, for development only).
    All,
    /// Trust headers only from specific IPs/CIDRs.
    List(Vec<TrustedEntry>),
}

impl TrustedProxies {
    fn from_config(proxies: &[String]) -> Self {
        if proxies.is_empty() {
            return Self::None;
        }
        if proxies.len() == 1 && proxies[0] == "*" {
            return Self::All;
        }
        let entries = proxies
            .iter()
            .filter_map(|p| {
                let parsed = if p.contains('/') {
                    p.parse::<IpNet>()
                        .map(TrustedEntry::Cidr)
                        .map_err(|e| e.to_string())
                } else {
                    p.parse::<IpAddr>()
                        .map(TrustedEntry::Ip)
                        .map_err(|e| e.to_string())
                };
                parsed
                    .inspect_err(|e| tracing::warn!(proxy = %p, error = %e, "Ignoring invalid trusted proxy"))
                    .ok()
            })
            .collect();
        Self::List(entries)
    }

    fn is_trusted(&self, connection_ip: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::List(entries) => {
                let Ok(ip) = connection_ip.parse::<IpAddr>() else {
                    return false;
                };
                entries.iter().any(|entry| match entry {
                    TrustedEntry::Ip(trusted) => *trusted == ip,
                    TrustedEntry::Cidr(network) => network.contains(&ip),
                })
            }
        }
    }
}

/// Client IP from forwarding headers; first X-Forwarded-For hop, then X-Real-IP.
fn extract_forwarded_ip(req: &Request<Body>) -> Option<String> {
    if let Some(forwarded) = req.headers().get("x-forwarded-for")
        && let Ok(s) = forwarded.to_str()
        && let Some(ip) = s.split(',').next()
        && !ip.trim().is_empty()
    {
        return Some(ip.trim().to_string());
    }

    if let Some(real_ip) = req.headers().get("x-real-ip")
        && let Ok(s) = real_ip.to_str()
    {
        return Some(s.trim().to_string());
    }

    None
}

/// Connection IP from request extensions (set by ConnectInfo).
fn extract_connection_ip(req: &Request<Body>) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
}

// =============================================================================
// Middleware state
// =============================================================================

/// Limiter plus the rules and proxy policy the middleware applies.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Arc<RateLimitInner>,
}

struct RateLimitInner {
    limiter: SlidingWindowLimiter,
    config: RateLimitConfig,
    trusted_proxies: TrustedProxies,
    connect_info_warned: AtomicBool,
}

impl RateLimitState {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RateLimitInner {
                limiter: SlidingWindowLimiter::with_clock(config.enabled, clock),
                config: config.clone(),
                trusted_proxies: TrustedProxies::from_config(&config.trusted_proxies),
                connect_info_warned: AtomicBool::new(false),
            }),
        }
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.inner.limiter
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.limiter.is_enabled()
    }

    /// Middleware state binding this limiter to one action name.
    pub fn for_action(&self, action: &'static str) -> ActionLimit {
        ActionLimit {
            state: self.clone(),
            action,
        }
    }

    /// Run one sweep with the configured retention horizon.
    pub fn sweep(&self) -> usize {
        let removed = self
            .inner
            .limiter
            .sweep(self.inner.config.retention_horizon_ms());
        RATE_LIMIT_TRACKED_KEYS.set(self.inner.limiter.tracked_keys() as i64);
        removed
    }

    /// Subject a request is counted against: the resolved identity, or the
    /// client IP for anonymous requests.
    fn subject_for(&self, req: &Request<Body>) -> String {
        if let Some(identity) = req.extensions().get::<Identity>() {
            return identity.subject.as_str().to_string();
        }
        Subject::anonymous(self.client_ip(req)).as_str().to_string()
    }

    fn client_ip(&self, req: &Request<Body>) -> String {
        let connection_ip = extract_connection_ip(req);

        let trust_headers = match (&connection_ip, &self.inner.trusted_proxies) {
            (None, TrustedProxies::All) => true,
            (None, _) => false,
            (Some(conn_ip), proxies) => proxies.is_trusted(conn_ip),
        };

        if trust_headers && let Some(forwarded_ip) = extract_forwarded_ip(req) {
            return forwarded_ip;
        }

        match connection_ip {
            Some(ip) => ip,
            None => {
                self.warn_connect_info_missing();
                "unknown".to_string()
            }
        }
    }

    fn warn_connect_info_missing(&self) {
        if !self.inner.connect_info_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                "ConnectInfo not available for rate limiting. Anonymous requests will share a \
                 single 'ip:unknown' bucket. Serve with \
                 .into_make_service_with_connect_info::<SocketAddr>() to key them per IP."
            );
        }
    }
}

/// Rate limit middleware state for a single action.
#[derive(Clone)]
pub struct ActionLimit {
    state: RateLimitState,
    action: &'static str,
}

/// Denial returned when a request is over its window quota.
#[derive(Debug)]
pub struct RateLimitError {
    pub limit: u32,
    pub reset_at: u64,
    pub retry_after_secs: u64,
}

impl RateLimitError {
    fn new(limit: u32, decision: &Decision, now_ms: u64) -> Self {
        let wait_ms = decision.reset_at.saturating_sub(now_ms);
        Self {
            limit,
            reset_at: decision.reset_at,
            retry_after_secs: wait_ms.div_ceil(1000).max(1),
        }
    }
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": "rate_limited",
            "message": format!(
                "Rate limit exceeded. Retry after {} seconds.",
                self.retry_after_secs
            ),
            "retryable": true,
            "retry_after": self.retry_after_secs,
            "reset_at": self.reset_at,
            "remaining": 0,
        });

        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", self.retry_after_secs.to_string())],
            axum::Json(body),
        )
            .into_response();
        let decision = Decision {
            allowed: false,
            remaining: 0,
            reset_at: self.reset_at,
        };
        apply_headers(response.headers_mut(), self.limit, &decision);
        response
    }
}

fn apply_headers(headers: &mut HeaderMap, limit: u32, decision: &Decision) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(HEADER_RESET, HeaderValue::from(decision.reset_at));
}

/// Per-action rate limiting middleware.
///
/// Must run after the identity middleware so authenticated requests are
/// counted against their subject rather than their IP.
pub async fn rate_limit_middleware(
    State(limit): State<ActionLimit>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let state = &limit.state;
    let rule = state.inner.config.rule_for(limit.action);
    let subject = state.subject_for(&req);
    let now_ms = state.inner.limiter.now_ms();

    let decision = state.inner.limiter.admit_at(
        &subject,
        limit.action,
        rule.limit,
        rule.window_ms,
        now_ms,
    );
    record_rate_limit_decision(limit.action, decision.allowed);

    if !decision.allowed {
        tracing::debug!(
            subject = %subject,
            action = limit.action,
            reset_at = decision.reset_at,
            "Request denied by rate limiter"
        );
        return RateLimitError::new(rule.limit, &decision, now_ms).into_response();
    }

    let mut response = next.run(req).await;
    apply_headers(response.headers_mut(), rule.limit, &decision);
    response
}

/// Spawn a background task that periodically sweeps stale limiter entries.
pub fn spawn_sweep_task(state: RateLimitState, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let removed = state.sweep();
            if removed > 0 {
                tracing::info!(
                    removed,
                    remaining = state.limiter().tracked_keys(),
                    "Rate limiter sweep removed idle entries"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_three_per_minute_example() {
        let limiter = SlidingWindowLimiter::new(true);

        let first = limiter.admit_at("user1", "upload", 3, 60_000, 0);
        let second = limiter.admit_at("user1", "upload", 3, 60_000, 10);
        let third = limiter.admit_at("user1", "upload", 3, 60_000, 20);
        assert!(first.allowed && second.allowed && third.allowed);
        assert_eq!(
            [first.remaining, second.remaining, third.remaining],
            [2, 1, 0]
        );

        let fourth = limiter.admit_at("user1", "upload", 3, 60_000, 30);
        assert!(!fourth.allowed);
        assert_eq!(fourth.remaining, 0);
        assert_eq!(fourth.reset_at, 60_000);

        assert!(limiter.admit_at("user1", "upload", 3, 60_000, 61_000).allowed);
    }

    #[test]
    fn test_admitted_again_exactly_at_reset() {
        let limiter = SlidingWindowLimiter::new(true);
        limiter.admit_at("s", "a", 1, 1_000, 500);
        let denied = limiter.admit_at("s", "a", 1, 1_000, 1_499);
        assert!(!denied.allowed);
        assert_eq!(denied.reset_at, 1_500);
        assert!(limiter.admit_at("s", "a", 1, 1_000, 1_500).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = SlidingWindowLimiter::new(true);
        assert!(limiter.admit_at("alice", "upload", 1, 60_000, 0).allowed);
        assert!(!limiter.admit_at("alice", "upload", 1, 60_000, 1).allowed);
        assert!(limiter.admit_at("alice", "delete", 1, 60_000, 1).allowed);
        assert!(limiter.admit_at("bob", "upload", 1, 60_000, 1).allowed);
    }

    #[test]
    fn test_denials_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(true);
        limiter.admit_at("s", "a", 2, 100, 0);
        limiter.admit_at("s", "a", 2, 100, 50);
        for t in 51..99 {
            assert!(!limiter.admit_at("s", "a", 2, 100, t).allowed);
        }
        let next = limiter.admit_at("s", "a", 2, 100, 100);
        assert!(next.allowed);
        assert_eq!(next.reset_at, 150);
    }

    #[test]
    fn test_zero_limit_always_denies() {
        let limiter = SlidingWindowLimiter::new(true);
        let d = limiter.admit_at("s", "a", 0, 5_000, 1_000);
        assert!(!d.allowed);
        assert_eq!(d.reset_at, 6_000);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_disabled_admits_everything() {
        let limiter = SlidingWindowLimiter::new(false);
        for t in 0..10 {
            let d = limiter.admit_at("s", "a", 2, 1_000, t);
            assert!(d.allowed);
            assert_eq!(d.remaining, 2);
        }
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_clock_stepping_backwards_keeps_order() {
        let limiter = SlidingWindowLimiter::new(true);
        limiter.admit_at("s", "a", 3, 1_000, 5_000);
        let d = limiter.admit_at("s", "a", 3, 1_000, 4_000);
        assert!(d.allowed);
        assert_eq!(d.reset_at, 6_000);
        assert!(limiter.admit_at("s", "a", 3, 1_000, 6_001).allowed);
        assert_eq!(limiter.admit_at("s", "a", 3, 1_000, 6_002).remaining, 1);
    }

    #[test]
    fn test_manual_clock_drives_admit() {
        let clock = ManualClock::new(0);
        let limiter = SlidingWindowLimiter::with_clock(true, Arc::new(clock.clone()));
        assert!(limiter.admit("s", "a", 1, 1_000).allowed);
        clock.advance(999);
        assert!(!limiter.admit("s", "a", 1, 1_000).allowed);
        clock.set(1_000);
        assert!(limiter.admit("s", "a", 1, 1_000).allowed);
    }

    #[test]
    fn test_sweep_drops_idle_entries_only() {
        let limiter = SlidingWindowLimiter::new(true);
        limiter.admit_at("old", "a", 5, 1_000, 0);
        limiter.admit_at("mixed", "a", 5, 1_000, 0);
        limiter.admit_at("mixed", "a", 5, 1_000, 9_500);
        limiter.admit_at("fresh", "a", 5, 1_000, 9_900);
        assert_eq!(limiter.tracked_keys(), 3);

        let removed = limiter.sweep_at(2_000, 10_000);
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_keys(), 2);

        // Surviving entries still count their in-window requests.
        let d = limiter.admit_at("mixed", "a", 5, 1_000, 10_000);
        assert_eq!(d.remaining, 3);
    }

    #[test]
    fn test_sweep_before_horizon_elapsed_keeps_everything() {
        let limiter = SlidingWindowLimiter::new(true);
        limiter.admit_at("s", "a", 5, 1_000, 10);
        assert_eq!(limiter.sweep_at(120_000, 50), 0);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_concurrent_admits_never_exceed_limit() {
        let limiter = Arc::new(SlidingWindowLimiter::new(true));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || {
                    (0..100)
                        .filter(|_| limiter.admit_at("s", "a", 50, 60_000, 1_000).allowed)
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let decision = Decision {
            allowed: false,
            remaining: 0,
            reset_at: 61_001,
        };
        assert_eq!(RateLimitError::new(3, &decision, 1_000).retry_after_secs, 61);
        assert_eq!(RateLimitError::new(3, &decision, 61_000).retry_after_secs, 1);
        assert_eq!(RateLimitError::new(3, &decision, 70_000).retry_after_secs, 1);
    }

    #[test]
    fn test_anonymous_subject_uses_forwarded_ip_from_trusted_proxy() {
        let config = RateLimitConfig {
            trusted_proxies: vec!["10.0.0.0/8".to_string()],
            ..Default::default()
        };
        let state = RateLimitState::new(&config);

        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.2")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 1, 2, 3], 4000))));
        assert_eq!(state.subject_for(&req), "ip:203.0.113.7");

        let mut req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        assert_eq!(state.subject_for(&req), "ip:192.0.2.1");
    }

    #[test]
    fn test_identity_subject_wins_over_ip() {
        let state = RateLimitState::new(&RateLimitConfig::default());
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut().insert(Identity::new(
            Subject::parse("alice").unwrap(),
            false,
        ));
        assert_eq!(state.subject_for(&req), "alice");
    }

    #[test]
    fn test_trusted_proxies_none() {
        let proxies = TrustedProxies::from_config(&[]);
        assert!(!proxies.is_trusted("127.0.0.1"));
        assert!(!proxies.is_trusted("10.0.0.1"));
    }

    #[test]
    fn test_trusted_proxies_all() {
        let proxies = TrustedProxies::from_config(&["*".to_string()]);
        assert!(proxies.is_trusted("127.0.0.1"));
        assert!(proxies.is_trusted("anything"));
    }

    #[test]
    fn test_trusted_proxies_list() {
        let proxies = TrustedProxies::from_config(&[
            "127.0.0.1".to_string(),
            "10.0.0.0/8".to_string(),
            "not-an-ip".to_string(),
        ]);
        assert!(proxies.is_trusted("127.0.0.1"));
        assert!(proxies.is_trusted("10.255.255.255"));
        assert!(!proxies.is_trusted("192.168.1.1"));
        assert!(!proxies.is_trusted("11.0.0.1"));
    }
}
