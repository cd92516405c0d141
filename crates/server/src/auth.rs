//! Identity resolution middleware.
//!
//! The server never decides who a caller is on its own: an [`IdentityProvider`]
//! maps the bearer token to an [`Identity`] that handlers, the coordinator and
//! the rate limiter all read from request extensions.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use async_trait::async_trait;
use atelier_core::config::IdentityConfig;
use atelier_core::{Identity, Subject};
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// The value is truncated to MAX_TRACE_ID_LEN characters and non-printable
    /// characters are removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps a bearer token to the identity it stands for.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` when the token is unknown.
    async fn resolve(&self, bearer_token: &str) -> Option<Identity>;
}

/// Identity provider backed by a fixed table of token hashes.
#[derive(Clone, Debug, Default)]
pub struct StaticIdentityProvider {
    by_hash: HashMap<String, Identity>,
}

impl StaticIdentityProvider {
    pub fn from_config(config: &IdentityConfig) -> Self {
        let by_hash = config
            .subjects
            .iter()
            .filter_map(|entry| match Subject::parse(&entry.subject_id) {
                Ok(subject) => Some((
                    entry.token_hash.to_ascii_lowercase(),
                    Identity::new(subject, entry.elevated),
                )),
                Err(e) => {
                    tracing::warn!(
                        subject_id = %entry.subject_id,
                        error = %e,
                        "Ignoring identity entry with invalid subject"
                    );
                    None
                }
            })
            .collect();
        Self { by_hash }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, bearer_token: &str) -> Option<Identity> {
        self.by_hash.get(&hash_token(bearer_token)).cloned()
    }
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|token| !token.is_empty())
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// SHA-256 hex digest of a token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Resolves the caller's identity and runs the request inside a traced span.
///
/// Unknown tokens leave the request anonymous; handlers that need an identity
/// reject it, and the rate limiter keys it by client IP.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let trace_id_str = trace_id.0.clone();
    req.extensions_mut().insert(trace_id);

    let identity = match extract_bearer_token(&req) {
        Some(token) => state.identity.resolve(token).await,
        None => None,
    };

    let subject = identity
        .as_ref()
        .map(|i| i.subject.to_string())
        .unwrap_or_default();
    if let Some(identity) = identity {
        req.extensions_mut().insert(identity);
    } else if req.headers().contains_key(AUTHORIZATION) {
        tracing::debug!(trace_id = %trace_id_str, "Bearer token did not resolve to an identity");
    }

    next.run(req)
        .instrument(tracing::info_span!(
            "request",
            trace_id = %trace_id_str,
            subject = %subject
        ))
        .await
}

/// Require a resolved identity.
pub fn require_identity(req: &Request) -> ApiResult<Identity> {
    get_identity(req)
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

/// Require an identity with elevated privilege.
pub fn require_elevated(req: &Request) -> ApiResult<Identity> {
    let identity = require_identity(req)?;
    if !identity.elevated {
        return Err(ApiError::Forbidden("elevated privilege required".to_string()));
    }
    Ok(identity)
}

/// Get the identity if one was resolved.
pub fn get_identity(req: &Request) -> Option<&Identity> {
    req.extensions().get::<Identity>()
}

/// Get the trace ID from request extensions.
pub fn get_trace_id(req: &Request) -> Option<&TraceId> {
    req.extensions().get::<TraceId>()
}
