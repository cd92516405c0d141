//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally reachable base URL, used to build filesystem write-grant URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, ensure this endpoint is network-restricted
    /// to authorized Prometheus scraper IPs only at the infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Per-topic broadcast capacity of the change feed.
    #[serde(default = "default_feed_buffer")]
    pub feed_buffer: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_feed_buffer() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: default_public_base_url(),
            metrics_enabled: default_metrics_enabled(),
            feed_buffer: default_feed_buffer(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.feed_buffer == 0 {
            return Err("server.feed_buffer must be greater than 0".to_string());
        }
        if !(self.public_base_url.starts_with("http://")
            || self.public_base_url.starts_with("https://"))
        {
            return Err(format!(
                "server.public_base_url must be an http(s) URL, got {:?}",
                self.public_base_url
            ));
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            _ => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        /// Logs warnings for queries exceeding this duration.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Upload admission policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Accepted content types: exact `type/subtype` or `type/*` wildcards.
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    /// Hard ceiling on declared size.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    /// Lifetime of a write grant in seconds.
    #[serde(default = "default_credential_ttl_secs")]
    pub credential_ttl_secs: u64,
    /// Check that the object exists and fits the declared size before confirming.
    #[serde(default = "default_verify_on_confirm")]
    pub verify_on_confirm: bool,
    #[serde(default = "default_max_filename_len")]
    pub max_filename_len: usize,
}

fn default_allowed_content_types() -> Vec<String> {
    [
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/webp",
        "application/pdf",
        "video/mp4",
        "video/webm",
        "text/plain",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_max_size_bytes() -> u64 {
    50 * 1024 * 1024 // 50 MiB
}

fn default_credential_ttl_secs() -> u64 {
    900 // 15 minutes
}

fn default_verify_on_confirm() -> bool {
    true
}

fn default_max_filename_len() -> usize {
    255
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: default_allowed_content_types(),
            max_size_bytes: default_max_size_bytes(),
            credential_ttl_secs: default_credential_ttl_secs(),
            verify_on_confirm: default_verify_on_confirm(),
            max_filename_len: default_max_filename_len(),
        }
    }
}

impl UploadConfig {
    pub fn credential_ttl(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.credential_ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_size_bytes == 0 {
            return Err("uploads.max_size_bytes must be greater than 0".to_string());
        }
        if self.credential_ttl_secs == 0 {
            return Err("uploads.credential_ttl_secs must be greater than 0".to_string());
        }
        // S3 presigned URLs cannot outlive 7 days.
        if self.credential_ttl_secs > 7 * 24 * 3600 {
            return Err(format!(
                "uploads.credential_ttl_secs {} exceeds the 7 day maximum",
                self.credential_ttl_secs
            ));
        }
        if self.allowed_content_types.is_empty() {
            return Err("uploads.allowed_content_types cannot be empty".to_string());
        }
        if self.max_filename_len == 0 {
            return Err("uploads.max_filename_len must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Orphan reclamation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReclaimConfig {
    /// Run reclamation passes on a schedule.
    #[serde(default = "default_reclaim_enabled")]
    pub enabled: bool,
    /// Interval in seconds between scheduled passes (default: 1 hour).
    #[serde(default = "default_reclaim_interval_secs")]
    pub interval_secs: u64,
    /// Age after which an unconfirmed record counts as orphaned (default: 24 hours).
    #[serde(default = "default_orphan_retention_secs")]
    pub orphan_retention_secs: u64,
    /// Maximum orphans reclaimed per pass.
    #[serde(default = "default_reclaim_batch_size")]
    pub batch_size: u32,
    /// Also delete content-store objects that have no metadata record.
    /// Lists every object under the asset prefix, so it is off by default.
    #[serde(default)]
    pub sweep_stray_objects: bool,
    /// Minimum age of a stray object before it is swept.
    #[serde(default = "default_stray_grace_secs")]
    pub stray_grace_secs: u64,
}

fn default_reclaim_enabled() -> bool {
    true
}

fn default_reclaim_interval_secs() -> u64 {
    3600
}

fn default_orphan_retention_secs() -> u64 {
    86400
}

fn default_reclaim_batch_size() -> u32 {
    500
}

fn default_stray_grace_secs() -> u64 {
    86400
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            enabled: default_reclaim_enabled(),
            interval_secs: default_reclaim_interval_secs(),
            orphan_retention_secs: default_orphan_retention_secs(),
            batch_size: default_reclaim_batch_size(),
            sweep_stray_objects: false,
            stray_grace_secs: default_stray_grace_secs(),
        }
    }
}

impl ReclaimConfig {
    pub fn orphan_retention(&self) -> Duration {
        Duration::seconds(i64::try_from(self.orphan_retention_secs).unwrap_or(i64::MAX))
    }

    pub fn stray_grace(&self) -> Duration {
        Duration::seconds(i64::try_from(self.stray_grace_secs).unwrap_or(i64::MAX))
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    /// Returns warnings for risky but allowed settings.
    pub fn validate(&self, upload_ttl_secs: u64) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.enabled && self.interval_secs == 0 {
            return Err("reclaim.interval_secs cannot be 0 when reclaim is enabled".to_string());
        }
        if self.batch_size == 0 {
            return Err("reclaim.batch_size must be greater than 0".to_string());
        }
        if self.orphan_retention_secs <= upload_ttl_secs {
            warnings.push(format!(
                "reclaim.orphan_retention_secs={} does not exceed uploads.credential_ttl_secs={}. \
                 Reservations may be reclaimed while their write grant is still valid.",
                self.orphan_retention_secs, upload_ttl_secs
            ));
        }
        if self.sweep_stray_objects && self.stray_grace_secs <= upload_ttl_secs {
            warnings.push(format!(
                "reclaim.stray_grace_secs={} does not exceed uploads.credential_ttl_secs={}. \
                 In-flight transfers may be swept as stray objects.",
                self.stray_grace_secs, upload_ttl_secs
            ));
        }
        Ok(warnings)
    }
}

/// A single sliding-window rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Maximum requests admitted within the window.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimitRule {
    pub const fn new(limit: u32, window_ms: u64) -> Self {
        Self { limit, window_ms }
    }
}

/// Rate limiting configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Rules keyed by action name (e.g. `asset.reserve`).
    #[serde(default = "default_rules")]
    pub rules: BTreeMap<String, RateLimitRule>,
    /// Rule applied to actions without an explicit entry.
    #[serde(default = "default_rule")]
    pub default_rule: RateLimitRule,
    /// Interval in seconds between sweeps of stale entries (default: 60).
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Timestamps older than this are dropped by the sweep. Defaults to twice the
    /// longest configured window, with a floor of two minutes.
    #[serde(default)]
    pub retention_horizon_ms: Option<u64>,
    /// Trusted proxy IP addresses/CIDR ranges.
    /// Only requests from these IPs will have X-Forwarded-For/X-Real-IP headers trusted.
    /// If empty, forwarded headers are never trusted (only direct connection IP is used).
    /// Use ["*"] to trust all proxies (NOT recommended for production).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_rules() -> BTreeMap<String, RateLimitRule> {
    [
        ("asset.reserve", RateLimitRule::new(30, 60_000)),
        ("asset.confirm", RateLimitRule::new(60, 60_000)),
        ("asset.delete", RateLimitRule::new(30, 60_000)),
        ("asset.attach", RateLimitRule::new(60, 60_000)),
        ("entity.register", RateLimitRule::new(30, 60_000)),
        ("entity.delete", RateLimitRule::new(30, 60_000)),
    ]
    .into_iter()
    .map(|(action, rule)| (action.to_string(), rule))
    .collect()
}

fn default_rule() -> RateLimitRule {
    RateLimitRule::new(120, 60_000)
}

fn default_sweep_interval_secs() -> u64 {
    60
}

const MIN_RETENTION_HORIZON_MS: u64 = 120_000;

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            rules: default_rules(),
            default_rule: default_rule(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retention_horizon_ms: None,
            trusted_proxies: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    /// Rule for `action`, falling back to the default rule.
    pub fn rule_for(&self, action: &str) -> RateLimitRule {
        self.rules.get(action).copied().unwrap_or(self.default_rule)
    }

    fn longest_window_ms(&self) -> u64 {
        self.rules
            .values()
            .map(|r| r.window_ms)
            .chain(std::iter::once(self.default_rule.window_ms))
            .max()
            .unwrap_or(0)
    }

    /// Effective retention horizon for the background sweep.
    pub fn retention_horizon_ms(&self) -> u64 {
        self.retention_horizon_ms.unwrap_or_else(|| {
            self.longest_window_ms()
                .saturating_mul(2)
                .max(MIN_RETENTION_HORIZON_MS)
        })
    }

    /// Validate rate limit configuration for dangerous settings.
    /// Returns warnings for configs that are insecure but allowed,
    /// and errors for configs that are unsafe and should be rejected.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !self.enabled {
            return Ok(warnings);
        }

        // Error on zero sweep interval (would cause tokio::time::interval to panic)
        if self.sweep_interval_secs == 0 {
            return Err("rate_limit.sweep_interval_secs cannot be 0. \
                 This would cause a panic when creating the sweep timer. \
                 Use a value >= 1 second."
                .to_string());
        }

        let rules = self
            .rules
            .iter()
            .map(|(action, rule)| (action.as_str(), rule))
            .chain(std::iter::once(("default_rule", &self.default_rule)));
        for (action, rule) in rules {
            if rule.limit == 0 {
                return Err(format!(
                    "rate_limit rule {action:?} has limit 0, which denies every request"
                ));
            }
            if rule.window_ms == 0 {
                return Err(format!("rate_limit rule {action:?} has a zero window"));
            }
        }

        let horizon = self.retention_horizon_ms();
        let longest = self.longest_window_ms();
        if horizon < longest {
            return Err(format!(
                "rate_limit.retention_horizon_ms={horizon} is shorter than the longest \
                 window ({longest} ms). The sweep would forget in-window requests."
            ));
        }

        // Warn about trusting all proxies
        if self.trusted_proxies.len() == 1 && self.trusted_proxies[0] == "*" {
            warnings.push(
                "rate_limit.trusted_proxies=['*'] trusts ALL forwarded headers. \
                 This allows clients to spoof their IP address and bypass rate limits. \
                 Only use this setting in development or behind a trusted reverse proxy."
                    .to_string(),
            );
        }

        Ok(warnings)
    }
}

/// A bearer token mapped to a subject by the static identity provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubjectConfig {
    /// SHA256 hex of the bearer token.
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    pub subject_id: String,
    #[serde(default)]
    pub elevated: bool,
}

/// Identity collaborator configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub subjects: Vec<SubjectConfig>,
}

impl IdentityConfig {
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        for entry in &self.subjects {
            if entry.token_hash.len() != 64
                || !entry.token_hash.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(format!(
                    "identity.subjects entry for {:?} must have a 64 character sha256 hex token_hash",
                    entry.subject_id
                ));
            }
            if entry.subject_id.trim().is_empty() {
                return Err("identity.subjects entry has an empty subject_id".to_string());
            }
        }
        if self.subjects.is_empty() {
            warnings.push(
                "identity.subjects is empty; every request will be anonymous".to_string(),
            );
        }
        Ok(warnings)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub reclaim: ReclaimConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// no scheduled reclamation and three static subjects: `test-user-token` (`alice`),
    /// `test-other-token` (`bob`) and `test-admin-token` (`admin`, elevated).
    pub fn for_testing() -> Self {
        Self {
            reclaim: ReclaimConfig {
                enabled: false,
                ..ReclaimConfig::default()
            },
            identity: IdentityConfig {
                subjects: vec![
                    SubjectConfig {
                        // SHA256 of "test-user-token"
                        token_hash:
                            "19bbb7d9c45e18a41bced9a036616e2ed096ec57adf02379c46b98edf356b156"
                                .to_string(),
                        subject_id: "alice".to_string(),
                        elevated: false,
                    },
                    SubjectConfig {
                        // SHA256 of "test-other-token"
                        token_hash:
                            "cf2eb6ac53daa504ef573b47bb3b5298fb2f7b45742a067774b5d257afead772"
                                .to_string(),
                        subject_id: "bob".to_string(),
                        elevated: false,
                    },
                    SubjectConfig {
                        // SHA256 of "test-admin-token"
                        token_hash:
                            "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                                .to_string(),
                        subject_id: "admin".to_string(),
                        elevated: true,
                    },
                ],
            },
            ..Self::default()
        }
    }

    /// Validate the whole configuration, collecting warnings.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();
        self.server.validate()?;
        self.storage.validate()?;
        self.uploads.validate()?;
        warnings.extend(self.reclaim.validate(self.uploads.credential_ttl_secs)?);
        warnings.extend(self.rate_limit.validate()?);
        warnings.extend(self.identity.validate()?);
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults_metrics_enabled() {
        let config = ServerConfig::default();
        assert!(config.metrics_enabled);
        assert_eq!(config.feed_buffer, 256);
    }

    #[test]
    fn test_storage_config_s3_validate_partial_credentials() {
        let invalid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        assert!(invalid.validate().is_err());

        let valid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: Some("secret-key".to_string()),
            force_path_style: false,
        };
        assert!(valid.validate().is_ok());
    }

    #[test]
    fn test_storage_config_s3_force_path_style_defaults_to_false() {
        let json = r#"{"type":"s3","bucket":"test","endpoint":"https://s3.amazonaws.com"}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();

        match config {
            StorageConfig::S3 {
                force_path_style, ..
            } => assert!(!force_path_style),
            _ => panic!("expected S3 config"),
        }
    }

    #[test]
    fn test_upload_config_defaults() {
        let config = UploadConfig::default();
        assert_eq!(config.max_size_bytes, 50 * 1024 * 1024);
        assert_eq!(config.credential_ttl(), Duration::minutes(15));
        assert!(config.verify_on_confirm);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rate_limit_rule_lookup_falls_back_to_default() {
        let config = RateLimitConfig::default();
        assert_eq!(config.rule_for("asset.reserve"), RateLimitRule::new(30, 60_000));
        assert_eq!(config.rule_for("something.else"), config.default_rule);
    }

    #[test]
    fn test_rate_limit_retention_horizon_default() {
        let mut config = RateLimitConfig::default();
        assert_eq!(config.retention_horizon_ms(), 120_000);

        config
            .rules
            .insert("asset.bulk".to_string(), RateLimitRule::new(5, 3_600_000));
        assert_eq!(config.retention_horizon_ms(), 7_200_000);
    }

    #[test]
    fn test_rate_limit_validate_rejects_zero_values() {
        let mut config = RateLimitConfig::default();
        config.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = RateLimitConfig::default();
        config
            .rules
            .insert("asset.reserve".to_string(), RateLimitRule::new(0, 60_000));
        assert!(config.validate().is_err());

        let mut config = RateLimitConfig::default();
        config.default_rule = RateLimitRule::new(10, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_validate_rejects_short_horizon() {
        let config = RateLimitConfig {
            retention_horizon_ms: Some(30_000),
            ..RateLimitConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_validate_warns_on_wildcard_proxy() {
        let config = RateLimitConfig {
            trusted_proxies: vec!["*".to_string()],
            ..RateLimitConfig::default()
        };
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_rate_limit_rules_deserialize_from_toml_like_json() {
        let json = r#"{"rules":{"asset.reserve":{"limit":3,"window_ms":60000}}}"#;
        let config: RateLimitConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.rule_for("asset.reserve"), RateLimitRule::new(3, 60_000));
        assert_eq!(config.rules.len(), 1);
    }

    #[test]
    fn test_reclaim_validate_warns_when_retention_below_ttl() {
        let config = ReclaimConfig {
            orphan_retention_secs: 60,
            ..ReclaimConfig::default()
        };
        let warnings = config.validate(900).unwrap();
        assert_eq!(warnings.len(), 1);

        let zero_batch = ReclaimConfig {
            batch_size: 0,
            ..ReclaimConfig::default()
        };
        assert!(zero_batch.validate(900).is_err());
    }

    #[test]
    fn test_identity_validate_rejects_bad_hash() {
        let config = IdentityConfig {
            subjects: vec![SubjectConfig {
                token_hash: "abc".to_string(),
                subject_id: "alice".to_string(),
                elevated: false,
            }],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_testing_config_is_valid() {
        let config = AppConfig::for_testing();
        assert!(config.validate().is_ok());
        assert!(!config.reclaim.enabled);
        assert_eq!(config.identity.subjects.len(), 3);
    }
}
