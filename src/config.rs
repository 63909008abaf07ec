//! Configuration management for Ratekeeper.

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{RateLimitError, Result};
use crate::ratelimit::{AlgorithmKind, FailureMode, Policy, StoreKind, DEFAULT_BUCKET};

/// Main configuration for the Ratekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Expose the admin endpoints
    #[serde(default = "default_true")]
    pub admin_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            admin_enabled: true,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_true() -> bool {
    true
}

/// Logging configuration. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Disable to pass every request through untouched
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Store used by buckets that do not name one
    #[serde(default)]
    pub storage_type: StoreKind,

    /// Limit of the implicit `default` bucket
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u64,

    /// Algorithm used by buckets that do not name one
    #[serde(default)]
    pub default_algorithm: AlgorithmKind,

    #[serde(default)]
    pub failure_mode: FailureMode,

    /// Named buckets
    #[serde(default)]
    pub limits: BTreeMap<String, LimitConfig>,

    /// Path prefix to bucket mapping for the HTTP middleware
    #[serde(default)]
    pub routes: Vec<RouteConfig>,

    /// Headers set by a trusted reverse proxy that carry the client address,
    /// consulted in order. When empty the peer address is always used.
    #[serde(default)]
    pub trusted_proxy_headers: Vec<String>,

    /// Key requests by their bearer or `X-API-Key` token. Only safe when an
    /// upstream layer has already verified the token.
    #[serde(default)]
    pub key_by_api_token: bool,

    #[serde(default)]
    pub memory: MemoryStoreConfig,

    #[serde(default)]
    pub redis: RedisStoreConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_type: StoreKind::default(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            default_algorithm: AlgorithmKind::default(),
            failure_mode: FailureMode::default(),
            limits: BTreeMap::new(),
            routes: Vec::new(),
            trusted_proxy_headers: Vec::new(),
            key_by_api_token: false,
            memory: MemoryStoreConfig::default(),
            redis: RedisStoreConfig::default(),
        }
    }
}

fn default_rate_limit_per_minute() -> u64 {
    60
}

/// One named bucket.
///
/// Counter algorithms read `requests` and `window`; the token bucket reads
/// `capacity` and `refill_rate`, falling back to `requests` per `window`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitConfig {
    #[serde(default)]
    pub requests: Option<u64>,

    /// Window length in seconds
    #[serde(default = "default_window")]
    pub window: u64,

    #[serde(default)]
    pub algorithm: Option<AlgorithmKind>,

    #[serde(default)]
    pub capacity: Option<u64>,

    /// Tokens per second
    #[serde(default)]
    pub refill_rate: Option<f64>,

    #[serde(default)]
    pub storage_type: Option<StoreKind>,
}

fn default_window() -> u64 {
    60
}

/// Requests whose path starts with `prefix` are limited by `bucket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub prefix: String,
    pub bucket: String,
}

/// In-process store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Shard count, a power of two. Defaults to the DashMap heuristic.
    #[serde(default)]
    pub shards: Option<usize>,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            shards: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl MemoryStoreConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_sweep_interval() -> u64 {
    30
}

/// Redis store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Bound on every store operation, in milliseconds
    #[serde(default = "default_redis_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            timeout_ms: default_redis_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RedisStoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_redis_timeout() -> u64 {
    50
}

fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}

impl RatekeeperConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RatekeeperConfig =
            serde_yaml::from_str(yaml).map_err(|e| RateLimitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Layered load: the optional YAML file, then `RATEKEEPER__*`
    /// environment variables (`RATEKEEPER__RATE_LIMITING__FAILURE_MODE=fail_closed`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(true));
        }
        let config: RatekeeperConfig = builder
            .add_source(
                ::config::Environment::with_prefix("RATEKEEPER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateLimitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could not be served.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.validate()
    }
}

impl RateLimitingConfig {
    /// Parse the `rate_limiting` section on its own.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateLimitingConfig =
            serde_yaml::from_str(yaml).map_err(|e| RateLimitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for name in &self.trusted_proxy_headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(RateLimitError::Validation(format!(
                    "trusted proxy header '{name}' is not a valid header name"
                )));
            }
        }
        self.policies().map(|_| ())
    }

    /// Every bucket as a validated policy plus the store that holds it.
    ///
    /// A `default` bucket is always present; unless configured explicitly
    /// it allows `rate_limit_per_minute` requests per minute.
    pub fn policies(&self) -> Result<Vec<(Policy, StoreKind)>> {
        let mut policies = Vec::with_capacity(self.limits.len() + 1);

        if !self.limits.contains_key(DEFAULT_BUCKET) {
            let fallback = LimitConfig {
                requests: Some(self.rate_limit_per_minute),
                window: 60,
                ..LimitConfig::default()
            };
            policies.push((self.policy(DEFAULT_BUCKET, &fallback)?, self.storage_type));
        }

        for (bucket, limit) in &self.limits {
            let store = limit.storage_type.unwrap_or(self.storage_type);
            policies.push((self.policy(bucket, limit)?, store));
        }

        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                return Err(RateLimitError::Validation(format!(
                    "route prefix '{}' must start with '/'",
                    route.prefix
                )));
            }
            if !policies.iter().any(|(p, _)| p.bucket() == route.bucket) {
                return Err(RateLimitError::Validation(format!(
                    "route '{}' references unknown bucket '{}'",
                    route.prefix, route.bucket
                )));
            }
        }

        Ok(policies)
    }

    fn policy(&self, bucket: &str, limit: &LimitConfig) -> Result<Policy> {
        let window = Duration::from_secs(limit.window);
        match limit.algorithm.unwrap_or(self.default_algorithm) {
            AlgorithmKind::FixedWindow => Policy::fixed_window(bucket, required_requests(bucket, limit)?, window),
            AlgorithmKind::SlidingWindow => Policy::sliding_window(bucket, required_requests(bucket, limit)?, window),
            AlgorithmKind::TokenBucket => {
                let capacity = match limit.capacity.or(limit.requests) {
                    Some(capacity) => capacity,
                    None => {
                        return Err(RateLimitError::Validation(format!(
                            "bucket '{bucket}' needs a capacity"
                        )))
                    }
                };
                let refill_rate = match limit.refill_rate {
                    Some(rate) => rate,
                    None if limit.window > 0 => limit.requests.unwrap_or(capacity) as f64 / limit.window as f64,
                    None => {
                        return Err(RateLimitError::Validation(format!(
                            "bucket '{bucket}' needs a refill_rate"
                        )))
                    }
                };
                Policy::token_bucket(bucket, capacity, refill_rate)
            }
        }
    }
}

fn required_requests(bucket: &str, limit: &LimitConfig) -> Result<u64> {
    limit
        .requests
        .ok_or_else(|| RateLimitError::Validation(format!("bucket '{bucket}' needs a requests limit")))
}
