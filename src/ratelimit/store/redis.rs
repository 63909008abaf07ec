//! Redis-backed store.
//!
//! Each check is one `EVALSHA` of an algorithm-specific Lua script, so the
//! whole read-modify-write runs atomically inside Redis in a single round
//! trip. Entries are hashes that expire after the policy's retention.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ErrorKind, RedisError, Script};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use super::Store;
use crate::error::{RateLimitError, Result};
use crate::ratelimit::algorithm::Algorithm;
use crate::ratelimit::entry::RateLimitEntry;
use crate::ratelimit::policy::{Limits, Policy};

/// `(allowed, count, previous_count, window_start, tokens, last_refill, created_at, updated_at)`
type ScriptReply = (i64, i64, i64, String, String, String, String, String);

/// Largest expiry the scripts pass through a Lua number without losing
/// integer precision.
const MAX_EXPIRE_MS: u64 = 1 << 53;

/// Shared rate limit store in Redis.
pub struct RedisStore {
    client: redis::Client,
    /// Cached multiplexed connection, dropped after I/O failures
    connection: Mutex<Option<MultiplexedConnection>>,
    key_prefix: String,
    timeout: Duration,
    fixed_window: Script,
    sliding_window: Script,
    token_bucket: Script,
}

impl RedisStore {
    /// Create a store. No connection is made until the first operation.
    pub fn new(url: &str, key_prefix: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| RateLimitError::Config(format!("invalid redis url: {e}")))?;
        if timeout.is_zero() {
            return Err(RateLimitError::Validation(
                "redis timeout must be greater than 0".to_string(),
            ));
        }

        info!(timeout_ms = timeout.as_millis() as u64, "Redis rate limit store configured");

        Ok(Self {
            client,
            connection: Mutex::new(None),
            key_prefix: key_prefix.into(),
            timeout,
            fixed_window: Script::new(include_str!("scripts/fixed_window.lua")),
            sliding_window: Script::new(include_str!("scripts/sliding_window.lua")),
            token_bucket: Script::new(include_str!("scripts/token_bucket.lua")),
        })
    }

    /// The per-operation deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let cached = self.connection.lock().clone();
        if let Some(conn) = cached {
            return Ok(conn);
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| self.classify(e))?;
        debug!("Opened redis connection");
        *self.connection.lock() = Some(conn.clone());
        Ok(conn)
    }

    /// Map a Redis error onto the store taxonomy.
    ///
    /// Malformed replies mean the stored state cannot be trusted; everything
    /// else is treated as the server being unreachable.
    fn classify(&self, e: RedisError) -> RateLimitError {
        if e.kind() == ErrorKind::TypeError {
            return RateLimitError::InternalStore(format!("redis store: malformed reply: {e}"));
        }
        if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
            self.connection.lock().take();
        }
        RateLimitError::StoreUnavailable(format!("redis: {e}"))
    }

    /// Run `op` under the store's deadline.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                self.connection.lock().take();
                Err(RateLimitError::StoreUnavailable(format!(
                    "redis {op} timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    fn decode(&self, key: &str, reply: ScriptReply, policy: &Policy) -> Result<(bool, RateLimitEntry)> {
        let (allowed, count, previous, window_start, tokens, last_refill, created_at, updated_at) = reply;
        let entry = RateLimitEntry::restore(
            key,
            parse_f64(&window_start)?,
            count,
            previous,
            parse_f64(&tokens)?,
            parse_f64(&last_refill)?,
            parse_f64(&created_at)?,
            parse_f64(&updated_at)?,
            policy.capacity(),
        )
        .map_err(|e| RateLimitError::InternalStore(format!("redis store: {e}")))?;
        Ok((allowed == 1, entry))
    }
}

/// Key expiry for `policy` in milliseconds, clamped to what `PEXPIRE` accepts.
fn expire_ms(policy: &Policy) -> u64 {
    u64::try_from(policy.retention().as_millis())
        .unwrap_or(u64::MAX)
        .min(MAX_EXPIRE_MS)
}

fn parse_f64(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|_| RateLimitError::InternalStore(format!("redis store: '{raw}' is not a number")))
}

fn field(fields: &HashMap<String, String>, name: &str) -> Result<f64> {
    fields.get(name).map(|v| parse_f64(v)).unwrap_or(Ok(0.0))
}

fn count_field(fields: &HashMap<String, String>, name: &str) -> Result<i64> {
    match fields.get(name) {
        Some(v) => v
            .parse::<i64>()
            .map_err(|_| RateLimitError::InternalStore(format!("redis store: '{v}' is not a count"))),
        None => Ok(0),
    }
}

#[async_trait]
impl Store for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn increment_and_check(
        &self,
        key: &str,
        algorithm: &dyn Algorithm,
        policy: &Policy,
        now: f64,
    ) -> Result<(bool, RateLimitEntry)> {
        if algorithm.kind() != policy.algorithm() {
            return Err(RateLimitError::Validation(format!(
                "algorithm {} does not match policy {}",
                algorithm.kind(),
                policy.algorithm()
            )));
        }

        let (script, first, second) = match *policy.limits() {
            Limits::FixedWindow { limit, window } => (&self.fixed_window, limit as f64, window.as_secs_f64()),
            Limits::SlidingWindow { limit, window } => (&self.sliding_window, limit as f64, window.as_secs_f64()),
            Limits::TokenBucket { capacity, refill_rate } => (&self.token_bucket, capacity as f64, refill_rate),
        };
        let retention_ms = expire_ms(policy);
        let redis_key = self.redis_key(key);

        let reply: ScriptReply = self
            .bounded("increment_and_check", async {
                let mut conn = self.connection().await?;
                let reply: redis::RedisResult<ScriptReply> = script
                    .key(&redis_key)
                    .arg(first)
                    .arg(second)
                    .arg(now)
                    .arg(retention_ms)
                    .invoke_async(&mut conn)
                    .await;
                reply.map_err(|e| self.classify(e))
            })
            .await?;

        self.decode(key, reply, policy)
    }

    async fn get(&self, key: &str, policy: &Policy, _now: f64) -> Result<Option<RateLimitEntry>> {
        let redis_key = self.redis_key(key);
        let fields: HashMap<String, String> = self
            .bounded("get", async {
                let mut conn = self.connection().await?;
                conn.hgetall(&redis_key).await.map_err(|e| self.classify(e))
            })
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }

        let created_at = field(&fields, "created_at")?;
        let window_start = if fields.contains_key("window_start") {
            field(&fields, "window_start")?
        } else {
            created_at
        };
        let last_refill = if fields.contains_key("last_refill") {
            field(&fields, "last_refill")?
        } else {
            field(&fields, "updated_at")?
        };

        RateLimitEntry::restore(
            key,
            window_start,
            count_field(&fields, "count")?,
            count_field(&fields, "previous_count")?,
            field(&fields, "tokens")?,
            last_refill,
            created_at,
            field(&fields, "updated_at")?,
            policy.capacity(),
        )
        .map(Some)
        .map_err(|e| RateLimitError::InternalStore(format!("redis store: {e}")))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let redis_key = self.redis_key(key);
        self.bounded("reset", async {
            let mut conn = self.connection().await?;
            conn.del::<_, ()>(&redis_key).await.map_err(|e| self.classify(e))
        })
        .await
    }
}
