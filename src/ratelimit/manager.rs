//! Rate limit manager.
//!
//! The manager owns the bucket table built from configuration and is the
//! single entry point for admission checks. It namespaces keys per bucket and
//! applies the store failure policy uniformly for every algorithm.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::algorithm::{self, Algorithm, Decision};
use super::clock::{Clock, SystemClock};
use super::entry::RateLimitEntry;
use super::policy::Policy;
use super::stats::{RateLimitStats, StatsSnapshot};
use super::store::{MemoryStore, RedisStore, Store, StoreKind};
use crate::config::RateLimitingConfig;
use crate::error::{RateLimitError, Result};

/// What to do when a store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Admit the request and log a warning.
    #[default]
    FailOpen,
    /// Deny the request.
    FailClosed,
}

/// A store plus the circuit that disables it after an internal error.
struct GuardedStore {
    store: Arc<dyn Store>,
    tripped: AtomicBool,
}

impl GuardedStore {
    fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    fn trip(&self) {
        self.tripped.store(true, Ordering::Release);
    }

    fn disabled_error(&self) -> RateLimitError {
        RateLimitError::InternalStore(format!(
            "{} store disabled after an internal error",
            self.store.name()
        ))
    }
}

struct BucketLimiter {
    policy: Policy,
    algorithm: Arc<dyn Algorithm>,
    store: Arc<GuardedStore>,
}

/// Builder for [`RateLimitManager`].
pub struct RateLimitManagerBuilder {
    clock: Arc<dyn Clock>,
    failure_mode: FailureMode,
    buckets: Vec<(Policy, Arc<dyn Store>)>,
    sweepers: Vec<(Arc<MemoryStore>, Duration)>,
}

impl RateLimitManagerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Add a bucket. Buckets given the same `Arc` share one store instance.
    pub fn bucket(mut self, policy: Policy, store: Arc<dyn Store>) -> Self {
        self.buckets.push((policy, store));
        self
    }

    /// Register a memory store for periodic eviction.
    pub fn sweep(mut self, store: Arc<MemoryStore>, interval: Duration) -> Self {
        self.sweepers.push((store, interval));
        self
    }

    pub fn build(self) -> Result<RateLimitManager> {
        let mut guarded: HashMap<*const (), Arc<GuardedStore>> = HashMap::new();
        let mut buckets = HashMap::with_capacity(self.buckets.len());

        for (policy, store) in self.buckets {
            let name = policy.bucket().to_string();
            if buckets.contains_key(&name) {
                return Err(RateLimitError::Validation(format!(
                    "bucket '{name}' is configured twice"
                )));
            }

            let store = guarded
                .entry(Arc::as_ptr(&store) as *const ())
                .or_insert_with(|| {
                    Arc::new(GuardedStore {
                        store: store.clone(),
                        tripped: AtomicBool::new(false),
                    })
                })
                .clone();

            buckets.insert(
                name,
                BucketLimiter {
                    algorithm: algorithm::for_kind(policy.algorithm()),
                    policy,
                    store,
                },
            );
        }

        let stats = RateLimitStats::new(buckets.keys().map(String::as_str));
        Ok(RateLimitManager {
            buckets,
            clock: self.clock,
            failure_mode: self.failure_mode,
            stats,
            sweepers: self.sweepers,
        })
    }
}

/// Binds bucket names to policies, algorithms and stores.
pub struct RateLimitManager {
    buckets: HashMap<String, BucketLimiter>,
    clock: Arc<dyn Clock>,
    failure_mode: FailureMode,
    stats: RateLimitStats,
    sweepers: Vec<(Arc<MemoryStore>, Duration)>,
}

impl RateLimitManager {
    pub fn builder() -> RateLimitManagerBuilder {
        RateLimitManagerBuilder {
            clock: Arc::new(SystemClock),
            failure_mode: FailureMode::default(),
            buckets: Vec::new(),
            sweepers: Vec::new(),
        }
    }

    /// Build the manager described by `config`.
    ///
    /// Buckets with the same storage type share one store instance.
    pub fn from_config(config: &RateLimitingConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut builder = Self::builder()
            .clock(clock.clone())
            .failure_mode(config.failure_mode);

        let mut memory: Option<Arc<MemoryStore>> = None;
        let mut redis: Option<Arc<RedisStore>> = None;

        for (policy, kind) in config.policies()? {
            let store: Arc<dyn Store> = match kind {
                StoreKind::Memory => {
                    let store = match &memory {
                        Some(store) => store.clone(),
                        None => {
                            let store = Arc::new(match config.memory.shards {
                                Some(shards) => MemoryStore::with_shard_amount(clock.clone(), shards)?,
                                None => MemoryStore::new(clock.clone()),
                            });
                            builder = builder.sweep(store.clone(), config.memory.sweep_interval());
                            memory = Some(store.clone());
                            store
                        }
                    };
                    store as Arc<dyn Store>
                }
                StoreKind::Redis => {
                    let store = match &redis {
                        Some(store) => store.clone(),
                        None => {
                            let store = Arc::new(RedisStore::new(
                                &config.redis.url,
                                config.redis.key_prefix.clone(),
                                config.redis.timeout(),
                            )?);
                            redis = Some(store.clone());
                            store
                        }
                    };
                    store as Arc<dyn Store>
                }
            };

            info!(
                bucket = policy.bucket(),
                algorithm = %policy.algorithm(),
                limit = policy.limit(),
                store = %kind,
                "Configured rate limit bucket"
            );
            builder = builder.bucket(policy, store);
        }

        builder.build()
    }

    /// Start the background eviction tasks for memory stores.
    pub fn spawn_sweepers(&self) -> Vec<JoinHandle<()>> {
        self.sweepers
            .iter()
            .map(|(store, interval)| store.spawn_sweeper(*interval))
            .collect()
    }

    fn limiter(&self, bucket: &str) -> Result<&BucketLimiter> {
        self.buckets.get(bucket).ok_or_else(|| {
            error!(bucket, "Rate limit check for unconfigured bucket");
            RateLimitError::UnknownBucket(bucket.to_string())
        })
    }

    fn namespaced_key(bucket: &str, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(RateLimitError::Validation(
                "rate limit key must not be empty".to_string(),
            ));
        }
        Ok(format!("{bucket}:{key}"))
    }

    /// Decide whether one request for `key` in `bucket` is admitted.
    ///
    /// Store outages are resolved with the configured [`FailureMode`]. Unknown
    /// buckets and internal store errors are returned to the caller.
    pub async fn check(&self, key: &str, bucket: &str) -> Result<Decision> {
        let limiter = self.limiter(bucket)?;
        let store_key = Self::namespaced_key(bucket, key)?;
        let counters = self.stats.bucket(bucket);
        let store_name = limiter.store.store.name();

        if limiter.store.is_tripped() {
            if let Some(c) = counters {
                c.record_store_error();
            }
            return Err(limiter.store.disabled_error());
        }

        let now = self.clock.now();
        let result = algorithm::decide(
            limiter.algorithm.as_ref(),
            limiter.store.store.as_ref(),
            &store_key,
            &limiter.policy,
            now,
        )
        .await;

        match result {
            Ok(decision) => {
                if !decision.allowed {
                    debug!(bucket, remaining = decision.remaining, "Rate limit exceeded");
                }
                if let Some(c) = counters {
                    c.record_decision(decision.allowed);
                }
                Ok(decision)
            }
            Err(RateLimitError::StoreUnavailable(reason)) => {
                let decision = match self.failure_mode {
                    FailureMode::FailOpen => {
                        warn!(bucket, store = store_name, error = %reason, "Rate limit store unavailable, failing open");
                        if let Some(c) = counters {
                            c.record_fail_open();
                        }
                        Decision::fail_open(&limiter.policy, now)
                    }
                    FailureMode::FailClosed => {
                        warn!(bucket, store = store_name, error = %reason, "Rate limit store unavailable, failing closed");
                        if let Some(c) = counters {
                            c.record_fail_closed();
                        }
                        Decision::fail_closed(&limiter.policy, now)
                    }
                };
                if let Some(c) = counters {
                    c.record_store_error();
                    c.record_decision(decision.allowed);
                }
                Ok(decision)
            }
            Err(RateLimitError::InternalStore(reason)) => {
                error!(bucket, store = store_name, error = %reason, "Rate limit store invariant violated, disabling store");
                limiter.store.trip();
                if let Some(c) = counters {
                    c.record_store_error();
                }
                Err(RateLimitError::InternalStore(reason))
            }
            Err(other) => Err(other),
        }
    }

    /// Drop all state for `key` in `bucket`.
    pub async fn reset(&self, key: &str, bucket: &str) -> Result<()> {
        let limiter = self.limiter(bucket)?;
        let store_key = Self::namespaced_key(bucket, key)?;
        if limiter.store.is_tripped() {
            return Err(limiter.store.disabled_error());
        }

        limiter.store.store.reset(&store_key).await?;
        info!(bucket, "Rate limit entry reset");
        Ok(())
    }

    /// The stored entry for `key` in `bucket`, if any.
    pub async fn inspect(&self, key: &str, bucket: &str) -> Result<Option<RateLimitEntry>> {
        let limiter = self.limiter(bucket)?;
        let store_key = Self::namespaced_key(bucket, key)?;
        if limiter.store.is_tripped() {
            return Err(limiter.store.disabled_error());
        }

        limiter
            .store
            .store
            .get(&store_key, &limiter.policy, self.clock.now())
            .await
    }

    pub fn policy(&self, bucket: &str) -> Option<&Policy> {
        self.buckets.get(bucket).map(|b| &b.policy)
    }

    /// All configured policies, ordered by bucket name.
    pub fn buckets(&self) -> Vec<&Policy> {
        let mut policies: Vec<&Policy> = self.buckets.values().map(|b| &b.policy).collect();
        policies.sort_by(|a, b| a.bucket().cmp(b.bucket()));
        policies
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.contains_key(bucket)
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use tracing_subscriber::fmt::MakeWriter;

    const T0: f64 = 1_700_000_040.0;

    fn manager_with(policies: Vec<Policy>, clock: Arc<ManualClock>) -> RateLimitManager {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(clock.clone()));
        policies
            .into_iter()
            .fold(RateLimitManager::builder().clock(clock), |b, p| b.bucket(p, store.clone()))
            .build()
            .unwrap()
    }

    /// A store whose backend is always down.
    struct UnavailableStore;

    #[async_trait]
    impl Store for UnavailableStore {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        async fn increment_and_check(
            &self,
            _key: &str,
            _algorithm: &dyn Algorithm,
            _policy: &Policy,
            _now: f64,
        ) -> Result<(bool, RateLimitEntry)> {
            Err(RateLimitError::StoreUnavailable("connection refused".to_string()))
        }

        async fn get(&self, _key: &str, _policy: &Policy, _now: f64) -> Result<Option<RateLimitEntry>> {
            Err(RateLimitError::StoreUnavailable("connection refused".to_string()))
        }

        async fn reset(&self, _key: &str) -> Result<()> {
            Err(RateLimitError::StoreUnavailable("connection refused".to_string()))
        }
    }

    /// A store that reports corrupted state.
    #[derive(Default)]
    struct CorruptStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Store for CorruptStore {
        fn name(&self) -> &'static str {
            "corrupt"
        }

        async fn increment_and_check(
            &self,
            _key: &str,
            _algorithm: &dyn Algorithm,
            _policy: &Policy,
            _now: f64,
        ) -> Result<(bool, RateLimitEntry)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RateLimitError::InternalStore("count went negative".to_string()))
        }

        async fn get(&self, _key: &str, _policy: &Policy, _now: f64) -> Result<Option<RateLimitEntry>> {
            Ok(None)
        }

        async fn reset(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_fixed_window_sequence() {
        let clock = Arc::new(ManualClock::new(T0 + 5.0));
        let policy = Policy::fixed_window("default", 5, Duration::from_secs(60)).unwrap();
        let manager = manager_with(vec![policy], clock);

        for expected in [4, 3, 2, 1, 0] {
            let decision = manager.check("203.0.113.7", "default").await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
        }

        let decision = manager.check("203.0.113.7", "default").await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn test_token_bucket_refills_over_time() {
        let clock = Arc::new(ManualClock::new(T0));
        let policy = Policy::token_bucket("api", 10, 1.0).unwrap();
        let manager = manager_with(vec![policy], clock.clone());

        for _ in 0..10 {
            assert!(manager.check("token-a", "api").await.unwrap().allowed);
        }
        assert!(!manager.check("token-a", "api").await.unwrap().allowed);

        clock.advance(Duration::from_secs(2));
        assert!(manager.check("token-a", "api").await.unwrap().allowed);
        assert!(manager.check("token-a", "api").await.unwrap().allowed);
        assert!(!manager.check("token-a", "api").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_unknown_bucket_is_an_error() {
        let clock = Arc::new(ManualClock::new(T0));
        let policy = Policy::fixed_window("default", 5, Duration::from_secs(60)).unwrap();
        let manager = manager_with(vec![policy], clock);

        let err = manager.check("client", "uploads").await.unwrap_err();
        assert!(matches!(err, RateLimitError::UnknownBucket(ref b) if b == "uploads"));
        assert!(matches!(
            manager.reset("client", "uploads").await.unwrap_err(),
            RateLimitError::UnknownBucket(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let clock = Arc::new(ManualClock::new(T0));
        let policy = Policy::fixed_window("default", 5, Duration::from_secs(60)).unwrap();
        let manager = manager_with(vec![policy], clock);

        let err = manager.check("", "default").await.unwrap_err();
        assert!(matches!(err, RateLimitError::Validation(_)));
    }

    #[tokio::test]
    async fn test_buckets_do_not_share_quota() {
        let clock = Arc::new(ManualClock::new(T0));
        let manager = manager_with(
            vec![
                Policy::fixed_window("default", 1, Duration::from_secs(60)).unwrap(),
                Policy::fixed_window("api", 1, Duration::from_secs(60)).unwrap(),
            ],
            clock,
        );

        assert!(manager.check("client", "default").await.unwrap().allowed);
        assert!(manager.check("client", "api").await.unwrap().allowed);
        assert!(!manager.check("client", "default").await.unwrap().allowed);
        assert!(!manager.check("client", "api").await.unwrap().allowed);

        let entry = manager.inspect("client", "api").await.unwrap().unwrap();
        assert_eq!(entry.key, "api:client");
        assert_eq!(entry.count, 1);
    }

    #[tokio::test]
    async fn test_reset_restores_first_call_behavior() {
        let clock = Arc::new(ManualClock::new(T0 + 3.0));
        let manager = manager_with(
            vec![Policy::sliding_window("default", 3, Duration::from_secs(60)).unwrap()],
            clock,
        );

        let first = manager.check("client", "default").await.unwrap();
        manager.check("client", "default").await.unwrap();
        manager.check("client", "default").await.unwrap();
        assert!(!manager.check("client", "default").await.unwrap().allowed);

        manager.reset("client", "default").await.unwrap();
        assert!(manager.inspect("client", "default").await.unwrap().is_none());
        assert_eq!(manager.check("client", "default").await.unwrap(), first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_checks_are_exact() {
        const TASKS: usize = 64;
        let clock = Arc::new(ManualClock::new(T0));
        let manager = Arc::new(manager_with(
            vec![Policy::fixed_window("default", (TASKS / 2) as u64, Duration::from_secs(60)).unwrap()],
            clock,
        ));

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.check("shared", "default").await.unwrap().allowed })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, TASKS / 2);

        let stats = manager.stats();
        assert_eq!(stats.buckets["default"].allowed, (TASKS / 2) as u64);
        assert_eq!(stats.buckets["default"].denied, (TASKS / 2) as u64);
    }

    #[test]
    fn test_concurrent_checks_from_os_threads() {
        const THREADS: usize = 50;
        let clock = Arc::new(ManualClock::new(T0));
        let manager = Arc::new(manager_with(
            vec![Policy::token_bucket("api", (THREADS / 2) as u64, 0.001).unwrap()],
            clock,
        ));
        let barrier = Arc::new(std::sync::Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let manager = manager.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    tokio_test::block_on(manager.check("shared", "api")).unwrap().allowed
                })
            })
            .collect();
        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&a| a)
            .count();

        assert_eq!(allowed, THREADS / 2);
    }

    #[test]
    fn test_store_outage_fails_open_with_warning() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();

        let manager = RateLimitManager::builder()
            .clock(Arc::new(ManualClock::new(T0)))
            .bucket(
                Policy::fixed_window("default", 5, Duration::from_secs(60)).unwrap(),
                Arc::new(UnavailableStore),
            )
            .build()
            .unwrap();
        assert_eq!(manager.failure_mode(), FailureMode::FailOpen);

        let decision = tracing::subscriber::with_default(subscriber, || {
            tokio_test::block_on(manager.check("198.51.100.23", "default"))
        })
        .unwrap();
        assert!(decision.allowed);

        let output = logs.contents();
        assert!(output.contains("WARN"), "missing warning in: {output}");
        assert!(output.contains("default"));
        assert!(!output.contains("198.51.100.23"), "raw key leaked into logs");

        let stats = manager.stats();
        assert_eq!(stats.buckets["default"].fail_open, 1);
        assert_eq!(stats.buckets["default"].store_errors, 1);
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let manager = RateLimitManager::builder()
            .clock(Arc::new(ManualClock::new(T0)))
            .failure_mode(FailureMode::FailClosed)
            .bucket(
                Policy::fixed_window("default", 5, Duration::from_secs(60)).unwrap(),
                Arc::new(UnavailableStore),
            )
            .build()
            .unwrap();

        let decision = manager.check("client", "default").await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.retry_after.is_some());
        assert_eq!(manager.stats().buckets["default"].fail_closed, 1);
    }

    #[tokio::test]
    async fn test_redis_outage_fails_open() {
        let store = Arc::new(
            RedisStore::new("redis://127.0.0.1:1/", "ratelimit:", Duration::from_millis(250)).unwrap(),
        );
        let manager = RateLimitManager::builder()
            .clock(Arc::new(ManualClock::new(T0)))
            .bucket(Policy::token_bucket("api", 10, 1.0).unwrap(), store)
            .build()
            .unwrap();

        let decision = manager.check("client", "api").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.limit, 10);
    }

    #[tokio::test]
    async fn test_internal_error_trips_store() {
        let corrupt = Arc::new(CorruptStore::default());
        let corrupt_dyn: Arc<dyn Store> = corrupt.clone();
        let healthy: Arc<dyn Store> = Arc::new(MemoryStore::new(Arc::new(ManualClock::new(T0))));

        let manager = RateLimitManager::builder()
            .clock(Arc::new(ManualClock::new(T0)))
            .bucket(Policy::fixed_window("default", 5, Duration::from_secs(60)).unwrap(), corrupt_dyn.clone())
            .bucket(Policy::fixed_window("api", 5, Duration::from_secs(60)).unwrap(), corrupt_dyn)
            .bucket(Policy::fixed_window("search", 5, Duration::from_secs(60)).unwrap(), healthy)
            .build()
            .unwrap();

        let err = manager.check("client", "default").await.unwrap_err();
        assert!(matches!(err, RateLimitError::InternalStore(_)));
        assert_eq!(corrupt.calls.load(Ordering::SeqCst), 1);

        // The whole store instance is disabled, including other buckets on it.
        assert!(manager.check("client", "default").await.is_err());
        assert!(manager.check("client", "api").await.is_err());
        assert_eq!(corrupt.calls.load(Ordering::SeqCst), 1);

        assert!(manager.check("client", "search").await.unwrap().allowed);
        assert_eq!(manager.stats().buckets["default"].store_errors, 2);
    }

    #[test]
    fn test_duplicate_bucket_rejected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(Arc::new(ManualClock::new(T0))));
        let result = RateLimitManager::builder()
            .bucket(Policy::fixed_window("default", 5, Duration::from_secs(60)).unwrap(), store.clone())
            .bucket(Policy::token_bucket("default", 5, 1.0).unwrap(), store)
            .build();
        assert!(matches!(result.err(), Some(RateLimitError::Validation(_))));
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = RateLimitingConfig::from_yaml(
            r#"
enabled: true
storage_type: memory
rate_limit_per_minute: 2
limits:
  api:
    requests: 1000
    window: 60
  uploads:
    algorithm: token_bucket
    capacity: 3
    refill_rate: 0.5
"#,
        )
        .unwrap();
        let manager = RateLimitManager::from_config(&config, Arc::new(ManualClock::new(T0))).unwrap();

        let buckets: Vec<&str> = manager.buckets().iter().map(|p| p.bucket()).collect();
        assert_eq!(buckets, vec!["api", "default", "uploads"]);
        assert_eq!(manager.policy("api").unwrap().limit(), 1000);

        assert!(manager.check("c", "default").await.unwrap().allowed);
        assert!(manager.check("c", "default").await.unwrap().allowed);
        assert!(!manager.check("c", "default").await.unwrap().allowed);
        assert_eq!(manager.spawn_sweepers().len(), 1);
    }

    #[tokio::test]
    async fn test_extreme_policies_check_without_panicking() {
        let clock = Arc::new(ManualClock::new(T0));
        let manager = manager_with(vec![Policy::token_bucket("api", 10, 1e-20).unwrap()], clock);
        let decision = manager.check("client", "api").await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);

        let config = RateLimitingConfig::from_yaml(
            r#"
limits:
  default:
    algorithm: fixed_window
    requests: 1
    window: 18446744073709551615
"#,
        )
        .unwrap();
        let manager = RateLimitManager::from_config(&config, Arc::new(ManualClock::new(T0))).unwrap();
        assert!(manager.check("client", "default").await.unwrap().allowed);
        let denied = manager.check("client", "default").await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs().unwrap() > 0);
    }
}
