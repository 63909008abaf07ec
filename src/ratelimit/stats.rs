//! Aggregate rate limit counters for observability.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one bucket.
#[derive(Debug, Default)]
pub struct BucketCounters {
    checks: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    store_errors: AtomicU64,
    fail_open: AtomicU64,
    fail_closed: AtomicU64,
}

impl BucketCounters {
    pub(crate) fn record_decision(&self, allowed: bool) {
        self.checks.fetch_add(1, Ordering::Relaxed);
        if allowed {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail_open(&self) {
        self.fail_open.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fail_closed(&self) {
        self.fail_closed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BucketStats {
        BucketStats {
            checks: self.checks.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            fail_open: self.fail_open.load(Ordering::Relaxed),
            fail_closed: self.fail_closed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub checks: u64,
    pub allowed: u64,
    pub denied: u64,
    pub store_errors: u64,
    pub fail_open: u64,
    pub fail_closed: u64,
}

impl std::ops::AddAssign for BucketStats {
    fn add_assign(&mut self, other: Self) {
        self.checks += other.checks;
        self.allowed += other.allowed;
        self.denied += other.denied;
        self.store_errors += other.store_errors;
        self.fail_open += other.fail_open;
        self.fail_closed += other.fail_closed;
    }
}

/// Serializable view of all counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total: BucketStats,
    pub buckets: BTreeMap<String, BucketStats>,
}

/// Counters for every configured bucket.
///
/// The bucket set is fixed at construction, so lookups need no locking.
#[derive(Debug, Default)]
pub struct RateLimitStats {
    buckets: HashMap<String, BucketCounters>,
}

impl RateLimitStats {
    pub fn new<'a>(buckets: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            buckets: buckets
                .into_iter()
                .map(|name| (name.to_string(), BucketCounters::default()))
                .collect(),
        }
    }

    pub fn bucket(&self, name: &str) -> Option<&BucketCounters> {
        self.buckets.get(name)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();
        for (name, counters) in &self.buckets {
            let stats = counters.snapshot();
            snapshot.total += stats;
            snapshot.buckets.insert(name.clone(), stats);
        }
        snapshot
    }
}
