//! Rate limiting algorithms.
//!
//! Algorithms are stateless. Each one is a pure transition over a
//! [`RateLimitEntry`] that a store runs inside its atomic region, plus a
//! projection of the resulting snapshot into a [`Decision`].

mod fixed_window;
mod sliding_window;
mod token_bucket;

pub use fixed_window::FixedWindowCounter;
pub use sliding_window::SlidingWindowCounter;
pub use token_bucket::TokenBucket;

use serde::Serialize;
use std::sync::Arc;

use super::entry::RateLimitEntry;
use super::policy::{AlgorithmKind, Policy};
use super::store::Store;
use crate::error::Result;

/// The outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// The policy's advertised limit
    pub limit: u64,
    /// Requests still available before denial
    pub remaining: u64,
    /// Unix time at which the quota is fully restored
    pub reset_at: f64,
    /// Seconds until a retry can succeed, set only on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
}

impl Decision {
    /// `reset_at` rounded up to whole Unix seconds.
    pub fn reset_timestamp(&self) -> u64 {
        self.reset_at.max(0.0).ceil() as u64
    }

    /// `retry_after` rounded up to whole seconds, never below 1.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|secs| (secs.ceil() as u64).max(1))
    }

    /// An admission granted without consulting the store.
    pub(crate) fn fail_open(policy: &Policy, now: f64) -> Self {
        Self {
            allowed: true,
            limit: policy.limit(),
            remaining: policy.limit(),
            reset_at: now + policy.retention().as_secs_f64() / 2.0,
            retry_after: None,
        }
    }

    /// A denial issued without consulting the store.
    pub(crate) fn fail_closed(policy: &Policy, now: f64) -> Self {
        let retry_after = policy.retention().as_secs_f64() / 2.0;
        Self {
            allowed: false,
            limit: policy.limit(),
            remaining: 0,
            reset_at: now + retry_after,
            retry_after: Some(retry_after),
        }
    }
}

/// A rate limiting algorithm.
pub trait Algorithm: Send + Sync {
    fn kind(&self) -> AlgorithmKind;

    /// The entry created on the first request for a key.
    fn initial_entry(&self, key: &str, policy: &Policy, now: f64) -> RateLimitEntry;

    /// Apply one request to `entry`, returning whether it is admitted.
    ///
    /// Time is treated as non-decreasing per entry: a `now` older than the
    /// entry's last update is clamped forward.
    fn apply(&self, entry: &mut RateLimitEntry, policy: &Policy, now: f64) -> bool;

    /// Project a post-update snapshot into a decision.
    fn decision(&self, entry: &RateLimitEntry, allowed: bool, policy: &Policy, now: f64)
        -> Decision;
}

/// Run one check for `key` through `store`.
///
/// Store errors are returned untouched; the manager owns the failure policy.
pub async fn decide(
    algorithm: &dyn Algorithm,
    store: &dyn Store,
    key: &str,
    policy: &Policy,
    now: f64,
) -> Result<Decision> {
    let (allowed, snapshot) = store.increment_and_check(key, algorithm, policy, now).await?;
    Ok(algorithm.decision(&snapshot, allowed, policy, now))
}

/// The algorithm implementing `kind`.
pub fn for_kind(kind: AlgorithmKind) -> Arc<dyn Algorithm> {
    match kind {
        AlgorithmKind::FixedWindow => Arc::new(FixedWindowCounter),
        AlgorithmKind::SlidingWindow => Arc::new(SlidingWindowCounter),
        AlgorithmKind::TokenBucket => Arc::new(TokenBucket),
    }
}

/// Start of the epoch-aligned window containing `now`.
pub(crate) fn window_boundary(now: f64, window: f64) -> f64 {
    (now / window).floor() * window
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_window_boundary() {
        assert_eq!(window_boundary(125.0, 60.0), 120.0);
        assert_eq!(window_boundary(120.0, 60.0), 120.0);
        assert_eq!(window_boundary(0.5, 1.0), 0.0);
    }

    #[test]
    fn test_for_kind() {
        assert_eq!(for_kind(AlgorithmKind::FixedWindow).kind(), AlgorithmKind::FixedWindow);
        assert_eq!(for_kind(AlgorithmKind::SlidingWindow).kind(), AlgorithmKind::SlidingWindow);
        assert_eq!(for_kind(AlgorithmKind::TokenBucket).kind(), AlgorithmKind::TokenBucket);
    }

    #[test]
    fn test_header_rounding() {
        let decision = Decision {
            allowed: false,
            limit: 5,
            remaining: 0,
            reset_at: 1000.2,
            retry_after: Some(0.2),
        };
        assert_eq!(decision.reset_timestamp(), 1001);
        assert_eq!(decision.retry_after_secs(), Some(1));
    }

    #[test]
    fn test_failure_mode_decisions() {
        let policy = Policy::fixed_window("default", 5, Duration::from_secs(60)).unwrap();

        let open = Decision::fail_open(&policy, 100.0);
        assert!(open.allowed);
        assert_eq!(open.remaining, 5);

        let closed = Decision::fail_closed(&policy, 100.0);
        assert!(!closed.allowed);
        assert_eq!(closed.remaining, 0);
        assert_eq!(closed.retry_after_secs(), Some(60));
    }
}
