//! Token bucket.

use super::{Algorithm, Decision};
use crate::ratelimit::entry::RateLimitEntry;
use crate::ratelimit::policy::{AlgorithmKind, Policy};

/// A reservoir of `capacity` tokens refilled at `refill_rate` per second.
///
/// Capacity bounds the burst, refill rate bounds the sustained throughput.
/// Each admitted request spends one token; a denied request spends nothing
/// and the balance never goes negative.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenBucket;

fn rate_of(policy: &Policy) -> f64 {
    policy.refill_rate().unwrap_or(1.0)
}

impl Algorithm for TokenBucket {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::TokenBucket
    }

    fn initial_entry(&self, key: &str, policy: &Policy, now: f64) -> RateLimitEntry {
        RateLimitEntry::new(key, now, policy.capacity())
    }

    fn apply(&self, entry: &mut RateLimitEntry, policy: &Policy, now: f64) -> bool {
        let now = now.max(entry.updated_at);
        let elapsed = (now - entry.last_refill).max(0.0);

        entry.tokens = (entry.tokens + elapsed * rate_of(policy)).min(policy.capacity());
        entry.last_refill = now;
        entry.updated_at = now;

        if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn decision(
        &self,
        entry: &RateLimitEntry,
        allowed: bool,
        policy: &Policy,
        now: f64,
    ) -> Decision {
        let now = now.max(entry.updated_at);
        let rate = rate_of(policy);
        let tokens = entry.tokens.clamp(0.0, policy.capacity());

        Decision {
            allowed,
            limit: policy.limit(),
            remaining: tokens.floor() as u64,
            reset_at: now + (policy.capacity() - tokens) / rate,
            retry_after: (!allowed).then(|| ((1.0 - tokens) / rate).max(0.0)),
        }
    }
}
