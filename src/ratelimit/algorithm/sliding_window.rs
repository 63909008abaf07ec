//! Sliding window counter.

use super::{window_boundary, Algorithm, Decision};
use crate::ratelimit::entry::RateLimitEntry;
use crate::ratelimit::policy::{AlgorithmKind, Policy};

/// Approximates a sliding window from two adjacent fixed windows.
///
/// The previous window's count is weighted by how much of it still overlaps
/// the sliding window ending at `now`:
///
/// ```text
/// effective = previous * (window - elapsed) / window + current
/// ```
///
/// A request is admitted iff `effective < limit`, and only admitted requests
/// are counted.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlidingWindowCounter;

fn window_of(policy: &Policy) -> f64 {
    policy.window_secs().unwrap_or(1.0)
}

fn effective_count(entry: &RateLimitEntry, window: f64, now: f64) -> f64 {
    let elapsed = (now - entry.window_start).clamp(0.0, window);
    let weight = (window - elapsed) / window;
    entry.previous_count as f64 * weight + entry.count as f64
}

impl Algorithm for SlidingWindowCounter {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::SlidingWindow
    }

    fn initial_entry(&self, key: &str, policy: &Policy, now: f64) -> RateLimitEntry {
        let mut entry = RateLimitEntry::new(key, now, 0.0);
        entry.window_start = window_boundary(now, window_of(policy));
        entry
    }

    fn apply(&self, entry: &mut RateLimitEntry, policy: &Policy, now: f64) -> bool {
        let now = now.max(entry.updated_at);
        let window = window_of(policy);
        let boundary = window_boundary(now, window);

        if boundary > entry.window_start {
            let windows_passed = ((boundary - entry.window_start) / window).round();
            entry.previous_count = if windows_passed == 1.0 { entry.count } else { 0 };
            entry.count = 0;
            entry.window_start = boundary;
        }
        entry.updated_at = now;

        if effective_count(entry, window, now) < policy.limit() as f64 {
            entry.count += 1;
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
        let window = window_of(policy);
        let limit = policy.limit() as f64;
        let effective = effective_count(entry, window, now);

        let retry_after = (!allowed).then(|| {
            let count = entry.count as f64;
            let retry_at = if count < limit && entry.previous_count > 0 {
                // The previous window's weight has to decay below the gap.
                let previous = entry.previous_count as f64;
                entry.window_start + window * (1.0 - (limit - count) / previous)
            } else {
                // The current window alone is full; it becomes the weighted
                // previous window after the boundary.
                entry.window_start + window + window * (1.0 - limit / count.max(limit))
            };
            (retry_at - now).max(0.0)
        });

        Decision {
            allowed,
            limit: policy.limit(),
            remaining: (limit - effective).floor().max(0.0) as u64,
            reset_at: entry.window_start + window,
            retry_after,
        }
    }
}
