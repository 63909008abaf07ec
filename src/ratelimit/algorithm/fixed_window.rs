//! Fixed window counter.

use super::{window_boundary, Algorithm, Decision};
use crate::ratelimit::entry::RateLimitEntry;
use crate::ratelimit::policy::{AlgorithmKind, Policy};

/// Counts requests in epoch-aligned, non-overlapping windows.
///
/// A client can spend a full quota at the tail of one window and another at
/// the head of the next, so up to `2 * limit` requests may pass within a
/// span shorter than one window.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedWindowCounter;

fn window_of(policy: &Policy) -> f64 {
    policy.window_secs().unwrap_or(1.0)
}

impl Algorithm for FixedWindowCounter {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::FixedWindow
    }

    fn initial_entry(&self, key: &str, policy: &Policy, now: f64) -> RateLimitEntry {
        let mut entry = RateLimitEntry::new(key, now, 0.0);
        entry.window_start = window_boundary(now, window_of(policy));
        entry
    }

    fn apply(&self, entry: &mut RateLimitEntry, policy: &Policy, now: f64) -> bool {
        let now = now.max(entry.updated_at);
        let window = window_of(policy);

        if now >= entry.window_start + window {
            entry.window_start = window_boundary(now, window);
            entry.count = 0;
        }
        entry.updated_at = now;

        if entry.count < policy.limit() {
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
        let reset_at = entry.window_start + window_of(policy);
        Decision {
            allowed,
            limit: policy.limit(),
            remaining: policy.limit().saturating_sub(entry.count),
            reset_at,
            retry_after: (!allowed).then(|| (reset_at - now).max(0.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // Aligned to a 60 second boundary.
    const T0: f64 = 1_700_000_040.0;

    fn run(policy: &Policy, entry: &mut RateLimitEntry, now: f64) -> Decision {
        let algorithm = FixedWindowCounter;
        let allowed = algorithm.apply(entry, policy, now);
        algorithm.decision(entry, allowed, policy, now)
    }

    #[test]
    fn test_remaining_counts_down() {
        let policy = Policy::fixed_window("default", 5, Duration::from_secs(60)).unwrap();
        let mut entry = FixedWindowCounter.initial_entry("default:k", &policy, T0 + 1.0);

        let remaining: Vec<u64> = (0..5)
            .map(|_| {
                let d = run(&policy, &mut entry, T0 + 1.0);
                assert!(d.allowed);
                d.remaining
            })
            .collect();
        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

        let denied = run(&policy, &mut entry, T0 + 1.0);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, T0 + 60.0);
        assert_eq!(denied.retry_after, Some(59.0));
        // Denials do not inflate the counter.
        assert_eq!(entry.count, 5);
    }

    #[test]
    fn test_window_rolls_over() {
        let policy = Policy::fixed_window("default", 2, Duration::from_secs(60)).unwrap();
        let mut entry = FixedWindowCounter.initial_entry("default:k", &policy, T0);

        assert!(run(&policy, &mut entry, T0).allowed);
        assert!(run(&policy, &mut entry, T0).allowed);
        assert!(!run(&policy, &mut entry, T0 + 59.0).allowed);

        let d = run(&policy, &mut entry, T0 + 61.0);
        assert!(d.allowed);
        assert_eq!(entry.window_start, T0 + 60.0);
        assert_eq!(d.remaining, 1);
    }

    #[test]
    fn test_double_burst_across_boundary_is_allowed() {
        let limit = 5;
        let policy = Policy::fixed_window("default", limit, Duration::from_secs(60)).unwrap();
        let mut entry = FixedWindowCounter.initial_entry("default:k", &policy, T0 + 59.9);

        let tail = (0..limit).filter(|_| run(&policy, &mut entry, T0 + 59.9).allowed).count();
        let head = (0..limit).filter(|_| run(&policy, &mut entry, T0 + 60.1).allowed).count();

        assert_eq!(tail + head, 2 * limit as usize);
    }

    #[test]
    fn test_limit_plus_one_inside_window_denies_last() {
        let policy = Policy::fixed_window("default", 3, Duration::from_secs(10)).unwrap();
        let mut entry = FixedWindowCounter.initial_entry("default:k", &policy, T0);

        let outcomes: Vec<bool> = (0..4)
            .map(|i| run(&policy, &mut entry, T0 + i as f64).allowed)
            .collect();
        assert_eq!(outcomes, vec![true, true, true, false]);
    }

    #[test]
    fn test_clock_going_backwards_is_clamped() {
        let policy = Policy::fixed_window("default", 3, Duration::from_secs(10)).unwrap();
        let mut entry = FixedWindowCounter.initial_entry("default:k", &policy, T0 + 5.0);

        run(&policy, &mut entry, T0 + 5.0);
        run(&policy, &mut entry, T0 + 1.0);
        assert_eq!(entry.updated_at, T0 + 5.0);
        assert!(entry.validate(policy.capacity()).is_ok());
    }
}
