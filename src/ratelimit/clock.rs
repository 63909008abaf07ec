//! Time sources for rate limit decisions.
//!
//! All timestamps are Unix seconds with a fractional part. Algorithms never
//! read the clock themselves; the manager samples it once per check.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// Current Unix time in seconds.
    fn now(&self) -> f64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        let now = chrono::Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9
    }
}

/// A clock that only moves when told to.
///
/// The value is kept as the bit pattern of an `f64` so reads and writes are
/// lock-free.
#[derive(Debug)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start` (Unix seconds).
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            let next = (f64::from_bits(current) + by.as_secs_f64()).to_bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800.0);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(100.0);
        assert_eq!(clock.now(), 100.0);

        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), 100.5);

        clock.set(10.0);
        assert_eq!(clock.now(), 10.0);
    }
}
