//! Rate limit policies.
//!
//! A policy binds a bucket name to an algorithm and its parameters. Policies
//! are validated once when the manager is built and are immutable afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{RateLimitError, Result};

/// The limiting algorithm a policy uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    #[default]
    SlidingWindow,
    TokenBucket,
    FixedWindow,
}

impl AlgorithmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::SlidingWindow => "sliding_window",
            AlgorithmKind::TokenBucket => "token_bucket",
            AlgorithmKind::FixedWindow => "fixed_window",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithm parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Limits {
    /// Epoch-aligned, non-overlapping windows.
    FixedWindow { limit: u64, window: Duration },
    /// Weighted blend of the previous and current fixed window.
    SlidingWindow { limit: u64, window: Duration },
    /// Burst of `capacity`, sustained `refill_rate` tokens per second.
    TokenBucket { capacity: u64, refill_rate: f64 },
}

/// A validated, named rate limit policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    bucket: String,
    limits: Limits,
}

impl Policy {
    /// Build and validate a policy.
    pub fn new(bucket: impl Into<String>, limits: Limits) -> Result<Self> {
        let policy = Self {
            bucket: bucket.into(),
            limits,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn fixed_window(bucket: impl Into<String>, limit: u64, window: Duration) -> Result<Self> {
        Self::new(bucket, Limits::FixedWindow { limit, window })
    }

    pub fn sliding_window(bucket: impl Into<String>, limit: u64, window: Duration) -> Result<Self> {
        Self::new(bucket, Limits::SlidingWindow { limit, window })
    }

    pub fn token_bucket(bucket: impl Into<String>, capacity: u64, refill_rate: f64) -> Result<Self> {
        Self::new(
            bucket,
            Limits::TokenBucket {
                capacity,
                refill_rate,
            },
        )
    }

    fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(RateLimitError::Validation(
                "bucket name must not be empty".to_string(),
            ));
        }
        // The manager namespaces store keys as `<bucket>:<key>`.
        if self.bucket.contains(':') {
            return Err(RateLimitError::Validation(format!(
                "bucket name '{}' must not contain ':'",
                self.bucket
            )));
        }

        match &self.limits {
            Limits::FixedWindow { limit, window } | Limits::SlidingWindow { limit, window } => {
                if *limit == 0 {
                    return Err(RateLimitError::Validation(format!(
                        "bucket '{}': limit must be greater than 0",
                        self.bucket
                    )));
                }
                if window.is_zero() {
                    return Err(RateLimitError::Validation(format!(
                        "bucket '{}': window must be greater than 0",
                        self.bucket
                    )));
                }
            }
            Limits::TokenBucket {
                capacity,
                refill_rate,
            } => {
                if *capacity < 1 {
                    return Err(RateLimitError::Validation(format!(
                        "bucket '{}': capacity must be at least 1",
                        self.bucket
                    )));
                }
                if !refill_rate.is_finite() || *refill_rate <= 0.0 {
                    return Err(RateLimitError::Validation(format!(
                        "bucket '{}': refill_rate must be greater than 0",
                        self.bucket
                    )));
                }
            }
        }
        Ok(())
    }

    /// The bucket this policy applies to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn algorithm(&self) -> AlgorithmKind {
        match self.limits {
            Limits::FixedWindow { .. } => AlgorithmKind::FixedWindow,
            Limits::SlidingWindow { .. } => AlgorithmKind::SlidingWindow,
            Limits::TokenBucket { .. } => AlgorithmKind::TokenBucket,
        }
    }

    /// The advertised request limit. For token buckets this is the burst
    /// capacity.
    pub fn limit(&self) -> u64 {
        match self.limits {
            Limits::FixedWindow { limit, .. } | Limits::SlidingWindow { limit, .. } => limit,
            Limits::TokenBucket { capacity, .. } => capacity,
        }
    }

    /// Upper bound for an entry's token balance.
    pub fn capacity(&self) -> f64 {
        self.limit() as f64
    }

    /// Window length in seconds, for counter algorithms.
    pub fn window_secs(&self) -> Option<f64> {
        match self.limits {
            Limits::FixedWindow { window, .. } | Limits::SlidingWindow { window, .. } => {
                Some(window.as_secs_f64())
            }
            Limits::TokenBucket { .. } => None,
        }
    }

    /// Tokens added per second, for token buckets.
    pub fn refill_rate(&self) -> Option<f64> {
        match self.limits {
            Limits::TokenBucket { refill_rate, .. } => Some(refill_rate),
            _ => None,
        }
    }

    /// How long an idle entry must be kept before it can be evicted without
    /// changing any future decision.
    ///
    /// Saturates at `Duration::MAX` for windows or refill times too long to
    /// double.
    pub fn retention(&self) -> Duration {
        match self.limits {
            Limits::FixedWindow { window, .. } | Limits::SlidingWindow { window, .. } => {
                window.checked_mul(2).unwrap_or(Duration::MAX)
            }
            Limits::TokenBucket {
                capacity,
                refill_rate,
            } => {
                let full_refill = capacity as f64 / refill_rate;
                Duration::try_from_secs_f64((full_refill * 2.0).max(1.0)).unwrap_or(Duration::MAX)
            }
        }
    }
}
