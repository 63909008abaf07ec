//! Per-key rate limit state.

use serde::{Deserialize, Serialize};

use crate::error::{RateLimitError, Result};

/// Accumulated usage for one namespaced key.
///
/// Entries are owned by the store that created them. Callers only ever see
/// snapshots; every mutation happens inside the store's atomic region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    /// Namespaced key (`<bucket>:<identity>`)
    pub key: String,
    /// Start of the current window (counters) or creation time (token bucket)
    pub window_start: f64,
    /// Requests counted in the current window
    pub count: u64,
    /// Requests counted in the window before `window_start`
    pub previous_count: u64,
    /// Remaining tokens
    pub tokens: f64,
    /// Last token refill
    pub last_refill: f64,
    pub created_at: f64,
    pub updated_at: f64,
}

impl RateLimitEntry {
    /// A fresh entry as first observed at `now`.
    pub fn new(key: impl Into<String>, now: f64, tokens: f64) -> Self {
        Self {
            key: key.into(),
            window_start: now,
            count: 0,
            previous_count: 0,
            tokens,
            last_refill: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild an entry from raw, possibly untrusted parts.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        key: impl Into<String>,
        window_start: f64,
        count: i64,
        previous_count: i64,
        tokens: f64,
        last_refill: f64,
        created_at: f64,
        updated_at: f64,
        capacity: f64,
    ) -> Result<Self> {
        let key = key.into();
        if count < 0 || previous_count < 0 {
            return Err(RateLimitError::Validation(format!(
                "negative count ({count}, previous {previous_count})"
            )));
        }
        let entry = Self {
            key,
            window_start,
            count: count as u64,
            previous_count: previous_count as u64,
            tokens,
            last_refill,
            created_at,
            updated_at,
        };
        entry.validate(capacity)?;
        Ok(entry)
    }

    /// Check the entry invariants.
    pub fn validate(&self, capacity: f64) -> Result<()> {
        let timestamps = [
            self.window_start,
            self.last_refill,
            self.created_at,
            self.updated_at,
        ];
        if timestamps.iter().any(|t| !t.is_finite()) {
            return Err(RateLimitError::Validation(
                "entry timestamps must be finite".to_string(),
            ));
        }
        if !self.tokens.is_finite() || self.tokens < 0.0 || self.tokens > capacity {
            return Err(RateLimitError::Validation(format!(
                "tokens {} outside [0, {}]",
                self.tokens, capacity
            )));
        }
        if self.window_start > self.updated_at {
            return Err(RateLimitError::Validation(format!(
                "window_start {} is after updated_at {}",
                self.window_start, self.updated_at
            )));
        }
        Ok(())
    }

    /// Whether the entry has been idle for longer than `retention_secs`.
    pub fn is_expired(&self, now: f64, retention_secs: f64) -> bool {
        now - self.updated_at > retention_secs
    }
}
