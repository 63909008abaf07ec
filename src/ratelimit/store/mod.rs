//! Storage backends for rate limit entries.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::algorithm::Algorithm;
use super::entry::RateLimitEntry;
use super::policy::Policy;
use crate::error::Result;

/// Which backend holds a bucket's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Memory => f.write_str("memory"),
            StoreKind::Redis => f.write_str("redis"),
        }
    }
}

/// Persistence and atomic update of rate limit entries.
///
/// `increment_and_check` is a single atomic read-modify-write per key: no
/// caller may observe a partially applied update and no update may be lost,
/// whatever the number of concurrent callers.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs and stats.
    fn name(&self) -> &'static str;

    /// Read-or-create the entry for `key`, apply one request with
    /// `algorithm`, persist, and return the admission plus a snapshot.
    async fn increment_and_check(
        &self,
        key: &str,
        algorithm: &dyn Algorithm,
        policy: &Policy,
        now: f64,
    ) -> Result<(bool, RateLimitEntry)>;

    /// The live entry for `key`, if any.
    async fn get(&self, key: &str, policy: &Policy, now: f64) -> Result<Option<RateLimitEntry>>;

    /// Drop all state for `key`.
    async fn reset(&self, key: &str) -> Result<()>;
}
