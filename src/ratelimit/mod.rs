//! Rate limiting logic and state management.

pub mod algorithm;
pub mod store;

mod clock;
mod entry;
mod manager;
mod policy;
mod stats;

pub use algorithm::{Algorithm, Decision, FixedWindowCounter, SlidingWindowCounter, TokenBucket};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::RateLimitEntry;
pub use manager::{FailureMode, RateLimitManager, RateLimitManagerBuilder};
pub use policy::{AlgorithmKind, Limits, Policy};
pub use stats::{BucketStats, StatsSnapshot};
pub use store::{MemoryStore, RedisStore, Store, StoreKind};

/// Bucket used when no route matches.
pub const DEFAULT_BUCKET: &str = "default";
