//! Process-local store.
//!
//! Entries live in a [`DashMap`], which splits the key space into
//! independently locked shards selected by key hash. An update holds exactly
//! one shard's write lock for the duration of a single entry transition, so
//! unrelated keys only contend when they hash to the same shard.
//!
//! Expiry is driven by a queue of keys in creation order rather than by
//! scanning the map, so the sweeper never holds a shard lock for more than
//! one entry.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::Store;
use crate::error::{RateLimitError, Result};
use crate::ratelimit::algorithm::Algorithm;
use crate::ratelimit::clock::Clock;
use crate::ratelimit::entry::RateLimitEntry;
use crate::ratelimit::policy::Policy;

/// Keys taken off the sweep queue per lock acquisition.
const SWEEP_BATCH: usize = 256;

struct Slot {
    entry: RateLimitEntry,
    /// Idle time after which the entry is dead, in seconds
    retention: f64,
}

impl Slot {
    fn is_expired(&self, now: f64) -> bool {
        self.entry.is_expired(now, self.retention)
    }
}

/// In-memory, sharded rate limit store.
pub struct MemoryStore {
    entries: DashMap<String, Slot>,
    /// Every live key at least once; stale or duplicate keys are dropped
    /// when the sweeper reaches them
    sweep_queue: Mutex<VecDeque<String>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store with the default shard count.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            sweep_queue: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    /// Create a store with an explicit shard count (a power of two above 1).
    pub fn with_shard_amount(clock: Arc<dyn Clock>, shards: usize) -> Result<Self> {
        if shards < 2 || !shards.is_power_of_two() {
            return Err(RateLimitError::Validation(format!(
                "shard count must be a power of two greater than 1, got {shards}"
            )));
        }
        Ok(Self {
            entries: DashMap::with_shard_amount(shards),
            sweep_queue: Mutex::new(VecDeque::new()),
            clock,
        })
    }

    /// Apply one request to `key` atomically.
    ///
    /// The transition runs on a copy inside the shard lock and is committed
    /// only if the result passes validation, so a broken invariant never
    /// becomes visible to other callers.
    pub fn update(
        &self,
        key: &str,
        algorithm: &dyn Algorithm,
        policy: &Policy,
        now: f64,
    ) -> Result<(bool, RateLimitEntry)> {
        let retention = policy.retention().as_secs_f64();
        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| {
            trace!(bucket = policy.bucket(), "Creating rate limit entry");
            self.sweep_queue.lock().push_back(key.to_string());
            Slot {
                entry: algorithm.initial_entry(key, policy, now),
                retention,
            }
        });

        if slot.is_expired(now) {
            slot.entry = algorithm.initial_entry(key, policy, now);
        }

        let mut next = slot.entry.clone();
        let allowed = algorithm.apply(&mut next, policy, now);
        next.validate(policy.capacity())
            .map_err(|e| RateLimitError::InternalStore(format!("memory store: {e}")))?;

        slot.entry = next.clone();
        slot.retention = retention;
        Ok((allowed, next))
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove entries that have been idle past their retention.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.clock.now())
    }

    /// Sweep against an explicit time.
    ///
    /// Visits each queued key once. Keys are taken off the queue at most
    /// `SWEEP_BATCH` at a time, and each one is checked and evicted under
    /// its own shard lock, so no lock is ever held for more than a single
    /// entry's eviction check. Keys still alive go back on the queue; keys
    /// already gone (reset, or evicted by an earlier duplicate) are dropped.
    pub fn sweep_at(&self, now: f64) -> usize {
        let mut pending = self.sweep_queue.lock().len();
        let mut removed = 0;

        while pending > 0 {
            let batch: Vec<String> = {
                let mut queue = self.sweep_queue.lock();
                let take = pending.min(SWEEP_BATCH).min(queue.len());
                queue.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }
            pending -= batch.len();

            let mut alive = Vec::new();
            for key in batch {
                if self
                    .entries
                    .remove_if(key.as_str(), |_, slot| slot.is_expired(now))
                    .is_some()
                {
                    removed += 1;
                } else if self.entries.contains_key(key.as_str()) {
                    alive.push(key);
                }
            }
            self.sweep_queue.lock().extend(alive);
        }

        removed
    }

    /// Sweep every `interval` until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed, live = store.len(), "Swept expired rate limit entries");
                }
            }
        })
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn increment_and_check(
        &self,
        key: &str,
        algorithm: &dyn Algorithm,
        policy: &Policy,
        now: f64,
    ) -> Result<(bool, RateLimitEntry)> {
        self.update(key, algorithm, policy, now)
    }

    async fn get(&self, key: &str, _policy: &Policy, now: f64) -> Result<Option<RateLimitEntry>> {
        Ok(self
            .entries
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.entry.clone()))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
