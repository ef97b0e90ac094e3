//! In-memory cache layer (C2): key/value with TTL, pattern invalidation,
//! and single-flight fill (spec §4.2).
//!
//! `GetOrCompute` guarantees that concurrent misses on the same key await
//! one execution of the fill closure. The obvious two-phase approach (check
//! then insert a sentinel then compute) has a race between "check" and
//! "insert sentinel"; instead each key's in-flight slot is a
//! `tokio::sync::OnceCell`, which itself provides single-initialization
//! under concurrent `get_or_init` calls, so the race window simply doesn't
//! exist. This mirrors the teacher's two-phase-obligation discipline in
//! `sync::Semaphore` (reserve the slot, then fill it) without needing its
//! `Cx`-based cancellation machinery, which this crate's cache calls never
//! need to propagate (a cache fill that's dropped just leaves the next
//! caller to retry).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::OnceCell;

/// Keys are plain colon-separated strings (spec §4.2's key families).
pub type CacheKey = String;

struct Slot {
    cell: Arc<OnceCell<(serde_json::Value, Instant)>>,
}

/// An in-memory, TTL'd, single-flight cache.
///
/// Serialization is JSON-equivalent: callers pass/receive `serde_json::Value`
/// so the cache never needs to be generic over stored types, matching the
/// spec's "the cache does not interpret values" contract.
pub struct Cache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key` if present and unexpired.
    #[must_use]
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let cell = {
            let slots = self.slots.lock();
            slots.get(key).map(|s| Arc::clone(&s.cell))
        }?;
        match cell.get() {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            _ => {
                self.slots.lock().remove(key);
                None
            }
        }
    }

    /// Stores `value` under `key` with the given `ttl`.
    pub fn set(&self, key: impl Into<CacheKey>, value: serde_json::Value, ttl: Duration) {
        let key = key.into();
        let cell = OnceCell::new();
        // A fresh cell is always empty, so `set` can never race with itself;
        // `set_blocking` can't fail here.
        let _ = cell.set((value, Instant::now() + ttl));
        self.slots.lock().insert(key, Slot { cell: Arc::new(cell) });
    }

    /// Removes `key`, if present.
    pub fn del(&self, key: &str) {
        self.slots.lock().remove(key);
    }

    /// Removes every key whose string representation starts with `prefix`.
    ///
    /// `pattern` in spec terms is always a literal prefix here (e.g.
    /// `"progress:section:{user}:"`); the key families in §4.2 never need
    /// glob matching beyond a prefix.
    pub fn del_by_prefix(&self, prefix: &str) {
        self.slots.lock().retain(|k, _| !k.starts_with(prefix));
    }

    /// Gets `key`, or computes and stores it via `f` if missing/expired.
    /// Concurrent misses on the same key await one execution of `f`.
    ///
    /// Errors from `f` are not cached: a failed fill leaves the slot empty
    /// so the next caller retries rather than being stuck with a poisoned
    /// entry for the remainder of the TTL.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: impl Into<CacheKey>,
        ttl: Duration,
        f: F,
    ) -> Result<serde_json::Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, E>>,
    {
        let key = key.into();

        if let Some(existing) = self.peek_fresh(&key) {
            return Ok(existing);
        }

        let cell = {
            let mut slots = self.slots.lock();
            // A slot left over from a previous fill whose TTL has since
            // elapsed has an already-`Some` `OnceCell`; reusing it would
            // hand back that stale value without ever calling `f` again, so
            // it must be dropped before (re)inserting so the new cell actually
            // runs the fill.
            if slots.get(&key).is_some_and(|slot| slot.cell.get().is_some()) {
                slots.remove(&key);
            }
            Arc::clone(
                &slots
                    .entry(key.clone())
                    .or_insert_with(|| Slot { cell: Arc::new(OnceCell::new()) })
                    .cell,
            )
        };

        // Concurrent callers race to initialize the same `OnceCell`; exactly
        // one invocation of `f` runs, the rest await its result.
        let result = cell
            .get_or_try_init(|| async {
                let value = f().await?;
                Ok::<_, E>((value, Instant::now() + ttl))
            })
            .await;

        match result {
            Ok((value, expires_at)) => {
                if Instant::now() >= *expires_at {
                    // Expired between init and read (pathological only under
                    // a near-zero TTL); evict so the next call recomputes.
                    self.slots.lock().remove(&key);
                }
                Ok(value.clone())
            }
            Err(e) => {
                // The failed fill's `OnceCell` is permanently poisoned-empty;
                // drop the slot entirely so a retry gets a fresh cell.
                self.slots.lock().remove(&key);
                Err(e)
            }
        }
    }

    fn peek_fresh(&self, key: &str) -> Option<serde_json::Value> {
        let slots = self.slots.lock();
        let slot = slots.get(key)?;
        match slot.cell.get() {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            _ => None,
        }
    }

    /// Number of live slots, including ones whose fill is still in flight.
    /// Exposed for tests and observability, not part of the spec contract.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builders for the key families named in spec §4.2 that this crate
/// actually populates. (The family list in §4.2 is broader than what the
/// core reads/writes itself; the rest belong to collaborators that own
/// their own cache key namespace.)
pub mod keys {
    use crate::types::{SectionId, TopicId, UserId};

    #[must_use]
    pub fn progress_section(user: UserId, section: SectionId) -> String {
        format!("progress:section:{user}:{section}")
    }

    #[must_use]
    pub fn progress_topic(user: UserId, topic: TopicId) -> String {
        format!("progress:topic:{user}:{topic}")
    }

    #[must_use]
    pub fn access_section(user: UserId, section: SectionId) -> String {
        format!("access:section:{user}:{section}")
    }

    #[must_use]
    pub fn access_test(user: UserId, test: crate::types::TestId) -> String {
        format!("access:test:{user}:{test}")
    }

    /// `file:url:{bucket}:{object}`, the presigned-media-URL family (spec
    /// §4.2), populated by [`crate::service::ProgressService::get_topic_image_url`].
    #[must_use]
    pub fn file_url(bucket: &str, object: &str) -> String {
        format!("file:url:{bucket}:{object}")
    }
}
