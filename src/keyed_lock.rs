//! Per-key async mutual exclusion.
//!
//! Several components need "serialize operations for this one key, let every
//! other key proceed concurrently" (spec §5: heartbeats serialized per
//! subsection, `Start`/`Submit` serialized per (user, test)). A single
//! global lock would violate the "latency-sensitive paths... must complete
//! without holding global locks" rule; this keeps one
//! `tokio::sync::Mutex` per key instead, the same "reserve a slot, then
//! wait on it" shape as [`crate::cache::Cache`]'s single-flight fill.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A registry of per-key async locks.
pub struct KeyedLocks<K> {
    locks: SyncMutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: SyncMutex::new(HashMap::new()),
        }
    }

    /// Acquires the lock for `key`, blocking other callers on the same key
    /// until the returned guard drops. Opportunistically evicts entries no
    /// other caller currently holds a reference to.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock();
            locks.retain(|_, v| Arc::strong_count(v) > 1);
            Arc::clone(locks.entry(key).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        };
        entry.lock_owned().await
    }
}
