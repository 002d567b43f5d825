//! Per-key async mutexes.
//!
//! Serializes operations that touch the same branch/staff schedule or branch queue inside one
//! process. Cross-process exclusion is the ledger's job.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// Entries beyond this count trigger a sweep of idle locks.
const PRUNE_THRESHOLD: usize = 1024;

/// A map of lazily created async mutexes, one per key.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Ord + Clone> KeyedLocks<K> {
    /// Create an empty lock map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: K) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() > PRUNE_THRESHOLD {
            // Only the map holds idle entries; guards and waiters keep their own clone.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry(key).or_default())
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// Wait for exclusive access to both keys, acquiring them in key order.
    ///
    /// Equal keys are locked once.
    pub async fn lock_pair(&self, first: K, second: K) -> Vec<OwnedMutexGuard<()>> {
        let (low, high) = if first <= second {
            (first, second)
        } else {
            (second, first)
        };
        let mut guards = Vec::with_capacity(2);
        let same = low == high;
        guards.push(self.lock(low).await);
        if !same {
            guards.push(self.lock(high).await);
        }
        guards
    }

    /// Number of tracked keys (for testing).
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no key is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
