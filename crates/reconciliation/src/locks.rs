//! Per-entity mutual exclusion.
//!
//! Every operation takes all of its locks in one call. Keys are sorted
//! before locking, sales before items, so two operations can never wait on
//! each other in a cycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use common::{ItemId, SaleId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table size above which unused entries are dropped.
const PRUNE_THRESHOLD: usize = 1024;

/// Something that can be locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Sale(SaleId),
    Item(ItemId),
}

impl From<SaleId> for LockKey {
    fn from(id: SaleId) -> Self {
        LockKey::Sale(id)
    }
}

impl From<ItemId> for LockKey {
    fn from(id: ItemId) -> Self {
        LockKey::Item(id)
    }
}

/// Locks held by one operation. Dropping the guard releases them.
#[derive(Debug)]
pub struct LockGuard {
    keys: Vec<LockKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockGuard {
    /// The locked keys, in locking order.
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }

    pub fn covers(&self, key: LockKey) -> bool {
        self.keys.binary_search(&key).is_ok()
    }
}

/// A table of async mutexes keyed by sale and item.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for every key in `keys` and returns once all are held.
    pub async fn acquire<K: Into<LockKey>>(&self, keys: impl IntoIterator<Item = K>) -> LockGuard {
        let mut keys: Vec<LockKey> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            }
            keys.iter()
                .map(|key| Arc::clone(locks.entry(*key).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }

        LockGuard {
            keys,
            _guards: guards,
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
