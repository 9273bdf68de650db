use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable<K> = DashMap<K, Arc<Mutex<()>>>;

/// One async mutex per key, created on first use and dropped with the last
/// guard.
///
/// Guards are owned so they can be held across `.await` points, moved into
/// spawned tasks and dropped with the request future on cancellation.
#[derive(Debug)]
pub struct KeyedLocks<K: Eq + Hash> {
    locks: Arc<LockTable<K>>,
}

/// Holds one key's lock. Dropping it unlocks the key and removes the table
/// entry when nobody else holds or waits on it.
#[derive(Debug)]
pub struct KeyedGuard<K: Eq + Hash> {
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    locks: Arc<LockTable<K>>,
}

impl<K: Eq + Hash> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of 1 is the table's alone.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    pub async fn lock(&self, key: &K) -> KeyedGuard<K> {
        // The map shard lock is released before awaiting the key's mutex.
        let lock = {
            let entry = self.locks.entry(key.clone()).or_default();
            Arc::clone(entry.value())
        };
        let guard = lock.lock_owned().await;
        KeyedGuard {
            guard: Some(guard),
            key: key.clone(),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Drops locks nobody holds or waits on.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
