//! Per-entity exclusive locks
//!
//! A [`KeyedMutex`] hands out one async mutex per entity id. Operations on the
//! same id serialize; operations on different ids never contend. Locks are
//! created lazily on first use and dropped by [`KeyedMutex::remove`] once the
//! entity has been cleaned up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard for one entity's lock. Released on drop.
pub type EntityGuard = OwnedMutexGuard<()>;

/// Map from entity id to its exclusive lock
#[derive(Debug, Default)]
pub struct KeyedMutex {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedMutex {
    /// Create an empty lock map
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        // The table is only touched in short non-panicking sections
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire the lock for `key`, waiting while another task holds it
    pub async fn lock(&self, key: &str) -> EntityGuard {
        let mutex = {
            let mut table = self.table();
            table
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Try to acquire the lock for `key` without waiting
    pub fn try_lock(&self, key: &str) -> Option<EntityGuard> {
        let mutex = {
            let mut table = self.table();
            table
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        mutex.try_lock_owned().ok()
    }

    /// Drop the lock for `key` if nobody holds or awaits it
    ///
    /// Returns true when the entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        let mut table = self.table();
        match table.get(key) {
            Some(mutex) if Arc::strong_count(mutex) == 1 => {
                table.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Number of ids that currently have a lock allocated
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Whether no locks are allocated
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}
