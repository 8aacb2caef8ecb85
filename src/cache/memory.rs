//! In-memory cache tier
//!
//! A bounded least-recently-used map. Lookups promote the entry, and once
//! `capacity` keys are held the coldest one is dropped on insert. Dropping a
//! memory entry is harmless: the persistent tier still has it.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use super::entry::CacheEntry;
use super::tier::CacheTier;
use crate::error::StoreError;

/// Default number of entries held in memory
pub const DEFAULT_MEMORY_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct MemoryTier {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryTier {
    /// Creates a tier holding at most `capacity` entries (minimum one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        // A panic while holding the lock cannot leave a half-written entry,
        // since entries are swapped whole.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl CacheTier for MemoryTier {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        self.lock().put(entry.key.clone(), entry);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock().pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.lock().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().iter().map(|(k, _)| k.clone()).collect())
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}
