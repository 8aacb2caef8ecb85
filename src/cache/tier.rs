//! Storage contract shared by the memory and persistent tiers

use super::entry::CacheEntry;
use crate::error::StoreError;

/// A key/value tier holding at most one [`CacheEntry`] per key
///
/// Tiers have no opinion about freshness: `get` returns whatever is stored
/// and the caller decides whether it is usable. `put` replaces the whole
/// entry so concurrent readers see either the old entry or the new one.
///
/// Implementations must be safe to share between tasks. Operations on
/// different keys must not wait on each other for longer than a bookkeeping
/// lock.
pub trait CacheTier: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Deletes the entry for `key`; absent keys are not an error
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    /// All keys currently stored, in no particular order
    fn keys(&self) -> Result<Vec<String>, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
