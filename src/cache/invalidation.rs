//! Invalidation and mutation hooks
//!
//! After a successful create/update/delete the cached copy of the affected
//! resources is wrong. Callers either invalidate explicitly or wrap the
//! mutation in [`ResponseCache::mutate`], which invalidates before handing the
//! result back.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::entry::CacheEntry;
use super::manager::ResponseCache;
use super::tier::CacheTier;
use crate::error::{CacheError, MutationError, StoreError, Tier};

/// Which cached keys a mutation affects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// One key
    Key(String),
    /// Several unrelated keys
    Keys(Vec<String>),
    /// Every key starting with the prefix, e.g. a list endpoint and all its pages
    Prefix(String),
    All,
}

impl InvalidationScope {
    pub fn key(key: impl Into<String>) -> Self {
        InvalidationScope::Key(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        InvalidationScope::Prefix(prefix.into())
    }
}

impl ResponseCache {
    /// Removes `key` from both tiers
    ///
    /// A fetch for `key` that is still running keeps serving its waiters but
    /// no longer writes its result into the cache.
    pub fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        if let Some(flight) = self.inner.lock_flights().remove(key) {
            flight.detach();
        }
        debug!(key, "Invalidating cache entry");
        self.remove_from_tiers(key)
    }

    /// Removes every key starting with `prefix`, returning how many were found
    pub fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        {
            let mut flights = self.inner.lock_flights();
            flights.retain(|key, flight| {
                let matches = key.starts_with(prefix);
                if matches {
                    flight.detach();
                }
                !matches
            });
        }

        let persistent_keys =
            self.inner
                .persistent
                .keys()
                .map_err(|source| CacheError::Invalidation {
                    key: prefix.to_string(),
                    tier: Tier::Persistent,
                    source,
                })?;
        let memory_keys = self.inner.memory.keys().map_err(|source| CacheError::Invalidation {
            key: prefix.to_string(),
            tier: Tier::Memory,
            source,
        })?;

        let keys: BTreeSet<String> = persistent_keys
            .into_iter()
            .chain(memory_keys)
            .filter(|k| k.starts_with(prefix))
            .collect();

        for key in &keys {
            self.remove_from_tiers(key)?;
        }
        info!(prefix, count = keys.len(), "Invalidated cache entries by prefix");
        Ok(keys.len())
    }

    /// Empties both tiers
    pub fn invalidate_all(&self) -> Result<(), CacheError> {
        {
            let mut flights = self.inner.lock_flights();
            for (_, flight) in flights.drain() {
                flight.detach();
            }
        }

        self.inner.bump_epoch();
        let memory = self.inner.memory.clear();
        let persistent = self.inner.persistent.clear();
        info!("Cleared all cache entries");
        check_tiers("*", memory, persistent)
    }

    pub fn invalidate_scope(&self, scope: &InvalidationScope) -> Result<(), CacheError> {
        match scope {
            InvalidationScope::Key(key) => self.invalidate(key),
            InvalidationScope::Keys(keys) => keys.iter().try_for_each(|k| self.invalidate(k)),
            InvalidationScope::Prefix(prefix) => self.invalidate_prefix(prefix).map(|_| ()),
            InvalidationScope::All => self.invalidate_all(),
        }
    }

    /// Runs a mutating operation and, if it succeeds, invalidates `scope` before returning
    ///
    /// A failed operation leaves the cache untouched. If the operation
    /// succeeds but invalidation fails, the operation's output comes back in
    /// [`MutationError::Invalidation`] so the caller can retry the invalidation.
    pub async fn mutate<T, E, Fut>(
        &self,
        scope: InvalidationScope,
        op: Fut,
    ) -> Result<T, MutationError<T, E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let output = op.await.map_err(MutationError::Operation)?;
        match self.invalidate_scope(&scope) {
            Ok(()) => Ok(output),
            Err(source) => {
                warn!(?scope, error = %source, "Mutation succeeded but invalidation failed");
                Err(MutationError::Invalidation { output, source })
            }
        }
    }

    /// Drops entries whose own TTL plus the configured grace period has run out
    ///
    /// Returns the number of distinct keys removed. Unreadable persistent
    /// records are removed as well. Keys with a fetch in progress are left to
    /// that fetch.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = self.inner.now();
        let grace = self.inner.config.stale_grace;

        let candidates: BTreeSet<String> = self
            .inner
            .memory
            .keys()?
            .into_iter()
            .chain(self.inner.persistent.keys()?)
            .collect();

        let mut purged = 0;
        for key in candidates {
            // Holding the flight table keeps a fetch from committing between
            // the expiry check and the removal.
            let flights = self.inner.lock_flights();
            if flights.contains_key(&key) {
                debug!(key = %key, "Fetch in progress, not purging");
                continue;
            }
            if self.purge_key(&key, now, grace)? {
                purged += 1;
            }
            drop(flights);
        }

        debug!(count = purged, "Purged expired cache entries");
        Ok(purged)
    }

    fn purge_key(&self, key: &str, now: DateTime<Utc>, grace: Duration) -> Result<bool, CacheError> {
        let expired = |entry: &CacheEntry| entry.age(now) >= entry.ttl.saturating_add(grace);

        let persistent_expired = match self.inner.persistent.get(key) {
            Ok(entry) => entry.as_ref().map(expired),
            Err(StoreError::Corrupt { .. }) => Some(true),
            Err(e) => return Err(e.into()),
        };
        if persistent_expired == Some(true) {
            self.remove_from_tiers(key)?;
            return Ok(true);
        }

        if let Ok(Some(entry)) = self.inner.memory.get(key) {
            if expired(&entry) {
                self.inner.bump_epoch();
                self.inner.memory.remove(key)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn remove_from_tiers(&self, key: &str) -> Result<(), CacheError> {
        self.inner.bump_epoch();
        let memory = self.inner.memory.remove(key);
        let persistent = self.inner.persistent.remove(key);
        check_tiers(key, memory, persistent)
    }
}

/// Turns the per-tier results of a removal into a single outcome naming the failed tier
fn check_tiers(
    key: &str,
    memory: Result<(), StoreError>,
    persistent: Result<(), StoreError>,
) -> Result<(), CacheError> {
    let failed = memory
        .map_err(|e| (Tier::Memory, e))
        .and(persistent.map_err(|e| (Tier::Persistent, e)));
    failed.map_err(|(tier, source)| {
        warn!(key, %tier, error = %source, "Partial invalidation");
        CacheError::Invalidation {
            key: key.to_string(),
            tier,
            source,
        }
    })
}
