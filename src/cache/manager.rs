//! Cache-aside orchestration
//!
//! [`ResponseCache`] answers a request from the memory tier, then the
//! persistent tier, and only then asks the [`Fetcher`](crate::fetch::Fetcher).
//! At most one fetch per key runs at a time: callers that arrive while one is
//! outstanding wait for the same result. The shared fetch runs on its own
//! task, so it completes and fills the cache even if every caller gives up.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::disk::DiskStore;
use super::entry::{newest, CacheEntry};
use super::memory::MemoryTier;
use super::stats::{CacheStats, StatsRecorder};
use super::tier::CacheTier;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{CacheError, FetchError, StoreError, Tier};
use crate::fetch::{FetchOutcome, SharedFetcher};

/// How a response was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from a fresh entry or newly fetched payload
    Fresh,
    /// The origin confirmed the stored payload is unchanged
    Revalidated,
    /// The fetch failed and a stale entry was served instead
    Degraded,
}

/// Where the returned payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Memory,
    Persistent,
    Network,
}

impl From<Tier> for Origin {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Memory => Origin::Memory,
            Tier::Persistent => Origin::Persistent,
        }
    }
}

/// A payload returned by [`ResponseCache::fetch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub payload: Bytes,
    pub status: CacheStatus,
    pub origin: Origin,
    /// When the payload was last confirmed by the origin
    pub stored_at: DateTime<Utc>,
    pub validator: Option<String>,
}

impl CachedResponse {
    fn from_entry(entry: &CacheEntry, status: CacheStatus, origin: Origin) -> Self {
        Self {
            payload: entry.payload.clone(),
            status,
            origin,
            stored_at: entry.stored_at,
            validator: entry.validator.clone(),
        }
    }

    /// Whether the caller should flag the data as possibly out of date
    pub fn is_degraded(&self) -> bool {
        self.status == CacheStatus::Degraded
    }
}

pub(crate) type FlightResult = Result<CachedResponse, CacheError>;

/// A fetch in progress for one key
#[derive(Clone)]
pub(crate) struct Flight {
    id: u64,
    /// Set once the key is invalidated; the flight then must not write the tiers
    detached: Arc<Mutex<bool>>,
    result: Shared<BoxFuture<'static, FlightResult>>,
}

impl Flight {
    pub(crate) fn detach(&self) {
        *self.detached.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }
}

pub(crate) struct Inner {
    pub(crate) memory: MemoryTier,
    pub(crate) persistent: Arc<dyn CacheTier>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: CacheConfig,
    pub(crate) flights: Mutex<HashMap<String, Flight>>,
    next_flight: AtomicU64,
    /// Bumped before every removal; a promotion only lands if it has not moved
    epoch: Mutex<u64>,
    pub(crate) stats: StatsRecorder,
}

/// Two-tier response cache with coalesced, conditional fetches
///
/// Cloning is cheap and every clone shares the same tiers and in-flight
/// fetches.
#[derive(Clone)]
pub struct ResponseCache {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("memory_entries", &self.inner.memory.len())
            .field("persistent_entries", &self.inner.persistent.len())
            .field("in_flight", &self.inner.lock_flights().len())
            .finish()
    }
}

impl ResponseCache {
    /// Opens a cache over `persistent` using the wall clock
    pub fn open(config: CacheConfig, persistent: Arc<dyn CacheTier>) -> Self {
        Self::open_with_clock(config, persistent, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        config: CacheConfig,
        persistent: Arc<dyn CacheTier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let memory = MemoryTier::new(config.memory_capacity);
        Self {
            inner: Arc::new(Inner {
                memory,
                persistent,
                clock,
                config,
                flights: Mutex::new(HashMap::new()),
                next_flight: AtomicU64::new(1),
                epoch: Mutex::new(0),
                stats: StatsRecorder::default(),
            }),
        }
    }

    /// Opens a cache whose persistent tier is a [`DiskStore`] in the configured directory
    pub fn open_on_disk(config: CacheConfig) -> Result<Self, CacheError> {
        let dir = config.resolve_dir().ok_or_else(|| StoreError::Io {
            op: "resolve_dir",
            path: PathBuf::new(),
            message: "no cache directory configured and no home directory found".to_string(),
        })?;
        let store = DiskStore::open(dir, config.disk_limits)?;
        Ok(Self::open(config, Arc::new(store)))
    }

    /// Waits for in-flight fetches to land in the tiers, then releases the cache
    pub async fn close(self) {
        let pending: Vec<_> = self
            .inner
            .lock_flights()
            .values()
            .map(|f| f.result.clone())
            .collect();
        if !pending.is_empty() {
            debug!(count = pending.len(), "Waiting for in-flight fetches before close");
            future::join_all(pending).await;
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Returns the payload for `key`, fetching it if no entry younger than `ttl` exists
    ///
    /// A fresh memory entry short-circuits everything else. On fetch failure the
    /// newest stored entry, however old, is returned as [`CacheStatus::Degraded`];
    /// only when there is none does the fetch error reach the caller.
    pub async fn fetch(
        &self,
        key: &str,
        ttl: Duration,
        fetcher: &SharedFetcher,
    ) -> Result<CachedResponse, CacheError> {
        if let Some(hit) = self.inner.lookup_fresh(key, ttl) {
            return Ok(hit);
        }

        let flight = {
            let mut flights = self.inner.lock_flights();
            match flights.get(key) {
                Some(existing) => {
                    StatsRecorder::incr(&self.inner.stats.coalesced);
                    debug!(key, "Joining in-flight fetch");
                    existing.result.clone()
                }
                None => {
                    let flight = self.start_flight(key, ttl, fetcher, false);
                    flights.insert(key.to_string(), flight.clone());
                    flight.result
                }
            }
        };
        flight.await
    }

    /// Like [`fetch`](Self::fetch) with the TTL from the configured policy
    pub async fn load(
        &self,
        key: &str,
        fetcher: &SharedFetcher,
    ) -> Result<CachedResponse, CacheError> {
        let ttl = self.inner.config.ttl.ttl_for(key);
        self.fetch(key, ttl, fetcher).await
    }

    /// Revalidates `key` against the origin regardless of freshness
    ///
    /// Returns `None` without doing anything when a fetch for `key` is
    /// already running.
    pub async fn refresh(
        &self,
        key: &str,
        fetcher: &SharedFetcher,
    ) -> Option<Result<CachedResponse, CacheError>> {
        let ttl = self.inner.config.ttl.ttl_for(key);
        let flight = {
            let mut flights = self.inner.lock_flights();
            if flights.contains_key(key) {
                return None;
            }
            let flight = self.start_flight(key, ttl, fetcher, true);
            flights.insert(key.to_string(), flight.clone());
            flight.result
        };
        Some(flight.await)
    }

    /// Whether a fetch for `key` is currently running
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inner.lock_flights().contains_key(key)
    }

    /// Returns the newest stored entry for `key` without judging freshness
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        let (mem, disk) = self.inner.read_both(key);
        newest(mem, disk)
    }

    /// Spawns the fetch task; the caller registers the flight while holding the map lock
    fn start_flight(
        &self,
        key: &str,
        ttl: Duration,
        fetcher: &SharedFetcher,
        force: bool,
    ) -> Flight {
        let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
        let detached = Arc::new(Mutex::new(false));

        let inner = Arc::clone(&self.inner);
        let task_key = key.to_string();
        let task_fetcher = Arc::clone(fetcher);
        let task_detached = Arc::clone(&detached);
        let handle = tokio::spawn(async move {
            let result = inner
                .run_flight(&task_key, ttl, &task_fetcher, force, &task_detached)
                .await;
            inner.finish_flight(&task_key, id);
            result
        });

        let result = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(CacheError::Task(e.to_string())))
        }
        .boxed()
        .shared();

        Flight {
            id,
            detached,
            result,
        }
    }
}

impl Inner {
    pub(crate) fn lock_flights(&self) -> MutexGuard<'_, HashMap<String, Flight>> {
        self.flights.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks the start of a removal so concurrent promotions of what it removes are dropped
    pub(crate) fn bump_epoch(&self) {
        let mut epoch = self.lock_epoch();
        *epoch = epoch.wrapping_add(1);
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Reads `key` from `tier`, logging and counting failures instead of treating them as misses
    pub(crate) fn read_tier(&self, tier: &dyn CacheTier, which: Tier, key: &str) -> Option<CacheEntry> {
        match tier.get(key) {
            Ok(entry) => entry,
            Err(e) => {
                StatsRecorder::incr(&self.stats.store_errors);
                warn!(key, tier = %which, error = %e, "Cache tier unavailable, skipping");
                None
            }
        }
    }

    fn read_both(&self, key: &str) -> (Option<CacheEntry>, Option<CacheEntry>) {
        let mem = self.read_tier(&self.memory, Tier::Memory, key);
        let disk = self.read_tier(self.persistent.as_ref(), Tier::Persistent, key);
        (mem, disk)
    }

    /// Steps one and two: a fresh memory entry, else a fresh persistent entry promoted to memory
    fn lookup_fresh(&self, key: &str, ttl: Duration) -> Option<CachedResponse> {
        let now = self.now();

        if let Some(entry) = self.read_tier(&self.memory, Tier::Memory, key) {
            if entry.is_fresh(ttl, now) {
                StatsRecorder::incr(&self.stats.memory_hits);
                debug!(key, "Memory cache hit");
                return Some(CachedResponse::from_entry(&entry, CacheStatus::Fresh, Origin::Memory));
            }
        }

        let epoch = *self.lock_epoch();
        let entry = self.read_tier(self.persistent.as_ref(), Tier::Persistent, key)?;
        if !entry.is_fresh(ttl, now) {
            return None;
        }
        StatsRecorder::incr(&self.stats.persistent_hits);
        debug!(key, "Persistent cache hit, promoting to memory");
        let response = CachedResponse::from_entry(&entry, CacheStatus::Fresh, Origin::Persistent);
        self.promote(entry, epoch);
        Some(response)
    }

    /// Copies a persistent entry into memory unless something was removed since `epoch`
    fn promote(&self, entry: CacheEntry, epoch: u64) {
        let current = self.lock_epoch();
        if *current != epoch {
            debug!(key = %entry.key, "Cache changed during persistent read, not promoting");
            return;
        }
        self.write_memory(entry);
    }

    fn write_memory(&self, entry: CacheEntry) {
        let key = entry.key.clone();
        if let Err(e) = self.memory.put(entry) {
            StatsRecorder::incr(&self.stats.store_errors);
            warn!(key = %key, tier = %Tier::Memory, error = %e, "Failed to write cache entry");
        }
    }

    /// Step three: ask the origin, then write back or fall back
    async fn run_flight(
        &self,
        key: &str,
        ttl: Duration,
        fetcher: &SharedFetcher,
        force: bool,
        detached: &Mutex<bool>,
    ) -> FlightResult {
        // A flight that finished just before this one was registered may
        // already have stored what we need.
        if !force {
            if let Some(hit) = self.lookup_fresh(key, ttl) {
                return Ok(hit);
            }
        }

        let (mem, disk) = self.read_both(key);
        let known = match (mem, disk) {
            (Some(m), Some(d)) if d.stored_at > m.stored_at => Some((d, Tier::Persistent)),
            (Some(m), _) => Some((m, Tier::Memory)),
            (None, Some(d)) => Some((d, Tier::Persistent)),
            (None, None) => None,
        };
        let validator = known.as_ref().and_then(|(e, _)| e.validator.clone());

        StatsRecorder::incr(&self.stats.fetches);
        debug!(key, conditional = validator.is_some(), "Fetching from origin");
        let outcome = fetcher.fetch(key, validator.as_deref()).await;
        let now = self.now();

        match outcome {
            FetchOutcome::Fresh { payload, validator } => {
                let entry = CacheEntry::new(key, payload, validator, now, ttl);
                info!(key, bytes = entry.payload.len(), "Fetched fresh payload");
                self.commit(&entry, detached);
                Ok(CachedResponse::from_entry(&entry, CacheStatus::Fresh, Origin::Network))
            }
            FetchOutcome::NotModified => match known {
                Some((entry, _)) => {
                    StatsRecorder::incr(&self.stats.revalidations);
                    info!(key, "Origin reports payload unchanged");
                    let entry = entry.refreshed(now, ttl);
                    self.commit(&entry, detached);
                    Ok(CachedResponse::from_entry(
                        &entry,
                        CacheStatus::Revalidated,
                        Origin::Network,
                    ))
                }
                None => Err(FetchError::UnexpectedNotModified(key.to_string()).into()),
            },
            FetchOutcome::Failed(err) => match known {
                Some((entry, tier)) => {
                    StatsRecorder::incr(&self.stats.fallbacks);
                    warn!(
                        key,
                        error = %err,
                        age_secs = entry.age(now).as_secs(),
                        "Fetch failed, serving stale entry"
                    );
                    Ok(CachedResponse::from_entry(&entry, CacheStatus::Degraded, tier.into()))
                }
                None => {
                    warn!(key, error = %err, "Fetch failed with nothing cached");
                    Err(err.into())
                }
            },
        }
    }

    /// Writes `entry` to both tiers unless the key was invalidated meanwhile
    fn commit(&self, entry: &CacheEntry, detached: &Mutex<bool>) {
        let detached = detached.lock().unwrap_or_else(|e| e.into_inner());
        if *detached {
            debug!(key = %entry.key, "Key invalidated during fetch, discarding result");
            return;
        }
        self.write_memory(entry.clone());
        if let Err(e) = self.persistent.put(entry.clone()) {
            StatsRecorder::incr(&self.stats.store_errors);
            warn!(key = %entry.key, error = %e, "Failed to persist cache entry");
        }
    }

    fn finish_flight(&self, key: &str, id: u64) {
        let mut flights = self.lock_flights();
        if flights.get(key).map(|f| f.id) == Some(id) {
            flights.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::fetch::Fetcher;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Fetcher returning a scripted sequence of outcomes
    struct ScriptedFetcher {
        outcomes: Mutex<Vec<FetchOutcome>>,
        calls: AtomicUsize,
        validators: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedFetcher {
        fn new(outcomes: Vec<FetchOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
                validators: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, _key: &str, validator: Option<&str>) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.validators
                .lock()
                .unwrap()
                .push(validator.map(str::to_string));
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(FetchOutcome::Failed(FetchError::Other("script exhausted".into())))
        }
    }

    fn cache_with(store: Arc<dyn CacheTier>, clock: &ManualClock) -> ResponseCache {
        ResponseCache::open_with_clock(CacheConfig::default(), store, Arc::new(clock.clone()))
    }

    fn memory_only(clock: &ManualClock) -> ResponseCache {
        cache_with(Arc::new(MemoryTier::default()), clock)
    }

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_fresh_memory_entry_skips_fetcher() {
        let clock = ManualClock::default();
        let cache = memory_only(&clock);
        let script = ScriptedFetcher::new(vec![FetchOutcome::fresh("P1", None)]);
        let fetcher: SharedFetcher = script.clone();

        let first = cache.fetch("items", TTL, &fetcher).await.unwrap();
        let second = cache.fetch("items", TTL, &fetcher).await.unwrap();

        assert_eq!(first.origin, Origin::Network);
        assert_eq!(second.origin, Origin::Memory);
        assert_eq!(second.payload, first.payload);
        assert_eq!(script.calls(), 1);
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[tokio::test]
    async fn test_persistent_hit_is_promoted_to_memory() {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryTier::default());
        store
            .put(CacheEntry::new("items", "P0", None, clock.now(), TTL))
            .unwrap();
        let cache = cache_with(store, &clock);
        let script = ScriptedFetcher::new(vec![]);
        let fetcher: SharedFetcher = script.clone();

        let first = cache.fetch("items", TTL, &fetcher).await.unwrap();
        let second = cache.fetch("items", TTL, &fetcher).await.unwrap();

        assert_eq!(first.origin, Origin::Persistent);
        assert_eq!(second.origin, Origin::Memory);
        assert_eq!(script.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_entry_sends_validator_and_refreshes_on_not_modified() {
        let clock = ManualClock::default();
        let cache = memory_only(&clock);
        let script = ScriptedFetcher::new(vec![
            FetchOutcome::fresh("P1", Some("\"v1\"".into())),
            FetchOutcome::NotModified,
        ]);
        let fetcher: SharedFetcher = script.clone();

        cache.fetch("items", TTL, &fetcher).await.unwrap();
        clock.advance(Duration::from_secs(61));
        let revalidated = cache.fetch("items", TTL, &fetcher).await.unwrap();

        assert_eq!(revalidated.status, CacheStatus::Revalidated);
        assert_eq!(&revalidated.payload[..], b"P1");
        assert_eq!(revalidated.stored_at, clock.now());
        assert_eq!(
            *script.validators.lock().unwrap(),
            vec![None, Some("\"v1\"".to_string())]
        );
        assert_eq!(cache.peek("items").unwrap().stored_at, clock.now());
    }

    #[tokio::test]
    async fn test_not_modified_without_entry_is_an_error() {
        let clock = ManualClock::default();
        let cache = memory_only(&clock);
        let fetcher: SharedFetcher = ScriptedFetcher::new(vec![FetchOutcome::NotModified]);

        let err = cache.fetch("items", TTL, &fetcher).await.unwrap_err();

        assert_eq!(
            err,
            CacheError::Fetch(FetchError::UnexpectedNotModified("items".into()))
        );
    }

    #[tokio::test]
    async fn test_failure_with_stale_entry_degrades() {
        let clock = ManualClock::default();
        let cache = memory_only(&clock);
        let fetcher: SharedFetcher = ScriptedFetcher::new(vec![
            FetchOutcome::fresh("P1", None),
            FetchOutcome::Failed(FetchError::Timeout),
        ]);

        cache.fetch("items", TTL, &fetcher).await.unwrap();
        clock.advance(Duration::from_secs(600));
        let degraded = cache.fetch("items", TTL, &fetcher).await.unwrap();

        assert!(degraded.is_degraded());
        assert_eq!(&degraded.payload[..], b"P1");
        assert_eq!(cache.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_failure_without_entry_propagates() {
        let clock = ManualClock::default();
        let cache = memory_only(&clock);
        let fetcher: SharedFetcher =
            ScriptedFetcher::new(vec![FetchOutcome::Failed(FetchError::Status(503))]);

        let err = cache.fetch("items", TTL, &fetcher).await.unwrap_err();

        assert_eq!(err, CacheError::Fetch(FetchError::Status(503)));
    }

    #[tokio::test]
    async fn test_refresh_bypasses_freshness() {
        let clock = ManualClock::default();
        let cache = memory_only(&clock);
        let script = ScriptedFetcher::new(vec![
            FetchOutcome::fresh("P1", None),
            FetchOutcome::fresh("P2", None),
        ]);
        let fetcher: SharedFetcher = script.clone();

        cache.fetch("items", TTL, &fetcher).await.unwrap();
        let refreshed = cache.refresh("items", &fetcher).await.unwrap().unwrap();

        assert_eq!(&refreshed.payload[..], b"P2");
        assert_eq!(script.calls(), 2);
        let hit = cache.fetch("items", TTL, &fetcher).await.unwrap();
        assert_eq!(&hit.payload[..], b"P2");
    }

    /// A tier whose reads always fail
    struct BrokenTier;

    impl CacheTier for BrokenTier {
        fn get(&self, _key: &str) -> Result<Option<CacheEntry>, StoreError> {
            Err(StoreError::corrupt("/broken", "unreadable"))
        }
        fn put(&self, _entry: CacheEntry) -> Result<(), StoreError> {
            Err(StoreError::corrupt("/broken", "unwritable"))
        }
        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::corrupt("/broken", "unwritable"))
        }
        fn clear(&self) -> Result<(), StoreError> {
            Err(StoreError::corrupt("/broken", "unwritable"))
        }
        fn keys(&self) -> Result<Vec<String>, StoreError> {
            Err(StoreError::corrupt("/broken", "unreadable"))
        }
        fn len(&self) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn test_store_errors_fall_through_and_are_counted() {
        let clock = ManualClock::default();
        let cache = cache_with(Arc::new(BrokenTier), &clock);
        let fetcher: SharedFetcher = ScriptedFetcher::new(vec![FetchOutcome::fresh("P1", None)]);

        let response = cache.fetch("items", TTL, &fetcher).await.unwrap();

        assert_eq!(&response.payload[..], b"P1");
        assert_eq!(response.origin, Origin::Network);
        assert!(cache.stats().store_errors >= 2, "read and write failures are counted");
        // Memory tier still took the entry
        let again = cache.fetch("items", TTL, &fetcher).await.unwrap();
        assert_eq!(again.origin, Origin::Memory);
    }

    /// A tier that takes a while to hand back what it read
    struct SlowReadTier {
        inner: MemoryTier,
        delay: std::time::Duration,
    }

    impl CacheTier for SlowReadTier {
        fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
            let entry = self.inner.get(key);
            std::thread::sleep(self.delay);
            entry
        }
        fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
            self.inner.put(entry)
        }
        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }
        fn keys(&self) -> Result<Vec<String>, StoreError> {
            self.inner.keys()
        }
        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalidate_during_persistent_read_is_not_undone_by_promotion() {
        let clock = ManualClock::default();
        let store = Arc::new(SlowReadTier {
            inner: MemoryTier::default(),
            delay: Duration::from_millis(300),
        });
        store
            .put(CacheEntry::new("items", "pre-mutation", None, clock.now(), TTL))
            .unwrap();
        let cache = cache_with(store, &clock);
        let script = ScriptedFetcher::new(vec![FetchOutcome::fresh("post-mutation", None)]);
        let fetcher: SharedFetcher = script.clone();

        let reader = {
            let cache = cache.clone();
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move { cache.fetch("items", Duration::from_secs(3600), &fetcher).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.invalidate("items").unwrap();
        let during = reader.await.unwrap().unwrap();
        assert_eq!(during.origin, Origin::Persistent);

        let after = cache.fetch("items", TTL, &fetcher).await.unwrap();

        assert_eq!(script.calls(), 1, "the fetch after invalidation goes to the origin");
        assert_eq!(&after.payload[..], b"post-mutation");
        assert_eq!(after.origin, Origin::Network);
    }
}
