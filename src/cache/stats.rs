//! Counters describing how requests were served

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered by a fresh memory entry
    pub memory_hits: u64,
    /// Requests answered by a fresh persistent entry
    pub persistent_hits: u64,
    /// Fetcher invocations
    pub fetches: u64,
    /// Requests that joined a fetch already in flight
    pub coalesced: u64,
    /// Fetches answered with "not modified"
    pub revalidations: u64,
    /// Requests served from a stale entry after a failed fetch
    pub fallbacks: u64,
    /// Tier operations that failed (never counted as misses)
    pub store_errors: u64,
}

impl CacheStats {
    /// Share of requests served without contacting the origin
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.persistent_hits;
        let total = hits + self.fetches + self.coalesced;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    pub memory_hits: AtomicU64,
    pub persistent_hits: AtomicU64,
    pub fetches: AtomicU64,
    pub coalesced: AtomicU64,
    pub revalidations: AtomicU64,
    pub fallbacks: AtomicU64,
    pub store_errors: AtomicU64,
}

impl StatsRecorder {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            revalidations: self.revalidations.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty_is_zero() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_counts_both_tiers() {
        let stats = CacheStats {
            memory_hits: 2,
            persistent_hits: 1,
            fetches: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recorder_snapshot() {
        let recorder = StatsRecorder::default();
        StatsRecorder::incr(&recorder.fetches);
        StatsRecorder::incr(&recorder.fetches);
        StatsRecorder::incr(&recorder.fallbacks);

        let snap = recorder.snapshot();
        assert_eq!(snap.fetches, 2);
        assert_eq!(snap.fallbacks, 1);
        assert_eq!(snap.memory_hits, 0);
    }
}
