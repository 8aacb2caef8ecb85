//! Cache entry model and freshness rules

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A cached response for one logical key
///
/// The payload is opaque: the cache never looks inside it. An entry is
/// always replaced whole, so the payload and validator seen together were
/// written together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Logical resource identifier (e.g. a path plus query parameters)
    pub key: String,
    /// Raw response body
    pub payload: Bytes,
    /// Entity tag or similar token for conditional refetch
    pub validator: Option<String>,
    /// When the entry was last written or revalidated
    pub stored_at: DateTime<Utc>,
    /// Lifetime the entry was written with
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        payload: impl Into<Bytes>,
        validator: Option<String>,
        stored_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
            validator,
            stored_at,
            ttl,
        }
    }

    /// Age of the entry at `now`; a `stored_at` in the future counts as zero
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.stored_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Whether the entry may be served without contacting the origin
    ///
    /// Fresh means strictly younger than `ttl`; a zero TTL is never fresh.
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) < ttl
    }

    /// Freshness judged by the TTL the entry was stored with
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_fresh(self.ttl, now)
    }

    /// Returns a copy with `stored_at` moved to `now`, keeping payload and validator
    pub fn refreshed(&self, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            stored_at: now,
            ttl,
            ..self.clone()
        }
    }

    /// Approximate storage footprint, used for byte-bounded eviction
    pub fn size_hint(&self) -> u64 {
        (self.key.len() + self.payload.len() + self.validator.as_ref().map_or(0, |v| v.len()))
            as u64
    }
}

/// Picks the most recently stored of two optional entries
pub(crate) fn newest(a: Option<CacheEntry>, b: Option<CacheEntry>) -> Option<CacheEntry> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.stored_at > a.stored_at { b } else { a }),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn entry(stored: i64) -> CacheEntry {
        CacheEntry::new("items", "P1", Some("\"v1\"".into()), at(stored), Duration::from_secs(60))
    }

    #[test]
    fn test_entry_is_fresh_within_ttl() {
        let e = entry(0);
        assert!(e.is_fresh(Duration::from_secs(60), at(30)));
        assert!(!e.is_expired(at(59)));
    }

    #[test]
    fn test_entry_is_stale_at_exact_ttl_boundary() {
        let e = entry(0);
        assert!(!e.is_fresh(Duration::from_secs(60), at(60)));
        assert!(e.is_expired(at(90)));
    }

    #[test]
    fn test_zero_ttl_is_never_fresh() {
        let e = entry(0);
        assert!(!e.is_fresh(Duration::ZERO, at(0)));
    }

    #[test]
    fn test_future_stored_at_counts_as_zero_age() {
        let e = entry(10);
        assert_eq!(e.age(at(0)), Duration::ZERO);
        assert!(e.is_fresh(Duration::from_secs(1), at(0)));
    }

    #[test]
    fn test_refreshed_keeps_payload_and_validator() {
        let e = entry(0);
        let r = e.refreshed(at(120), Duration::from_secs(30));
        assert_eq!(r.payload, e.payload);
        assert_eq!(r.validator, e.validator);
        assert_eq!(r.stored_at, at(120));
        assert_eq!(r.ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_newest_prefers_later_stored_at() {
        let older = entry(0);
        let younger = entry(45);
        assert_eq!(newest(Some(older.clone()), Some(younger.clone())), Some(younger.clone()));
        assert_eq!(newest(Some(younger.clone()), Some(older.clone())), Some(younger));
        assert_eq!(newest(None, Some(older.clone())), Some(older));
        assert_eq!(newest(None, None), None);
    }
}
