//! Cache configuration
//!
//! [`CacheConfig`] collects everything needed to open a
//! [`ResponseCache`](crate::cache::ResponseCache). Values come from
//! `Default`, the `with_*` builders, or the environment via
//! [`CacheConfig::from_env`].

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{DiskLimits, DiskStore, DEFAULT_MEMORY_CAPACITY};

/// Default time-to-live for entries without a more specific rule
pub const DEFAULT_TTL: Duration = Duration::from_secs(300); // 5 minutes

/// How long entries stay fresh, per key
///
/// Overrides are matched by key prefix; the longest matching prefix wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    default_ttl: Duration,
    overrides: Vec<(String, Duration)>,
}

impl TtlPolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            overrides: Vec::new(),
        }
    }

    /// Adds or replaces the TTL for keys starting with `prefix`
    pub fn with_override(mut self, prefix: impl Into<String>, ttl: Duration) -> Self {
        let prefix = prefix.into();
        self.overrides.retain(|(p, _)| *p != prefix);
        self.overrides.push((prefix, ttl));
        self
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the TTL that applies to `key`
    pub fn ttl_for(&self, key: &str) -> Duration {
        self.overrides
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.default_ttl)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// Configuration for a [`ResponseCache`](crate::cache::ResponseCache)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory for the persistent tier; `None` means the XDG default
    pub dir: Option<PathBuf>,
    /// Maximum number of entries held in memory
    pub memory_capacity: usize,
    /// Bounds for the persistent tier
    pub disk_limits: DiskLimits,
    /// TTLs used by `load` and the background refresher
    pub ttl: TtlPolicy,
    /// Extra time an expired entry is kept for fallback before `purge_expired` drops it
    pub stale_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            disk_limits: DiskLimits::default(),
            ttl: TtlPolicy::default(),
            stale_grace: Duration::ZERO,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from `RESPCACHE_*` environment variables
    ///
    /// Unset or unparsable variables keep their default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let dir = std::env::var("RESPCACHE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let default_ttl = env_parse::<u64>("RESPCACHE_DEFAULT_TTL_SECS")
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TTL);

        let memory_capacity =
            env_parse("RESPCACHE_MEMORY_CAPACITY").unwrap_or(defaults.memory_capacity);

        let disk_limits = DiskLimits {
            max_entries: env_parse("RESPCACHE_MAX_ENTRIES")
                .unwrap_or(defaults.disk_limits.max_entries),
            max_bytes: env_parse("RESPCACHE_MAX_BYTES").unwrap_or(defaults.disk_limits.max_bytes),
        };

        let stale_grace = env_parse::<u64>("RESPCACHE_STALE_GRACE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.stale_grace);

        Self {
            dir,
            memory_capacity,
            disk_limits,
            ttl: TtlPolicy::new(default_ttl),
            stale_grace,
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    pub fn with_disk_limits(mut self, limits: DiskLimits) -> Self {
        self.disk_limits = limits;
        self
    }

    pub fn with_ttl_policy(mut self, policy: TtlPolicy) -> Self {
        self.ttl = policy;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.ttl.default_ttl = ttl;
        self
    }

    pub fn with_stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }

    /// The directory the persistent tier should use, if one can be determined
    pub fn resolve_dir(&self) -> Option<PathBuf> {
        self.dir.clone().or_else(DiskStore::default_dir)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
