//! Two-tier response cache
//!
//! This module provides [`ResponseCache`], a cache-aside layer that keeps
//! responses in memory and in a persistent store with configurable TTL
//! values. It supports graceful degradation by serving expired entries,
//! flagged as degraded, when the origin is unavailable.

mod disk;
mod entry;
mod invalidation;
mod manager;
mod memory;
mod stats;
mod tier;

pub use disk::{DiskLimits, DiskStore};
pub use entry::CacheEntry;
pub use invalidation::InvalidationScope;
pub use manager::{CacheStatus, CachedResponse, Origin, ResponseCache};
pub use memory::{MemoryTier, DEFAULT_MEMORY_CAPACITY};
pub use stats::CacheStats;
pub use tier::CacheTier;
