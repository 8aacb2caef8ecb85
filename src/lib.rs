//! respcache library
//!
//! A client-side response cache: a memory tier and a persistent tier in front
//! of an origin, with TTL expiry, conditional revalidation, fallback to stale
//! data when the origin fails, and invalidation after mutations.
//!
//! ```ignore
//! let cache = ResponseCache::open_on_disk(CacheConfig::from_env())?;
//! let fetcher: SharedFetcher = Arc::new(HttpFetcher::new("https://api.example.com/v1")?);
//!
//! let items = cache.fetch("items", Duration::from_secs(60), &fetcher).await?;
//! if items.is_degraded() {
//!     // show an "offline" indicator
//! }
//!
//! cache
//!     .mutate(InvalidationScope::prefix("items"), api.update_item(5))
//!     .await?;
//! ```

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod refresh;
