//! The origin side of the cache
//!
//! A [`Fetcher`] knows how to retrieve a key from wherever the data really
//! lives. The cache passes along the validator of the newest entry it holds so
//! the origin can answer "not modified" instead of resending the payload.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;

/// What a fetch attempt produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A new payload, optionally with a validator for future revalidation
    Fresh {
        payload: Bytes,
        validator: Option<String>,
    },
    /// The origin confirmed the cached payload is still current
    NotModified,
    /// The attempt failed; the fetcher has already applied its own timeout
    Failed(FetchError),
}

impl FetchOutcome {
    pub fn fresh(payload: impl Into<Bytes>, validator: Option<String>) -> Self {
        FetchOutcome::Fresh {
            payload: payload.into(),
            validator,
        }
    }
}

/// Retrieves data for a cache key from its origin
///
/// Implementations must bound their own running time and report a timeout as
/// [`FetchOutcome::Failed`]; the cache adds no deadline of its own.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &str, validator: Option<&str>) -> FetchOutcome;
}

/// Fetchers are handed to background tasks, so they travel behind an `Arc`
pub type SharedFetcher = Arc<dyn Fetcher>;

