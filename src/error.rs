//! Error types for the response cache
//!
//! Every error here is `Clone`: a single in-flight fetch hands the same result
//! to all callers that joined it.

use std::path::PathBuf;

use thiserror::Error;

/// Which cache tier an operation touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Memory,
    Persistent,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Memory => write!(f, "memory"),
            Tier::Persistent => write!(f, "persistent"),
        }
    }
}

/// Failures reported by a cache tier's underlying storage
///
/// A `StoreError` is never the same thing as a miss: a tier that fails is
/// skipped for the current request and the failure is logged and counted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Reading or writing the backing storage failed
    #[error("I/O error during {op} on {}: {message}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        message: String,
    },

    /// Stored data exists but cannot be decoded
    #[error("Corrupt cache record at {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures reported by a [`Fetcher`](crate::fetch::Fetcher)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The request never produced a response
    #[error("Network error: {0}")]
    Network(String),

    /// The fetcher's own deadline elapsed
    #[error("Request timed out")]
    Timeout,

    /// The origin answered with a status that carries no usable payload
    #[error("Origin returned HTTP {0}")]
    Status(u16),

    /// The origin answered "not modified" although no validator was sent
    #[error("Origin reported not-modified for '{0}' but nothing is cached")]
    UnexpectedNotModified(String),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced to callers of [`ResponseCache`](crate::cache::ResponseCache)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The fetch failed and no cached entry could stand in for it
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// A store operation the caller asked for directly failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// One tier dropped the key but the other did not; retry the invalidation
    #[error("Failed to invalidate '{key}' in the {tier} tier: {source}")]
    Invalidation {
        key: String,
        tier: Tier,
        #[source]
        source: StoreError,
    },

    /// The background task running a shared fetch died
    #[error("Fetch task failed: {0}")]
    Task(String),
}

/// Result of [`ResponseCache::mutate`](crate::cache::ResponseCache::mutate)
#[derive(Debug, Error)]
pub enum MutationError<T, E> {
    /// The mutating operation itself failed; the cache was left untouched
    #[error("Mutation failed: {0}")]
    Operation(E),

    /// The mutation succeeded but its cache scope could not be invalidated
    ///
    /// `output` is the mutation's result, handed back so callers can still
    /// use it after retrying the invalidation.
    #[error("Mutation succeeded but invalidation failed: {source}")]
    Invalidation {
        output: T,
        #[source]
        source: CacheError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_names_operation_and_path() {
        let err = StoreError::io(
            "write",
            "/tmp/cache/abc.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("write"));
        assert!(msg.contains("/tmp/cache/abc.json"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_fetch_error_converts_into_cache_error() {
        let err: CacheError = FetchError::Status(503).into();
        assert_eq!(err, CacheError::Fetch(FetchError::Status(503)));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_invalidation_error_mentions_key_and_tier() {
        let err = CacheError::Invalidation {
            key: "items".to_string(),
            tier: Tier::Persistent,
            source: StoreError::corrupt("/x", "bad json"),
        };
        let msg = err.to_string();
        assert!(msg.contains("items"));
        assert!(msg.contains("persistent"));
    }
}
