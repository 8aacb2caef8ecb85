//! HTTP origin for the response cache
//!
//! Maps cache keys onto GET requests below a base URL. The stored validator
//! goes out as `If-None-Match`, a `304` becomes
//! [`FetchOutcome::NotModified`] and the response `ETag` is kept for the next
//! revalidation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::FetchError;
use crate::fetch::{FetchOutcome, Fetcher};

/// Default per-request deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client fetching cache keys from an HTTP API
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    /// Creates an HttpFetcher with the default timeout
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Other(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create an HttpFetcher with a custom HTTP client
    ///
    /// The client is expected to carry its own timeout.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Builds the request URL for a key such as `items?page=2` or `/items`
    pub fn url_for(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            key.trim_start_matches('/')
        )
    }
}

fn map_request_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, key: &str, validator: Option<&str>) -> FetchOutcome {
        let url = self.url_for(key);
        let mut request = self.client.get(&url);
        if let Some(tag) = validator {
            request = request.header(IF_NONE_MATCH, tag);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return FetchOutcome::Failed(map_request_error(e)),
        };

        let status = response.status();
        debug!(%url, status = status.as_u16(), "Origin responded");

        if status == StatusCode::NOT_MODIFIED {
            return FetchOutcome::NotModified;
        }
        if !status.is_success() {
            return FetchOutcome::Failed(FetchError::Status(status.as_u16()));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match response.bytes().await {
            Ok(body) => FetchOutcome::Fresh {
                payload: body,
                validator: etag,
            },
            Err(e) => FetchOutcome::Failed(map_request_error(e)),
        }
    }
}
