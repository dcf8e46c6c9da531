//! HTTP client for the blob store.
//!
//! The store is reached over a discovery-resolved name whose backing
//! instances may be briefly unavailable during rolling updates, so
//! connection-establishment failures are retried transparently with bounded
//! backoff. Application-level rejections (any non-200 status) are never
//! retried; they surface as [`StoreError::UnexpectedStatus`].
//!
//! Every retry attempt resends the body from the beginning; a request whose
//! body was partially consumed is never resumed.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: StatusCode, url: String },
}

/// Retry policy for connection-establishment failures.
///
/// Scoped to dial errors only: a refused or unreachable connection is
/// retried, a remote that answered is believed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles per attempt.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Blob store client.
#[derive(Debug, Clone)]
pub struct BlobClient {
    client: Client,
    retry: RetryPolicy,
}

impl BlobClient {
    /// Create a client with the default retry policy.
    pub fn new() -> Result<Self, StoreError> {
        Self::with_retry(RetryPolicy::default())
    }

    /// Create a client with an explicit retry policy.
    pub fn with_retry(retry: RetryPolicy) -> Result<Self, StoreError> {
        let client = Client::builder().build()?;
        Ok(Self { client, retry })
    }

    /// PUT a byte buffer to the given URL.
    ///
    /// Success means the store answered 200; bytes are then durably
    /// readable at `url`.
    pub async fn put_bytes(&self, url: &str, body: Bytes) -> Result<(), StoreError> {
        debug!(url = %url, size = body.len(), "PUT blob");

        let response = self
            .send_with_retry(|| self.client.put(url).body(body.clone()))
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(StoreError::UnexpectedStatus {
                status,
                url: url.to_string(),
            }),
        }
    }

    /// PUT a file's contents to the given URL.
    ///
    /// The file is read into memory first so retries restart from a full
    /// body. Packaged layers are squashfs images of filesystem diffs and
    /// stay well inside memory; streaming would be better for anything
    /// larger.
    pub async fn put_file(&self, url: &str, path: &Path) -> Result<(), StoreError> {
        let body = tokio::fs::read(path).await?;
        self.put_bytes(url, Bytes::from(body)).await
    }

    /// GET the object at the given URL.
    ///
    /// A 404 is a first-class outcome (`Ok(None)`), distinguishing "never
    /// stored" from a transient failure. Any status other than 200/404 is an
    /// error.
    pub async fn get(&self, url: &str) -> Result<Option<Bytes>, StoreError> {
        debug!(url = %url, "GET blob");

        let response = self.send_with_retry(|| self.client.get(url)).await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.bytes().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(StoreError::UnexpectedStatus {
                status,
                url: url.to_string(),
            }),
        }
    }

    /// Send a request, retrying dial failures per the retry policy.
    ///
    /// `make_request` builds a fresh request per attempt, so each retry
    /// carries a complete body.
    async fn send_with_retry<F>(&self, make_request: F) -> Result<reqwest::Response, StoreError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut backoff = self.retry.initial_backoff;
        let mut attempt = 1;

        loop {
            match make_request().send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() && attempt < self.retry.max_attempts => {
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Blob store dial failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(StoreError::Http(e)),
            }
        }
    }
}
