use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::errors::{FetchError, IngestResult};

const USER_AGENT: &str = concat!("ingestor/", env!("CARGO_PKG_VERSION"));

/// Shape of the in-fetch retry: exponential backoff, transient errors only.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_interval,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// HTTP client shared by every adapter.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> IngestResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, retry })
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut backoff = self.retry.backoff();
        let mut attempt = 0;

        loop {
            match self.get_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.kind.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = backoff.next_backoff().unwrap_or(self.retry.max_interval);
                    warn!(url, attempt, ?delay, error = %err, "retrying fetch");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.get_bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Undecodable bodies are structural, not transient.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let bytes = self.get_bytes(url).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::structural(format!("invalid JSON from {}: {}", url, e)))
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!(url, "GET");
        let response = self.client.get(url).send().await?;

        if let Some(err) = classify(response.status(), response.headers()) {
            return Err(err);
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Map a non-success response to a fetch error.
pub(crate) fn classify(status: StatusCode, headers: &HeaderMap) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }

    let message = format!(
        "HTTP {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    );

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(FetchError::rate_limited(message, retry_after(headers)));
    }
    // 5xx and anything else unexpected may clear up by the next run
    Some(FetchError::transient(message))
}

/// Only the delay-seconds form of `Retry-After` is honoured.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
