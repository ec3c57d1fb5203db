//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests the harvester makes, including:
//! - Building the shared HTTP client with a descriptive user agent
//! - GET requests for listing and detail pages
//! - GET requests for video bodies
//! - Error classification into transient and permanent failures
//!
//! # Classification
//!
//! | Condition | Transient |
//! |-----------|-----------|
//! | Timeout | yes |
//! | Connection error | yes |
//! | Body read error | yes |
//! | HTTP 5xx, 408, 429 | yes |
//! | Other HTTP 4xx | no |
//! | Malformed request | no |

use crate::config::{Config, TimeoutConfig, UserAgentConfig};
use crate::crawler::retry::{Attempted, RetryFailure, RetryPolicy, Retryable};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors produced by a single HTTP request
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("failed to read body of {url}: {reason}")]
    Body { url: String, reason: String },

    #[error("invalid request for {url}: {reason}")]
    Request { url: String, reason: String },
}

impl FetchError {
    fn from_reqwest(url: &Url, error: reqwest::Error) -> Self {
        let url = url.to_string();
        if error.is_timeout() {
            Self::Timeout { url }
        } else if error.is_body() || error.is_decode() {
            Self::Body {
                url,
                reason: error.to_string(),
            }
        } else if error.is_builder() {
            Self::Request {
                url,
                reason: error.to_string(),
            }
        } else {
            Self::Connect {
                url,
                reason: error.to_string(),
            }
        }
    }

    /// HTTP status of the failure, if the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } | Self::Body { .. } => true,
            Self::Status { status, .. } => {
                *status >= 500
                    || *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            Self::Request { .. } => false,
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// The client-wide timeout is the longest leg timeout; every request also
/// sets its own.
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `timeouts` - Connect and per-leg timeouts
///
/// # Example
///
/// ```no_run
/// use sign_harvester::config::{TimeoutConfig, UserAgentConfig};
/// use sign_harvester::crawler::build_http_client;
///
/// let client = build_http_client(&UserAgentConfig::default(), &TimeoutConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    timeouts: &TimeoutConfig,
) -> Result<Client, reqwest::Error> {
    let longest = timeouts
        .page()
        .max(timeouts.download())
        .max(timeouts.upload());

    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(longest)
        .connect_timeout(timeouts.connect())
        .gzip(true)
        .brotli(true)
        .build()
}

async fn send_get(client: &Client, url: &Url, timeout: Duration) -> Result<reqwest::Response, FetchError> {
    let response = client
        .get(url.clone())
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

/// Performs one GET and returns the body as text
pub async fn get_text(client: &Client, url: &Url, timeout: Duration) -> Result<String, FetchError> {
    send_get(client, url, timeout)
        .await?
        .text()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))
}

/// Performs one GET and returns the raw body
pub async fn get_bytes(client: &Client, url: &Url, timeout: Duration) -> Result<Vec<u8>, FetchError> {
    let bytes = send_get(client, url, timeout)
        .await?
        .bytes()
        .await
        .map_err(|e| FetchError::from_reqwest(url, e))?;
    Ok(bytes.to_vec())
}

/// Polite page fetcher: delay before every request, bounded retries
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    policy: RetryPolicy,
    request_delay: Duration,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(client: Client, policy: RetryPolicy, request_delay: Duration, timeout: Duration) -> Self {
        Self {
            client,
            policy,
            request_delay,
            timeout,
        }
    }

    pub fn from_config(client: Client, config: &Config) -> Self {
        Self::new(
            client,
            RetryPolicy::from_config(&config.retry),
            config.workers.request_delay(),
            config.timeouts.page(),
        )
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// A fetcher that makes at most `limit` attempts per page
    pub fn capped_at(&self, limit: u32) -> Self {
        Self {
            policy: self.policy.capped_at(limit),
            ..self.clone()
        }
    }

    /// Fetches a page, retrying transient failures
    ///
    /// # Returns
    ///
    /// * `Ok(Attempted)` - The page body and the attempts it took
    /// * `Err(RetryFailure)` - A permanent failure or the last transient one
    pub async fn fetch(&self, url: &Url) -> Result<Attempted<String>, RetryFailure<FetchError>> {
        self.policy
            .run(url.as_str(), |attempt| async move {
                if !self.request_delay.is_zero() {
                    tokio::time::sleep(self.request_delay).await;
                }
                tracing::trace!(url = %url, attempt, "GET");
                get_text(&self.client, url, self.timeout).await
            })
            .await
    }
}
