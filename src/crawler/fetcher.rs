//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - The `Transport` seam a single GET goes through
//! - Error classification (transient vs permanent)
//! - Retry logic with capped exponential backoff and jitter
//! - Honoring `Retry-After` on HTTP 429

use crate::config::{CrawlerConfig, UserAgentConfig};
use crate::crawler::rate_limiter::clamped_secs;
use crate::crawler::RateLimiter;
use crate::state::FailureKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{header::RETRY_AFTER, redirect::Policy, Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Longest server-requested pause we honor after a 429
const MAX_RETRY_AFTER: Duration = Duration::from_secs(15 * 60);

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct RawPage {
    /// Final URL after redirects
    pub url: Url,
    /// HTTP status code
    pub status: u16,
    /// Page body content
    pub body: String,
}

/// Outcome of one failed network attempt
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("HTTP {status}")]
    Status {
        status: u16,
        /// Server-provided `Retry-After`, if any
        retry_after: Option<Duration>,
    },

    #[error("Request timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    /// The connection broke while sending the request or reading the body
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// The request could not be built or followed (bad URL, redirect loop)
    #[error("Invalid request: {0}")]
    Request(String),
}

impl TransportError {
    /// Returns true if another attempt may succeed
    ///
    /// Timeouts, connection failures, 5xx, 408 and 429 are transient; other
    /// statuses and malformed requests are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => {
                *status >= 500
                    || *status == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *status == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            Self::Timeout | Self::Connect(_) | Self::Transfer(_) => true,
            Self::Request(_) => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::TOO_MANY_REQUESTS.as_u16())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_builder() || e.is_redirect() {
            Self::Request(e.to_string())
        } else {
            Self::Transfer(e.to_string())
        }
    }
}

/// One HTTP GET, without retries
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<RawPage, TransportError>;
}

/// A fetch that failed for good
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Gave up on {target} after {attempts} attempts: {message}")]
    Transient {
        target: String,
        attempts: u32,
        status: Option<u16>,
        message: String,
    },

    #[error("Permanent failure fetching {target}: {message}")]
    Permanent {
        target: String,
        status: Option<u16>,
        message: String,
    },
}

impl FetchError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Transient { .. } => FailureKind::TransientFetch,
            Self::Permanent { .. } => FailureKind::PermanentFetch,
        }
    }

    /// The last HTTP status observed, if the failure had one
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Permanent { status, .. } => *status,
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Timeout for a whole request
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use forum_archiver::config::UserAgentConfig;
/// use forum_archiver::crawler::build_http_client;
/// use std::time::Duration;
///
/// let config = UserAgentConfig {
///     crawler_name: "ForumArchiver".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(30)).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL; ContactEmail)
    let user_agent = format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// `Transport` backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &UserAgentConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config, timeout)?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<RawPage, TransportError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));

            return Err(TransportError::Status {
                status: status.as_u16(),
                retry_after,
            });
        }

        let final_url = response.url().clone();
        let body = response.text().await?;

        Ok(RawPage {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }
}

/// Parses a `Retry-After` value: delay-seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Backoff and retry limits of a single fetch
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub jitter: Duration,
    /// Wait after a 429 without a usable `Retry-After`
    pub rate_limit_wait: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: clamped_secs(config.backoff_base_seconds),
            backoff_cap: clamped_secs(config.backoff_cap_seconds),
            jitter: clamped_secs(config.jitter_seconds),
            rate_limit_wait: clamped_secs(config.rate_limit_wait_seconds),
        }
    }

    /// `min(base * 2^(attempt-1), cap)` for the wait after failed attempt `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let secs = self.backoff_base.as_secs_f64() * 2f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.backoff_cap.as_secs_f64()))
    }

    /// Full wait after failed attempt `attempt`
    ///
    /// Jitter is added to the backoff and the sum is still held to the cap.
    /// A 429 waits at least the server's hint (or `rate_limit_wait`).
    pub fn wait_after(&self, attempt: u32, error: &TransportError) -> Duration {
        let jitter = if self.jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(rand::rng().random_range(0.0..=self.jitter.as_secs_f64()))
        };
        let backoff = (self.backoff(attempt) + jitter).min(self.backoff_cap);

        if error.is_rate_limited() {
            let hinted = error
                .retry_after()
                .unwrap_or(self.rate_limit_wait)
                .min(MAX_RETRY_AFTER);
            return hinted.max(backoff);
        }

        backoff
    }
}

/// Performs one logical fetch with bounded retries
///
/// Every attempt, retries included, first passes through the shared
/// `RateLimiter`.
pub struct RetryingFetcher {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(transport: Arc<dyn Transport>, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            limiter,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches a URL with full error handling and retry logic
    ///
    /// # Retry Logic
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Timeout, connection failure, 5xx, 408 | Retry after backoff |
    /// | HTTP 429 | Retry after `Retry-After` (or the configured wait) |
    /// | Other 4xx, malformed request | Fail immediately |
    ///
    /// At most `max_retries + 1` attempts are made.
    ///
    /// # Returns
    ///
    /// * `Ok(RawPage)` - The page body
    /// * `Err(FetchError)` - Retries exhausted or a permanent failure
    pub async fn fetch(&self, target: &Url) -> Result<RawPage, FetchError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.limiter.wait().await;

            let error = match self.transport.get(target).await {
                Ok(page) => return Ok(page),
                Err(e) => e,
            };

            if !error.is_transient() {
                return Err(FetchError::Permanent {
                    target: target.to_string(),
                    status: error.status(),
                    message: error.to_string(),
                });
            }

            if attempt > self.policy.max_retries {
                return Err(FetchError::Transient {
                    target: target.to_string(),
                    attempts: attempt,
                    status: error.status(),
                    message: error.to_string(),
                });
            }

            let wait = self.policy.wait_after(attempt, &error);
            tracing::warn!(
                "Attempt {}/{} for {} failed ({}), retrying in {:.1}s",
                attempt,
                self.policy.max_retries + 1,
                target,
                error,
                wait.as_secs_f64()
            );
            tokio::time::sleep(wait).await;
        }
    }
}
