//! HTTP page fetcher with pacing and bounded retry.

mod user_agent;

pub use user_agent::{resolve_user_agent, USER_AGENT};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::{Client, StatusCode};
use tracing::warn;

use super::rate_limiter::{RateLimitConfig, RateLimiter};
use super::{FetchError, PageFetcher};

/// Retry schedule for a single page fetch.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Options for building an [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
    pub pacing: RateLimitConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            user_agent: None,
            retry: RetryPolicy::default(),
            pacing: RateLimitConfig::default(),
        }
    }
}

/// HTTP client used for every page fetch of a run.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(options: ClientOptions) -> Result<Self, FetchError> {
        Self::with_cookies(options, None)
    }

    /// Create a client that sends the given session cookies.
    pub fn with_cookies(options: ClientOptions, cookies: Option<Arc<Jar>>) -> Result<Self, FetchError> {
        let user_agent = resolve_user_agent(options.user_agent.as_deref());
        let mut builder = Client::builder()
            .user_agent(&user_agent)
            .timeout(options.timeout)
            .gzip(true)
            .brotli(true);
        if let Some(jar) = cookies {
            builder = builder.cookie_provider(jar);
        }
        let client = builder.build().map_err(FetchError::Client)?;

        Ok(Self {
            client,
            rate_limiter: RateLimiter::with_config(options.pacing),
            retry: options.retry,
        })
    }

    /// One GET attempt, reporting the outcome to the rate limiter.
    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        let domain = self.rate_limiter.acquire(url).await;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();

        if let Some(ref domain) = domain {
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                self.rate_limiter
                    .report_throttled(domain, status.as_u16(), retry_after)
                    .await;
            } else if status.is_success() {
                self.rate_limiter.report_success(domain).await;
            }
        }

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(FetchError::Exhausted {
                            url: url.to_string(),
                            attempts,
                            last: e.to_string(),
                        });
                    }
                    let wait = self.retry.backoff(attempt - 1);
                    warn!(
                        "Error fetching {} on attempt {}/{}: {}; retrying in {:?}",
                        url, attempt, attempts, e, wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_client_builds() {
        let client = HttpClient::new(ClientOptions::default());
        assert!(client.is_ok());
    }
}
