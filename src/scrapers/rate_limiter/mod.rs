//! Per-host request pacing.
//!
//! Every request to a host waits for a courtesy gap after the previous one.
//! A 429 or 503 widens the gap and a run of successes narrows it back.

mod config;
mod domain_state;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

pub use config::RateLimitConfig;
use domain_state::HostPace;

#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    config: RateLimitConfig,
    hosts: Arc<Mutex<HashMap<String, HostPace>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            hosts: Arc::default(),
        }
    }

    /// Wait for the URL's host to be free, then claim the slot.
    ///
    /// Returns the host to report the outcome against, or `None` for a URL
    /// without one.
    pub async fn acquire(&self, url: &str) -> Option<String> {
        let host = Url::parse(url).ok()?.host_str()?.to_string();
        loop {
            let wait = {
                let mut hosts = self.hosts.lock().await;
                let pace = hosts
                    .entry(host.clone())
                    .or_insert_with(|| HostPace::new(self.config.base_delay));
                let now = Instant::now();
                let wait = pace.wait_at(now);
                if wait.is_zero() {
                    pace.start(now);
                    return Some(host);
                }
                wait
            };
            debug!("Pacing {}: waiting {:?}", host, wait);
            tokio::time::sleep(wait).await;
        }
    }

    pub async fn report_success(&self, host: &str) {
        if let Some(pace) = self.hosts.lock().await.get_mut(host) {
            if pace.succeed(&self.config) {
                info!("{} is no longer rate limiting", host);
            }
        }
    }

    pub async fn report_throttled(&self, host: &str, status: u16, retry_after: Option<Duration>) {
        if let Some(pace) = self.hosts.lock().await.get_mut(host) {
            pace.throttle(&self.config, retry_after, Instant::now());
            warn!(
                "{} answered HTTP {}, slowing down to {:?}",
                host,
                status,
                retry_after.unwrap_or(pace.gap)
            );
        }
    }

    /// Current gap for `host`, if it has been requested.
    pub async fn gap(&self, host: &str) -> Option<Duration> {
        self.hosts.lock().await.get(host).map(|pace| pace.gap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_returns_host() {
        let limiter = RateLimiter::with_config(RateLimitConfig::unpaced());
        assert_eq!(limiter.acquire("https://nyaa.si/view/1").await.as_deref(), Some("nyaa.si"));
        assert_eq!(limiter.acquire("not a url").await, None);
    }

    #[tokio::test]
    async fn test_throttle_widens_gap() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::from_millis(100),
            ..RateLimitConfig::default()
        });
        let host = limiter.acquire("https://sukebei.nyaa.si/?p=1").await.unwrap();
        limiter.report_throttled(&host, 429, None).await;
        assert_eq!(limiter.gap(&host).await, Some(Duration::from_millis(200)));
        assert_eq!(limiter.gap("animetosho.org").await, None);
    }

    #[tokio::test]
    async fn test_second_request_waits_for_gap() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::from_millis(50),
            ..RateLimitConfig::default()
        });
        limiter.acquire("https://nyaa.si/?p=1").await;
        let before = Instant::now();
        limiter.acquire("https://nyaa.si/?p=2").await;
        assert!(before.elapsed() >= Duration::from_millis(40));
    }
}
