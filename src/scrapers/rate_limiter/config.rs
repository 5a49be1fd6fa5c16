//! Pacing settings.

use std::time::Duration;

/// How requests to one host are spaced out.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Courtesy gap between consecutive requests to a host.
    pub base_delay: Duration,
    /// Upper bound for the gap while backing off.
    pub max_delay: Duration,
    /// Factor the gap grows by on each 429/503.
    pub backoff_factor: f64,
    /// Successful requests in a row before the gap is halved again.
    pub successes_to_recover: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            successes_to_recover: 3,
        }
    }
}

impl RateLimitConfig {
    /// No gap between requests.
    pub fn unpaced() -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}
