//! Pacing state of one host.

use std::time::{Duration, Instant};

use super::RateLimitConfig;

#[derive(Debug, Clone)]
pub(super) struct HostPace {
    pub gap: Duration,
    last_start: Option<Instant>,
    /// Set from a `Retry-After` hint.
    hold_until: Option<Instant>,
    streak: u32,
    backing_off: bool,
    pub throttled: u64,
}

impl HostPace {
    pub fn new(gap: Duration) -> Self {
        Self {
            gap,
            last_start: None,
            hold_until: None,
            streak: 0,
            backing_off: false,
            throttled: 0,
        }
    }

    /// How long the next request has to wait at `now`.
    pub fn wait_at(&self, now: Instant) -> Duration {
        let paced = self
            .last_start
            .map(|last| (last + self.gap).saturating_duration_since(now))
            .unwrap_or_default();
        let held = self
            .hold_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default();
        paced.max(held)
    }

    pub fn start(&mut self, now: Instant) {
        self.last_start = Some(now);
        self.hold_until = None;
    }

    /// Count a success. Returns true when the host is back at the base gap.
    pub fn succeed(&mut self, config: &RateLimitConfig) -> bool {
        if !self.backing_off {
            return false;
        }
        self.streak += 1;
        if self.streak < config.successes_to_recover {
            return false;
        }
        self.streak = 0;
        self.gap = (self.gap / 2).max(config.base_delay);
        self.backing_off = self.gap > config.base_delay;
        !self.backing_off
    }

    /// Grow the gap after a 429/503 and honour the host's own hint,
    /// held to at most `max_delay`.
    pub fn throttle(&mut self, config: &RateLimitConfig, hint: Option<Duration>, now: Instant) {
        self.throttled += 1;
        self.streak = 0;
        self.backing_off = true;
        let floor = self.gap.max(Duration::from_millis(100));
        self.gap = floor.mul_f64(config.backoff_factor).min(config.max_delay);
        self.hold_until = hint.and_then(|hint| now.checked_add(hint.min(config.max_delay)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            backoff_factor: 2.0,
            successes_to_recover: 2,
        }
    }

    #[test]
    fn test_gap_after_start() {
        let now = Instant::now();
        let mut pace = HostPace::new(Duration::from_millis(500));
        assert_eq!(pace.wait_at(now), Duration::ZERO);
        pace.start(now);
        assert_eq!(pace.wait_at(now + Duration::from_millis(200)), Duration::from_millis(300));
    }

    #[test]
    fn test_hint_outlasts_gap() {
        let now = Instant::now();
        let mut pace = HostPace::new(Duration::from_millis(500));
        pace.start(now);
        pace.throttle(&config(), Some(Duration::from_secs(3)), now);
        assert_eq!(pace.wait_at(now), Duration::from_secs(3));
    }

    #[test]
    fn test_absurd_hint_is_capped() {
        let config = config();
        let now = Instant::now();
        let mut pace = HostPace::new(config.base_delay);
        pace.throttle(&config, Some(Duration::MAX), now);
        assert_eq!(pace.wait_at(now), config.max_delay);
    }

    #[test]
    fn test_backoff_and_recovery() {
        let config = config();
        let now = Instant::now();
        let mut pace = HostPace::new(config.base_delay);
        pace.throttle(&config, None, now);
        pace.throttle(&config, None, now);
        assert_eq!(pace.gap, Duration::from_secs(2));
        assert_eq!(pace.throttled, 2);

        assert!(!pace.succeed(&config));
        assert!(!pace.succeed(&config));
        assert_eq!(pace.gap, Duration::from_secs(1));
        pace.succeed(&config);
        assert!(pace.succeed(&config));
        assert_eq!(pace.gap, config.base_delay);
    }
}
