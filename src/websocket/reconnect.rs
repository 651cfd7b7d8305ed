//! Reconnection backoff.

use std::time::Duration;

/// Backoff policy between reconnection attempts.
///
/// The delay before retry `n` (0-based) is `initial_delay * multiplier^n`,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor applied per consecutive failure.
    pub multiplier: f64,
    /// Consecutive failed attempts tolerated before giving up (`None` = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
            multiplier: 1.3,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait before retry number `attempt` (0-based).
    ///
    /// Clamping happens on [`Duration`], so `max_delay` may be as large as
    /// [`Duration::MAX`].
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.max(self.initial_delay);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        Duration::try_from_secs_f64(delay).map_or(cap, |delay| delay.min(cap))
    }

    /// Whether `failures` consecutive failed attempts exhaust the policy.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures > max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_reference_options() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(4));
        assert_eq!(config.max_delay, Duration::from_secs(10));
        assert_eq!(config.max_attempts, None);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        };
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(4), Duration::from_secs(16));
        assert_eq!(config.delay_for(5), Duration::from_secs(30));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_uncapped_delay_saturates() {
        let config = ReconnectConfig {
            max_delay: Duration::MAX,
            ..Default::default()
        };
        assert_eq!(config.delay_for(0), Duration::from_secs(4));
        assert_eq!(config.delay_for(1000), Duration::MAX);
        assert_eq!(config.delay_for(u32::MAX), Duration::MAX);

        let runaway = ReconnectConfig {
            multiplier: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(runaway.delay_for(3), runaway.max_delay);
    }

    #[test]
    fn test_delay_is_monotonic() {
        let config = ReconnectConfig::default();
        let delays: Vec<_> = (0..10).map(|n| config.delay_for(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), config.max_delay);
    }

    #[test]
    fn test_exhausted() {
        let unbounded = ReconnectConfig::default();
        assert!(!unbounded.exhausted(u32::MAX));

        let bounded = ReconnectConfig {
            max_attempts: Some(2),
            ..Default::default()
        };
        assert!(!bounded.exhausted(2));
        assert!(bounded.exhausted(3));
    }
}
