use std::time::Duration;

use crate::{
    error::ConfigError,
    queue::{DEFAULT_CAPACITY, DEFAULT_GROWTH},
};

/// Knobs for one throttled channel.
///
/// `latency` is the minimum time a byte spends queued before the other side may see it.
/// `bandwidth_bps` is a ceiling in **bits per second** on what each direction releases.
/// When both are zero the throttler is disabled and hands back the original streams.
///
/// ```
/// use std::time::Duration;
/// use netem_throttle::ThrottleConfig;
///
/// let config = ThrottleConfig::new(Duration::from_millis(50), 256_000).with_queue(4096, 2.0);
/// assert!(!config.is_disabled());
/// assert!(ThrottleConfig::default().is_disabled());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    latency: Duration,
    bandwidth_bps: u64,
    queue_capacity: usize,
    queue_growth: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            bandwidth_bps: 0,
            queue_capacity: DEFAULT_CAPACITY,
            queue_growth: DEFAULT_GROWTH,
        }
    }
}

impl ThrottleConfig {
    pub fn new(latency: Duration, bandwidth_bps: u64) -> Self {
        Self {
            latency,
            bandwidth_bps,
            ..Self::default()
        }
    }

    /// Same as [`new`](Self::new) with the latency in milliseconds.
    pub fn from_millis(latency_ms: u64, bandwidth_bps: u64) -> Self {
        Self::new(Duration::from_millis(latency_ms), bandwidth_bps)
    }

    /// Overrides the initial size and growth factor of each direction's queue.
    #[must_use]
    pub fn with_queue(mut self, capacity: usize, growth: f64) -> Self {
        self.queue_capacity = capacity;
        self.queue_growth = growth;
        self
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    pub fn bandwidth_bps(&self) -> u64 {
        self.bandwidth_bps
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn queue_growth(&self) -> f64 {
        self.queue_growth
    }

    /// `true` when neither latency nor bandwidth shaping is configured.
    pub fn is_disabled(&self) -> bool {
        self.latency.is_zero() && self.bandwidth_bps == 0
    }

    /// Checks the queue parameters without allocating anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity < 1 {
            return Err(ConfigError::InvalidCapacity(self.queue_capacity));
        }
        if !self.queue_growth.is_finite() || self.queue_growth <= 1.0 {
            return Err(ConfigError::InvalidGrowth(self.queue_growth));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_only_when_both_knobs_are_zero() {
        assert!(ThrottleConfig::from_millis(0, 0).is_disabled());
        assert!(!ThrottleConfig::from_millis(1, 0).is_disabled());
        assert!(!ThrottleConfig::from_millis(0, 8).is_disabled());
    }

    #[test]
    fn validate_checks_queue_parameters() {
        assert!(ThrottleConfig::default().validate().is_ok());
        assert!(matches!(
            ThrottleConfig::default().with_queue(0, 1.3).validate(),
            Err(ConfigError::InvalidCapacity(0))
        ));
        assert!(matches!(
            ThrottleConfig::default().with_queue(8, 1.0).validate(),
            Err(ConfigError::InvalidGrowth(_))
        ));
    }

    #[test]
    fn defaults_match_queue_defaults() {
        let c = ThrottleConfig::from_millis(10, 0);
        assert_eq!(c.latency(), Duration::from_millis(10));
        assert_eq!(c.queue_capacity(), DEFAULT_CAPACITY);
        assert_eq!(c.queue_growth(), DEFAULT_GROWTH);
    }
}
