//! Reconnect delay policy.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential backoff: `min(base * growth^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub growth: f64,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            growth: config.growth_factor.max(1.0),
            max: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let max_ms = self.max.as_secs_f64() * 1000.0;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let scaled = self.base.as_secs_f64() * 1000.0 * self.growth.powi(exponent);
        // powi overflows to +inf for large attempts; min() still yields the cap
        Duration::from_secs_f64(scaled.min(max_ms) / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(d: Duration) -> u128 {
        d.as_millis()
    }

    #[test]
    fn reference_sequence() {
        let policy = ReconnectPolicy::default();
        assert_eq!(ms(policy.delay_for(0)), 3000);
        assert_eq!(ms(policy.delay_for(1)), 4500);
        assert_eq!(ms(policy.delay_for(2)), 6750);
        assert_eq!(ms(policy.delay_for(3)), 10125);
        assert_eq!(ms(policy.delay_for(6)), 30000);
    }

    #[test]
    fn monotonic_and_capped() {
        let policy = ReconnectPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt} shrank");
            assert!(delay <= policy.max);
            previous = delay;
        }
        assert_eq!(policy.delay_for(u32::MAX), policy.max);
    }

    #[test]
    fn growth_below_one_is_clamped() {
        let policy = ReconnectPolicy::from(&ReconnectConfig {
            base_delay_ms: 1000,
            growth_factor: 0.5,
            max_delay_ms: 5000,
        });
        assert_eq!(ms(policy.delay_for(4)), 1000);
    }
}
