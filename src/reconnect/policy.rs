//! Backoff policy.

use std::time::Duration;

/// Bounded multiplicative backoff.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    /// Default: 2000ms
    pub base_delay: Duration,

    /// Growth factor between consecutive attempts.
    /// Default: 1.5
    pub multiplier: f64,

    /// Attempts allowed before giving up.
    /// Default: 5
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2000),
            multiplier: 1.5,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based): `base × multiplier^(attempt-1)`,
    /// rounded to the millisecond.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let ms = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(ms.round() as u64)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
