//! 指数退避重试策略

use super::RetryPolicy;
use crate::config::RetryBackoffConfig;
use crate::error::SharpError;
use std::time::Duration;

/// 指数退避重试策略
///
/// delay = min(base * multiplier^min(k, max_exponent), max)
pub struct ExponentialBackoffPolicy {
    max_attempts: usize,
    base: Duration,
    multiplier: f64,
    max_exponent: u32,
    max_delay: Duration,
}

impl ExponentialBackoffPolicy {
    pub fn new(
        max_attempts: usize,
        base: Duration,
        multiplier: f64,
        max_exponent: u32,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            base,
            multiplier,
            max_exponent,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryBackoffConfig, max_attempts: usize) -> Self {
        Self::new(
            max_attempts,
            Duration::from_millis(config.base_ms),
            config.multiplier,
            config.max_exponent,
            Duration::from_millis(config.max_ms),
        )
    }
}

impl Default for ExponentialBackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryBackoffConfig::default(), 3)
    }
}

impl RetryPolicy for ExponentialBackoffPolicy {
    fn should_retry(&self, attempt: usize, error: &SharpError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    fn backoff_duration(&self, attempt: usize) -> Duration {
        let exponent = (attempt as u32).min(self.max_exponent);
        let delay_ms = self.base.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}
