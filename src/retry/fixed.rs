//! 固定间隔重试策略

use super::RetryPolicy;
use crate::error::SharpError;
use std::time::Duration;

/// 固定间隔重试策略
pub struct FixedRetryPolicy {
    max_attempts: usize,
    delay: Duration,
}

impl FixedRetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl RetryPolicy for FixedRetryPolicy {
    fn should_retry(&self, attempt: usize, error: &SharpError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    fn backoff_duration(&self, _attempt: usize) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Status;

    #[test]
    fn test_fixed_delay() {
        let policy = FixedRetryPolicy::new(3, Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(0), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(5), Duration::from_millis(200));

        let err = SharpError::Transport(Status::unavailable("down"));
        assert!(policy.should_retry(2, &err));
        assert!(!policy.should_retry(3, &err));
    }
}
