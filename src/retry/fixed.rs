use super::RetryPolicy;
use crate::error::FlareError;
use std::time::Duration;

/// 固定延迟重试策略
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
    fn should_retry(&self, attempt: usize, error: &FlareError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }

        error.is_retryable()
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
    use crate::error::ErrorCode;

    #[test]
    fn stops_at_max_attempts() {
        let policy = FixedRetryPolicy::new(2, Duration::from_millis(10));
        let err = FlareError::localized(ErrorCode::SubscribeFailed, "boom");
        assert!(policy.should_retry(1, &err));
        assert!(!policy.should_retry(2, &err));
    }

    #[test]
    fn precondition_errors_are_not_retried() {
        let policy = FixedRetryPolicy::new(10, Duration::ZERO);
        assert!(!policy.should_retry(0, &FlareError::invalid_parameter("empty")));
    }
}
