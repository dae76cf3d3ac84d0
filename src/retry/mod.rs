//! 重试策略模块

pub mod exponential;
pub mod fixed;

pub use exponential::ExponentialBackoffPolicy;
pub use fixed::FixedRetryPolicy;

use crate::config::{RetryConfig, RetryStrategy};
use crate::error::FlareError;
use std::time::Duration;

/// 重试策略 trait
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: usize, error: &FlareError) -> bool;
    fn backoff_duration(&self, attempt: usize) -> Duration;
    fn max_attempts(&self) -> usize;
}

/// 根据配置构建订阅重试策略
///
/// 订阅重试没有次数上限，只由注册中心可用性终止
pub fn subscribe_policy(config: &RetryConfig) -> Box<dyn RetryPolicy> {
    match config.strategy {
        RetryStrategy::Immediate => Box::new(FixedRetryPolicy::new(usize::MAX, Duration::ZERO)),
        RetryStrategy::Fixed => Box::new(FixedRetryPolicy::new(
            usize::MAX,
            Duration::from_millis(config.base_delay_ms),
        )),
        RetryStrategy::Exponential => Box::new(ExponentialBackoffPolicy::new(
            usize::MAX,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )),
    }
}
