//! Flare Naming Library
//!
//! 动态服务注册发现客户端：向命名服务注册本地端点，订阅关心的服务，
//! 把实例变化作为有序事件流交给消费方，并支持幂等的优雅关闭。

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod types;

// Re-exports
pub use client::{Instance, MemoryNamingClient, NacosHttpClient, NamingClient};
pub use config::{Config, LogConfig, RegistryConfig, RetryConfig, RetryStrategy};
pub use error::{
    ErrorBuilder, ErrorCategory, ErrorCode, FlareError, InfraResult, InfraResultExt, Result,
};
pub use logging::init_logging;
pub use metrics::{Metrics, MetricsCollector, MetricsSink, RegistryMetricEvent};
pub use registry::{
    NamingRegistry, NotifyListener, Registry, RegistryBuilder, SubscriptionCache, create_registry,
};
pub use retry::{ExponentialBackoffPolicy, FixedRetryPolicy, RetryPolicy};
pub use types::{Endpoint, EventType, Role, ServiceEvent};
