//! 注册 / 订阅指标
//!
//! 指标通道是旁路：发布失败不能影响注册与发现本身

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// 注册中心指标事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryMetricEvent {
    /// 一次注册调用（无论成败）
    Register {
        succeed: bool,
        started_at: Instant,
        elapsed: Duration,
    },
    /// 一次订阅调用
    Subscribe { succeed: bool },
}

impl RegistryMetricEvent {
    pub fn register(succeed: bool, started_at: Instant) -> Self {
        RegistryMetricEvent::Register {
            succeed,
            started_at,
            elapsed: started_at.elapsed(),
        }
    }

    pub fn subscribe(succeed: bool) -> Self {
        RegistryMetricEvent::Subscribe { succeed }
    }
}

/// 指标接收端
pub trait MetricsSink: Send + Sync {
    fn publish(&self, event: RegistryMetricEvent);
}

/// 指标数据
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metrics {
    pub register_total: u64,
    pub register_success: u64,
    pub register_failed: u64,
    pub register_duration_ms: Vec<u64>,
    pub subscribe_total: u64,
    pub subscribe_success: u64,
    pub subscribe_failed: u64,
}

const MAX_DURATION_SAMPLES: usize = 1000;

/// 指标收集器
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<Mutex<Metrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Metrics> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Metrics {
        self.lock().clone()
    }
}

impl MetricsSink for MetricsCollector {
    fn publish(&self, event: RegistryMetricEvent) {
        let mut metrics = self.lock();
        match event {
            RegistryMetricEvent::Register { succeed, elapsed, .. } => {
                metrics.register_total += 1;
                if succeed {
                    metrics.register_success += 1;
                } else {
                    metrics.register_failed += 1;
                }

                metrics.register_duration_ms.push(elapsed.as_millis() as u64);
                // 只保留最近 1000 次注册的耗时
                if metrics.register_duration_ms.len() > MAX_DURATION_SAMPLES {
                    metrics.register_duration_ms.remove(0);
                }
            }
            RegistryMetricEvent::Subscribe { succeed } => {
                metrics.subscribe_total += 1;
                if succeed {
                    metrics.subscribe_success += 1;
                } else {
                    metrics.subscribe_failed += 1;
                }
            }
        }
    }
}
