//! 注册中心可用性探测
//!
//! 远端健康信号在 `check_interval` 内复用，避免高频调用压垮后端

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct AvailabilityCache {
    last_available: bool,
    last_check_time: Option<Instant>,
}

/// 可用性探测器
///
/// 探测在锁内执行，并发调用方共享同一次远端探测结果
#[derive(Debug)]
pub struct AvailabilityProbe {
    check_interval: Duration,
    cache: Mutex<AvailabilityCache>,
}

impl AvailabilityProbe {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            check_interval,
            cache: Mutex::new(AvailabilityCache::default()),
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// 返回缓存值，过期时执行一次 `probe`
    ///
    /// 无论探测成败都会刷新检查时间，失败不会引起紧密重试
    pub async fn check<F, Fut>(&self, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut cache = self.cache.lock().await;

        if let Some(last) = cache.last_check_time {
            if last.elapsed() < self.check_interval {
                return cache.last_available;
            }
        }

        cache.last_check_time = Some(Instant::now());
        cache.last_available = probe().await;
        cache.last_available
    }
}
