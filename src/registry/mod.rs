//! 服务注册发现模块
//!
//! 通过命名服务注册本地端点、订阅关心的服务，并把实例变更作为有序事件流交给消费方

pub mod availability;
pub mod cache;
pub mod listener;
pub mod naming;
pub mod service_name;

pub use availability::AvailabilityProbe;
pub use cache::SubscriptionCache;
pub use listener::NamingListener;
pub use naming::{NamingRegistry, RegistryBuilder};

use crate::config::RegistryConfig;
use crate::error::Result;
use crate::types::{Endpoint, ServiceEvent};
use async_trait::async_trait;
use std::sync::Arc;

/// 服务变更的消费方
///
/// 会在不同订阅的事件泵任务中被并发调用，实现不应长时间阻塞
pub trait NotifyListener: Send + Sync {
    fn notify(&self, event: ServiceEvent);
}

impl<F> NotifyListener for F
where
    F: Fn(ServiceEvent) + Send + Sync,
{
    fn notify(&self, event: ServiceEvent) {
        self(event)
    }
}

/// 注册中心 Trait
#[async_trait]
pub trait Registry: Send + Sync {
    /// 注册中心配置
    fn url(&self) -> &RegistryConfig;

    /// 注册端点，成功后记录，关闭时统一注销
    async fn register(&self, url: &Endpoint) -> Result<()>;

    /// 注销端点
    async fn unregister(&self, url: &Endpoint) -> Result<()>;

    /// 订阅端点描述的服务；只有 consumer 角色会真正订阅
    async fn subscribe(&self, url: &Endpoint, listener: Arc<dyn NotifyListener>) -> Result<()>;

    /// 取消远端订阅；本地句柄保留到 `destroy`
    async fn unsubscribe(&self, url: &Endpoint) -> Result<()>;

    /// 全量加载当前实例，每个实例作为一个 Add 事件交给 `listener`
    async fn load_subscribe_instances(&self, url: &Endpoint, listener: &dyn NotifyListener) -> Result<()>;

    /// 注册中心是否可用
    async fn is_available(&self) -> bool;

    /// 关闭注册中心，之后实例不可再用
    async fn destroy(&self);
}

/// 连接 HTTP 命名服务并创建注册中心
pub async fn create_registry(config: RegistryConfig) -> Result<NamingRegistry> {
    config.validate()?;
    RegistryBuilder::new(config).connect().await
}
