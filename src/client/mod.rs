//! 命名服务客户端抽象和实现
//!
//! 注册中心只通过 [`NamingClient`] 访问后端，线协议由具体实现负责。

pub mod memory;
pub mod nacos;

pub use memory::{CallStats, MemoryNamingClient};
pub use nacos::NacosHttpClient;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 后端中的服务实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub instance_id: String,
    pub ip: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub ephemeral: bool,
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl Instance {
    /// `ip:port`，同一服务内实例的主键
    pub fn host(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// 注册实例参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterInstanceParam {
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub enable: bool,
    pub healthy: bool,
    pub ephemeral: bool,
    pub metadata: HashMap<String, String>,
    pub service_name: String,
    pub group_name: String,
}

impl RegisterInstanceParam {
    pub fn to_instance(&self) -> Instance {
        Instance {
            instance_id: format!("{}#{}#{}@@{}", self.ip, self.port, self.group_name, self.service_name),
            ip: self.ip.clone(),
            port: self.port,
            weight: self.weight,
            healthy: self.healthy,
            enabled: self.enable,
            ephemeral: self.ephemeral,
            cluster_name: String::new(),
            service_name: self.service_name.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// 注销实例参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeregisterInstanceParam {
    pub ip: String,
    pub port: u16,
    pub service_name: String,
    pub group_name: String,
    pub ephemeral: bool,
}

/// 服务名分页查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAllServiceInfoParam {
    pub group_name: String,
    pub page_no: u32,
    pub page_size: u32,
}

/// 服务名分页查询结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceList {
    pub count: u64,
    pub doms: Vec<String>,
}

/// 实例查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectAllInstancesParam {
    pub service_name: String,
    pub group_name: String,
}

/// 实例列表推送回调
pub type SubscribeCallback = Arc<dyn Fn(Vec<Instance>) + Send + Sync>;

/// 订阅参数
///
/// 取消订阅时按回调的指针身份匹配
#[derive(Clone)]
pub struct SubscribeParam {
    pub service_name: String,
    pub group_name: String,
    pub callback: SubscribeCallback,
}

impl SubscribeParam {
    pub fn same_subscription(&self, other: &SubscribeParam) -> bool {
        self.service_name == other.service_name
            && self.group_name == other.group_name
            && Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl fmt::Debug for SubscribeParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeParam")
            .field("service_name", &self.service_name)
            .field("group_name", &self.group_name)
            .finish_non_exhaustive()
    }
}

/// 命名服务客户端 trait
///
/// 所有调用都可能失败，失败以错误返回，不会 panic。
#[async_trait]
pub trait NamingClient: Send + Sync {
    /// 注册实例，返回后端是否接受
    async fn register_instance(&self, param: RegisterInstanceParam) -> Result<bool>;

    /// 注销实例，返回后端是否已移除
    async fn deregister_instance(&self, param: DeregisterInstanceParam) -> Result<bool>;

    /// 分页列出分组内的服务名
    async fn get_all_services_info(&self, param: GetAllServiceInfoParam) -> Result<ServiceList>;

    /// 查询服务的全部实例
    async fn select_all_instances(&self, param: SelectAllInstancesParam) -> Result<Vec<Instance>>;

    /// 订阅服务实例变化，实例列表变化时调用回调
    async fn subscribe(&self, param: SubscribeParam) -> Result<()>;

    /// 取消订阅
    async fn unsubscribe(&self, param: SubscribeParam) -> Result<()>;

    /// 关闭客户端，释放后台任务与连接
    async fn close(&self);
}
