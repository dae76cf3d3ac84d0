//! 端点描述与服务事件

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 参数键
pub mod keys {
    pub const INTERFACE: &str = "interface";
    pub const VERSION: &str = "version";
    pub const GROUP: &str = "group";
    pub const CATEGORY: &str = "category";
    pub const PROTOCOL: &str = "protocol";
    pub const PATH: &str = "path";
    pub const METHODS: &str = "methods";
    pub const WEIGHT: &str = "weight";
    pub const REGISTRY_ROLE: &str = "registry.role";
}

/// 通配服务名
pub const ANY_VALUE: &str = "*";
/// 服务标识各段之间的分隔符
pub const SERVICE_NAME_SEPARATOR: &str = ":";
/// 默认分类
pub const DEFAULT_CATEGORY: &str = "providers";

/// 端点角色
///
/// 数值与 `registry.role` 参数一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Role {
    Consumer = 0,
    Configurator = 1,
    Router = 2,
    Provider = 3,
}

impl Role {
    /// 从数字值创建角色
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Role::Consumer),
            1 => Some(Role::Configurator),
            2 => Some(Role::Router),
            3 => Some(Role::Provider),
            _ => None,
        }
    }

    /// 角色对应的分类名（服务标识的第一段）
    pub fn category(&self) -> &'static str {
        match self {
            Role::Consumer => "consumers",
            Role::Configurator => "configurators",
            Role::Router => "routers",
            Role::Provider => "providers",
        }
    }
}

/// 端点描述
///
/// 一个服务实例的地址（协议、主机、端口、路径）加上开放的参数表。
/// 发布后不可变，注册中心只持有其副本。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: String,
    pub ip: String,
    /// 0 表示未设置
    pub port: u16,
    pub path: String,
    pub methods: Vec<String>,
    pub params: HashMap<String, String>,
}

impl Endpoint {
    /// 创建新的端点
    pub fn new(protocol: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            ip: ip.into(),
            port,
            path: String::new(),
            methods: Vec::new(),
            params: HashMap::new(),
        }
    }

    /// 设置路径
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// 设置方法列表
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// 添加参数
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// 设置角色（写入 `registry.role`）
    pub fn with_role(self, role: Role) -> Self {
        self.with_param(keys::REGISTRY_ROLE, (role as u8).to_string())
    }

    /// 获取参数
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// 获取参数，缺失时返回默认值
    pub fn param_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.param(key).unwrap_or(default)
    }

    /// 端点所属分类，缺省为 provider
    pub fn category(&self) -> &'static str {
        self.param(keys::REGISTRY_ROLE)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(Role::from_i64)
            .unwrap_or(Role::Provider)
            .category()
    }

    /// 订阅侧的角色解析
    ///
    /// 没有默认值：缺失或无法解析时按 0 处理，即 consumer
    pub fn subscribe_role(&self) -> Option<Role> {
        let value = self
            .param(keys::REGISTRY_ROLE)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);
        Role::from_i64(value)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.ip, self.port)?;
        if !self.path.is_empty() {
            if !self.path.starts_with('/') {
                write!(f, "/")?;
            }
            write!(f, "{}", self.path)?;
        }
        let mut params: Vec<_> = self.params.iter().collect();
        params.sort();
        for (idx, (key, value)) in params.into_iter().enumerate() {
            let sep = if idx == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, key, value)?;
        }
        Ok(())
    }
}

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Add,
    Update,
    Delete,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Add => write!(f, "add"),
            EventType::Update => write!(f, "update"),
            EventType::Delete => write!(f, "delete"),
        }
    }
}

/// 服务变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub action: EventType,
    pub service: Endpoint,
}

impl ServiceEvent {
    pub fn new(action: EventType, service: Endpoint) -> Self {
        Self { action, service }
    }
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceEvent{{action={}, service={}}}", self.action, self.service)
    }
}
