//! 注册中心配置

use crate::error::{FlareError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认分组
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub registry: RegistryConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.registry.validate()?;
        Ok(config)
    }
}

/// 注册中心连接配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// 命名服务地址，多个地址用逗号分隔（host:port）
    pub address: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default = "default_group")]
    pub group: String,
    /// 覆盖 `group`，注册、订阅与查询统一使用
    #[serde(default)]
    pub registry_group: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// 可用性探测缓存窗口
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// 通配订阅的重新扫描间隔
    #[serde(default = "default_lookup_interval_ms")]
    pub lookup_interval_ms: u64,
    /// 临时实例心跳间隔
    #[serde(default = "default_beat_interval_ms")]
    pub beat_interval_ms: u64,
    /// HTTP 订阅轮询间隔
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 注册时覆盖端点 IP
    #[serde(default)]
    pub ip_to_registry: Option<String>,
    /// 注册时覆盖端点端口
    #[serde(default)]
    pub port_to_registry: Option<u16>,
    #[serde(default)]
    pub subscribe_retry: RetryConfig,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_check_interval_ms() -> u64 {
    5_000
}

fn default_lookup_interval_ms() -> u64 {
    20_000
}

fn default_beat_interval_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

impl RegistryConfig {
    /// 使用默认值创建配置
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            namespace: String::new(),
            group: default_group(),
            registry_group: None,
            username: None,
            password: None,
            access_key: None,
            secret_key: None,
            timeout_ms: default_timeout_ms(),
            check_interval_ms: default_check_interval_ms(),
            lookup_interval_ms: default_lookup_interval_ms(),
            beat_interval_ms: default_beat_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            ip_to_registry: None,
            port_to_registry: None,
            subscribe_retry: RetryConfig::default(),
        }
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RegistryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers().is_empty() {
            return Err(FlareError::configuration("registry address is empty"));
        }
        if self.check_interval_ms == 0 || self.lookup_interval_ms == 0 {
            return Err(FlareError::configuration(
                "check_interval_ms and lookup_interval_ms must be positive",
            ));
        }
        Ok(())
    }

    /// 拆分后的服务端地址
    pub fn servers(&self) -> Vec<String> {
        self.address
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// 注册、订阅与查询共用的分组
    pub fn naming_group(&self) -> &str {
        self.registry_group
            .as_deref()
            .filter(|g| !g.trim().is_empty())
            .unwrap_or(&self.group)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_registry_group(mut self, group: impl Into<String>) -> Self {
        self.registry_group = Some(group.into());
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_lookup_interval(mut self, interval: Duration) -> Self {
        self.lookup_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_ip_to_registry(mut self, ip: impl Into<String>) -> Self {
        self.ip_to_registry = Some(ip.into());
        self
    }

    pub fn with_subscribe_retry(mut self, retry: RetryConfig) -> Self {
        self.subscribe_retry = retry;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn lookup_interval(&self) -> Duration {
        Duration::from_millis(self.lookup_interval_ms)
    }

    pub fn beat_interval(&self) -> Duration {
        Duration::from_millis(self.beat_interval_ms.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// 订阅重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// 失败后立即重试
    #[default]
    Immediate,
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub strategy: RetryStrategy,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Immediate,
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            strategy: RetryStrategy::Exponential,
            base_delay_ms: base.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            base_delay_ms: delay.as_millis() as u64,
            max_delay_ms: delay.as_millis() as u64,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
