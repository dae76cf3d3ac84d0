//! 服务标识与注册参数
//!
//! 服务标识格式：`category:interface:version:group`，空的段仍然保留分隔符，
//! 因此各段位置固定。各段取值本身不应包含分隔符。

use std::net::UdpSocket;
use tracing::warn;

use crate::client::{DeregisterInstanceParam, Instance, RegisterInstanceParam};
use crate::config::RegistryConfig;
use crate::types::{DEFAULT_CATEGORY, Endpoint, Role, SERVICE_NAME_SEPARATOR, keys};

/// 权重下限（不含）
pub const MIN_WEIGHT: f64 = 0.0;
/// 权重上限
pub const MAX_WEIGHT: f64 = 10000.0;
/// 默认权重
pub const DEFAULT_WEIGHT: f64 = 1.0;
/// 未设置端口时注册使用的端口
pub const DEFAULT_PORT_TO_REGISTRY: u16 = 80;

/// 端点在注册中心中的服务标识
pub fn get_service_name(url: &Endpoint) -> String {
    compose(url.category(), url)
}

/// 订阅侧使用的服务标识：总是订阅 provider
pub fn get_subscribe_name(url: &Endpoint) -> String {
    compose(Role::Provider.category(), url)
}

fn compose(category: &str, url: &Endpoint) -> String {
    let mut buffer = String::from(category);
    append_param(&mut buffer, url, keys::INTERFACE);
    append_param(&mut buffer, url, keys::VERSION);
    append_param(&mut buffer, url, keys::GROUP);
    buffer
}

fn append_param(target: &mut String, url: &Endpoint, key: &str) {
    target.push_str(SERVICE_NAME_SEPARATOR);
    let value = url.param_or(key, "");
    if !value.trim().is_empty() {
        target.push_str(value);
    }
}

/// 服务标识的分类段（不含分隔符时返回 `None`）
pub fn category_of(service_name: &str) -> Option<&str> {
    if !service_name.contains(SERVICE_NAME_SEPARATOR) {
        return None;
    }
    service_name.split(SERVICE_NAME_SEPARATOR).next()
}

/// 订阅关心的分类列表，逗号分隔
pub fn subscribed_categories(url: &Endpoint) -> Vec<&str> {
    url.param_or(keys::CATEGORY, DEFAULT_CATEGORY)
        .split(',')
        .collect()
}

/// 解析权重：无效或不大于下限时回退默认值，超过上限时截断
pub fn resolve_weight(raw: &str) -> f64 {
    match raw.parse::<f64>() {
        Ok(weight) if weight > MIN_WEIGHT => {
            if weight > MAX_WEIGHT {
                warn!(weight, max = MAX_WEIGHT, "weight exceeds maximum, clamping");
                MAX_WEIGHT
            } else {
                weight
            }
        }
        Ok(weight) => {
            warn!(weight = %raw, parsed = weight, "invalid weight value, using default 1.0");
            DEFAULT_WEIGHT
        }
        Err(e) => {
            warn!(weight = %raw, error = %e, "invalid weight value, using default 1.0");
            DEFAULT_WEIGHT
        }
    }
}

/// 注册使用的地址：配置覆盖优先，空 IP 取本机地址，未设置端口使用 80
pub fn register_address(url: &Endpoint, config: &RegistryConfig) -> (String, u16) {
    let ip = config
        .ip_to_registry
        .clone()
        .filter(|ip| !ip.trim().is_empty())
        .unwrap_or_else(|| url.ip.clone());
    let ip = if ip.trim().is_empty() { local_ip() } else { ip };

    let port = config.port_to_registry.filter(|p| *p != 0).unwrap_or(url.port);
    let port = if port == 0 { DEFAULT_PORT_TO_REGISTRY } else { port };

    (ip, port)
}

/// 本机出口地址（UDP connect 不发送数据）
pub fn local_ip() -> String {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("8.8.8.8:80")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string())
}

pub fn create_register_param(
    url: &Endpoint,
    service_name: &str,
    group_name: &str,
    config: &RegistryConfig,
) -> RegisterInstanceParam {
    let mut metadata = url.params.clone();
    metadata.insert(keys::CATEGORY.to_string(), url.category().to_string());
    metadata.insert(keys::PROTOCOL.to_string(), url.protocol.clone());
    metadata.insert(keys::PATH.to_string(), url.path.clone());
    metadata.insert(keys::METHODS.to_string(), url.methods.join(","));

    let (ip, port) = register_address(url, config);
    let weight = resolve_weight(url.param_or(keys::WEIGHT, "1.0"));

    RegisterInstanceParam {
        ip,
        port,
        weight,
        enable: true,
        healthy: true,
        ephemeral: true,
        metadata,
        service_name: service_name.to_string(),
        group_name: group_name.to_string(),
    }
}

pub fn create_deregister_param(
    url: &Endpoint,
    service_name: &str,
    group_name: &str,
    config: &RegistryConfig,
) -> DeregisterInstanceParam {
    let (ip, port) = register_address(url, config);
    DeregisterInstanceParam {
        ip,
        port,
        service_name: service_name.to_string(),
        group_name: group_name.to_string(),
        ephemeral: true,
    }
}

/// 把后端实例还原为端点
///
/// 需要 `protocol`，以及 `path` 或 `interface` 之一；缺失时返回 `None`
pub fn generate_url(instance: &Instance) -> Option<Endpoint> {
    if instance.metadata.is_empty() {
        return None;
    }
    let path = instance.metadata.get(keys::PATH).map(String::as_str).unwrap_or("");
    let interface = instance.metadata.get(keys::INTERFACE).map(String::as_str).unwrap_or("");
    if path.is_empty() && interface.is_empty() {
        return None;
    }
    let path = if path.is_empty() {
        format!("/{}", interface)
    } else {
        path.to_string()
    };
    let protocol = instance.metadata.get(keys::PROTOCOL).map(String::as_str).unwrap_or("");
    if protocol.is_empty() {
        return None;
    }

    let mut endpoint = Endpoint::new(protocol, instance.ip.clone(), instance.port).with_path(path);
    endpoint.params = instance.metadata.clone();
    Some(endpoint)
}
