//! 基于 HTTP Open API 的命名服务客户端
//!
//! - 临时实例由后台任务定期发送心跳
//! - 订阅通过定期拉取实例列表实现，列表变化时触发回调

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::Deserialize;
use sha1::Sha1;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    DeregisterInstanceParam, GetAllServiceInfoParam, Instance, NamingClient,
    RegisterInstanceParam, SelectAllInstancesParam, ServiceList, SubscribeParam,
};
use crate::config::RegistryConfig;
use crate::error::{ErrorCode, FlareError, InfraResult, InfraResultExt, Result};

const INSTANCE_PATH: &str = "/nacos/v1/ns/instance";
const INSTANCE_LIST_PATH: &str = "/nacos/v1/ns/instance/list";
const INSTANCE_BEAT_PATH: &str = "/nacos/v1/ns/instance/beat";
const SERVICE_LIST_PATH: &str = "/nacos/v1/ns/service/list";
const LOGIN_PATH: &str = "/nacos/v1/auth/login";

#[derive(Debug, Deserialize)]
struct InstanceListResponse {
    #[serde(default)]
    hosts: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    token_ttl: u64,
}

struct AccessToken {
    token: String,
    expires_at: Instant,
}

/// 访问令牌的本地有效期：服务端 TTL 的 90%，至少 1 秒
fn token_lifetime(token_ttl_secs: u64) -> Duration {
    let ttl_ms = token_ttl_secs.max(1).saturating_mul(1000);
    Duration::from_millis(ttl_ms / 10 * 9).max(Duration::from_secs(1))
}

/// AK/SK 签名凭证
struct AccessKeys {
    access_key: String,
    secret_key: String,
}

impl AccessKeys {
    fn from_config(config: &RegistryConfig) -> Option<Self> {
        match (&config.access_key, &config.secret_key) {
            (Some(ak), Some(sk)) if !ak.is_empty() && !sk.is_empty() => Some(Self {
                access_key: ak.clone(),
                secret_key: sk.clone(),
            }),
            _ => None,
        }
    }

    /// 签名参数：`data` 为毫秒时间戳（请求带服务名时追加 `@@服务名`），
    /// `signature` 为 `base64(HMAC-SHA1(secret_key, data))`
    fn sign(&self, service_name: Option<&str>, timestamp_ms: i64) -> Result<Vec<(&'static str, String)>> {
        let data = match service_name.filter(|name| !name.is_empty()) {
            Some(name) => format!("{}@@{}", timestamp_ms, name),
            None => timestamp_ms.to_string(),
        };
        let mut mac = Hmac::<Sha1>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| FlareError::configuration(format!("invalid secret key: {}", e)))?;
        mac.update(data.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        Ok(vec![
            ("ak", self.access_key.clone()),
            ("data", data),
            ("signature", signature),
        ])
    }
}

/// 后台任务共享的连接状态
struct Shared {
    http: reqwest::Client,
    servers: Vec<String>,
    namespace: String,
    username: Option<String>,
    password: Option<String>,
    access_keys: Option<AccessKeys>,
    token: RwLock<Option<AccessToken>>,
}

impl Shared {
    fn base_url(server: &str) -> String {
        if server.starts_with("http://") || server.starts_with("https://") {
            server.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", server.trim_end_matches('/'))
        }
    }

    fn current_token(&self) -> Option<String> {
        let guard = self.token.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard
            .as_ref()
            .filter(|t| t.expires_at > Instant::now())
            .map(|t| t.token.clone())
    }

    async fn login(&self) -> Result<()> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Ok(());
        };

        let mut last_err = None;
        for server in &self.servers {
            let url = format!("{}{}", Self::base_url(server), LOGIN_PATH);
            let resp = self
                .http
                .post(&url)
                .query(&[("username", username.as_str()), ("password", password.as_str())])
                .send()
                .await;
            match resp {
                Ok(resp) if resp.status().is_success() => {
                    let body = resp.text().await?;
                    let login: LoginResponse = parse_json(&body, "login response")?;
                    let ttl = token_lifetime(login.token_ttl);
                    let mut guard = self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner());
                    *guard = Some(AccessToken {
                        token: login.access_token,
                        expires_at: Instant::now() + ttl,
                    });
                    return Ok(());
                }
                Ok(resp) => {
                    last_err = Some(FlareError::localized(
                        ErrorCode::AuthenticationFailed,
                        format!("login to {} failed with status {}", server, resp.status()),
                    ));
                }
                Err(e) => last_err = Some(e.into()),
            }
        }
        Err(last_err.unwrap_or_else(|| FlareError::configuration("no naming server configured")))
    }

    /// 依次尝试各个服务端，返回第一个成功响应的正文
    async fn call(&self, method: Method, path: &str, mut params: Vec<(&str, String)>) -> Result<String> {
        if self.username.is_some() {
            if self.current_token().is_none() {
                self.login().await?;
            }
            if let Some(token) = self.current_token() {
                params.push(("accessToken", token));
            }
        }
        if !self.namespace.is_empty() {
            params.push(("namespaceId", self.namespace.clone()));
        }
        if let Some(keys) = &self.access_keys {
            let service_name = params
                .iter()
                .find(|(key, _)| *key == "serviceName")
                .map(|(_, value)| value.clone());
            let signed = keys.sign(service_name.as_deref(), chrono::Utc::now().timestamp_millis())?;
            params.extend(signed);
        }

        let mut last_err = None;
        for server in &self.servers {
            let url = format!("{}{}", Self::base_url(server), path);
            match self.http.request(method.clone(), &url).query(&params).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await?;
                    if status.is_success() {
                        return Ok(body);
                    }
                    // 服务端已处理请求，换节点无意义
                    return Err(FlareError::backend(
                        ErrorCode::ServiceUnavailable,
                        format!("{} {} returned {}", method, path, status),
                        body,
                    ));
                }
                Err(e) => {
                    debug!(server = %server, error = %e, "naming server request failed, trying next");
                    last_err = Some(FlareError::from(e));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| FlareError::configuration("no naming server configured")))
    }

    async fn list_instances(&self, service_name: &str, group_name: &str) -> Result<Vec<Instance>> {
        let body = self
            .call(
                Method::GET,
                INSTANCE_LIST_PATH,
                vec![
                    ("serviceName", service_name.to_string()),
                    ("groupName", group_name.to_string()),
                    ("healthyOnly", "false".to_string()),
                ],
            )
            .await?;
        let list: InstanceListResponse = parse_json(&body, "instance list")?;
        Ok(list.hosts)
    }

    async fn send_beat(&self, param: &RegisterInstanceParam) -> Result<()> {
        let beat = serde_json::json!({
            "serviceName": param.service_name,
            "ip": param.ip,
            "port": param.port,
            "weight": param.weight,
            "ephemeral": param.ephemeral,
            "metadata": param.metadata,
        });
        self.call(
            Method::PUT,
            INSTANCE_BEAT_PATH,
            vec![
                ("serviceName", param.service_name.clone()),
                ("groupName", param.group_name.clone()),
                ("ephemeral", "true".to_string()),
                ("beat", beat.to_string()),
            ],
        )
        .await
        .map(|_| ())
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &str, what: &str) -> Result<T> {
    let parsed: InfraResult<T> =
        serde_json::from_str(body).with_context(|| format!("invalid {} body: {}", what, body));
    parsed.into_flare(ErrorCode::DeserializationError, format!("failed to decode {}", what))
}

/// 实例列表指纹：按 host 排序后序列化，用于判断是否变化
fn fingerprint(instances: &[Instance]) -> String {
    let mut sorted: Vec<&Instance> = instances.iter().collect();
    sorted.sort_by_key(|inst| inst.host());
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn beat_key(group: &str, service: &str, ip: &str, port: u16) -> String {
    format!("{}@@{}#{}:{}", group, service, ip, port)
}

/// HTTP 命名服务客户端
pub struct NacosHttpClient {
    shared: Arc<Shared>,
    beat_interval: Duration,
    poll_interval: Duration,
    beats: Mutex<HashMap<String, CancellationToken>>,
    polls: Mutex<Vec<(SubscribeParam, CancellationToken)>>,
    shutdown: CancellationToken,
}

impl NacosHttpClient {
    /// 根据注册中心配置创建客户端；配置了用户名时会先登录
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| FlareError::connection_failed(format!("failed to build http client: {}", e)))?;

        let shared = Arc::new(Shared {
            http,
            servers: config.servers(),
            namespace: config.namespace.clone(),
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone(),
            access_keys: AccessKeys::from_config(config),
            token: RwLock::new(None),
        });
        shared.login().await?;

        info!(
            servers = ?shared.servers,
            namespace = %shared.namespace,
            signed = shared.access_keys.is_some(),
            "naming client connected"
        );

        Ok(Self {
            shared,
            beat_interval: config.beat_interval(),
            poll_interval: config.poll_interval(),
            beats: Mutex::new(HashMap::new()),
            polls: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        })
    }

    fn beats(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.beats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn polls(&self) -> MutexGuard<'_, Vec<(SubscribeParam, CancellationToken)>> {
        self.polls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_beat(&self, param: RegisterInstanceParam) {
        let key = beat_key(&param.group_name, &param.service_name, &param.ip, param.port);
        let token = self.shutdown.child_token();
        if let Some(old) = self.beats().insert(key, token.clone()) {
            old.cancel();
        }

        let shared = self.shared.clone();
        let interval = self.beat_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = shared.send_beat(&param).await {
                    warn!(service_name = %param.service_name, error = %e, "instance beat failed");
                }
            }
        });
    }

    fn start_poll(&self, param: SubscribeParam) {
        let token = self.shutdown.child_token();
        self.polls().push((param.clone(), token.clone()));

        let shared = self.shared.clone();
        let interval = self.poll_interval;
        tokio::spawn(async move {
            let mut last: Option<String> = None;
            loop {
                match shared.list_instances(&param.service_name, &param.group_name).await {
                    Ok(instances) => {
                        let current = fingerprint(&instances);
                        if last.as_deref() != Some(current.as_str()) {
                            last = Some(current);
                            (param.callback)(instances);
                        }
                    }
                    Err(e) => {
                        warn!(service_name = %param.service_name, error = %e, "poll instances failed");
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });
    }
}

#[async_trait]
impl NamingClient for NacosHttpClient {
    async fn register_instance(&self, param: RegisterInstanceParam) -> Result<bool> {
        let metadata = serde_json::to_string(&param.metadata)?;
        let body = self
            .shared
            .call(
                Method::POST,
                INSTANCE_PATH,
                vec![
                    ("serviceName", param.service_name.clone()),
                    ("groupName", param.group_name.clone()),
                    ("ip", param.ip.clone()),
                    ("port", param.port.to_string()),
                    ("weight", param.weight.to_string()),
                    ("enabled", param.enable.to_string()),
                    ("healthy", param.healthy.to_string()),
                    ("ephemeral", param.ephemeral.to_string()),
                    ("metadata", metadata),
                ],
            )
            .await?;

        let accepted = body.trim() == "ok";
        if accepted && param.ephemeral {
            self.start_beat(param);
        }
        Ok(accepted)
    }

    async fn deregister_instance(&self, param: DeregisterInstanceParam) -> Result<bool> {
        let key = beat_key(&param.group_name, &param.service_name, &param.ip, param.port);
        if let Some(token) = self.beats().remove(&key) {
            token.cancel();
        }

        let body = self
            .shared
            .call(
                Method::DELETE,
                INSTANCE_PATH,
                vec![
                    ("serviceName", param.service_name.clone()),
                    ("groupName", param.group_name.clone()),
                    ("ip", param.ip.clone()),
                    ("port", param.port.to_string()),
                    ("ephemeral", param.ephemeral.to_string()),
                ],
            )
            .await?;
        Ok(body.trim() == "ok")
    }

    async fn get_all_services_info(&self, param: GetAllServiceInfoParam) -> Result<ServiceList> {
        let body = self
            .shared
            .call(
                Method::GET,
                SERVICE_LIST_PATH,
                vec![
                    ("pageNo", param.page_no.to_string()),
                    ("pageSize", param.page_size.to_string()),
                    ("groupName", param.group_name.clone()),
                ],
            )
            .await?;
        parse_json(&body, "service list")
    }

    async fn select_all_instances(&self, param: SelectAllInstancesParam) -> Result<Vec<Instance>> {
        self.shared
            .list_instances(&param.service_name, &param.group_name)
            .await
    }

    async fn subscribe(&self, param: SubscribeParam) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(FlareError::localized(ErrorCode::ConnectionClosed, "naming client is closed"));
        }
        // 先确认服务端可达，失败直接返回给调用方
        self.shared
            .list_instances(&param.service_name, &param.group_name)
            .await?;
        self.start_poll(param);
        Ok(())
    }

    async fn unsubscribe(&self, param: SubscribeParam) -> Result<()> {
        self.polls().retain(|(existing, token)| {
            if existing.same_subscription(&param) {
                token.cancel();
                false
            } else {
                true
            }
        });
        Ok(())
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.beats().clear();
        self.polls().clear();
        info!(servers = ?self.shared.servers, "naming client closed");
    }
}
