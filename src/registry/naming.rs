//! 命名服务注册中心
//!
//! - 注册 / 注销本地端点，并记录已注册端点用于关闭时清理
//! - 单服务订阅（失败重试直到成功或注册中心不可用）
//! - 通配订阅（同步全量订阅一次，后台按 `lookup_interval` 重新扫描新服务）
//! - 每个订阅句柄一个事件泵任务，事件按后端产生顺序转发给消费方
//! - `destroy` 只执行一次：关闭句柄、发出关闭信号、等待任务退出、注销端点、释放客户端

use async_trait::async_trait;
use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::availability::AvailabilityProbe;
use super::cache::SubscriptionCache;
use super::listener::NamingListener;
use super::service_name::{
    category_of, create_deregister_param, create_register_param, generate_url, get_service_name,
    get_subscribe_name, subscribed_categories,
};
use super::{NotifyListener, Registry};
use crate::client::{GetAllServiceInfoParam, NacosHttpClient, NamingClient, SelectAllInstancesParam};
use crate::config::{DEFAULT_GROUP, RegistryConfig};
use crate::error::{ErrorCode, FlareError, Result};
use crate::metrics::{MetricsCollector, MetricsSink, RegistryMetricEvent};
use crate::retry::{RetryPolicy, subscribe_policy};
use crate::types::{ANY_VALUE, Endpoint, EventType, Role, ServiceEvent, keys};

const STATE_RUNNING: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// 注册中心构建器
pub struct RegistryBuilder {
    config: RegistryConfig,
    client: Option<Arc<dyn NamingClient>>,
    cache: Option<Arc<SubscriptionCache>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl RegistryBuilder {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            client: None,
            cache: None,
            metrics: None,
        }
    }

    /// 指定命名服务客户端
    pub fn client(mut self, client: Arc<dyn NamingClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// 指定订阅句柄缓存，默认使用进程级共享实例
    pub fn subscription_cache(mut self, cache: Arc<SubscriptionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 使用已有客户端构建；没有客户端时所有远端操作返回错误，`destroy` 退化为空操作
    pub fn build(self) -> NamingRegistry {
        let availability = AvailabilityProbe::new(self.config.check_interval());
        let retry = subscribe_policy(&self.config.subscribe_retry);
        info!(
            address = %self.config.address,
            namespace = %self.config.namespace,
            group = %self.config.naming_group(),
            has_client = self.client.is_some(),
            "naming registry created"
        );

        NamingRegistry {
            inner: Arc::new(Inner {
                client: RwLock::new(self.client),
                registered: Mutex::new(Vec::new()),
                availability,
                listeners: self.cache.unwrap_or_else(SubscriptionCache::global),
                metrics: self
                    .metrics
                    .unwrap_or_else(|| Arc::new(MetricsCollector::new()) as Arc<dyn MetricsSink>),
                retry,
                done: CancellationToken::new(),
                spawn_gate: StdMutex::new(()),
                state: AtomicU8::new(STATE_RUNNING),
                tasks: TaskTracker::new(),
                config: self.config,
            }),
        }
    }

    /// 未指定客户端时连接 HTTP 命名服务
    pub async fn connect(mut self) -> Result<NamingRegistry> {
        if self.client.is_none() {
            let client = NacosHttpClient::connect(&self.config).await?;
            self.client = Some(Arc::new(client));
        }
        Ok(self.build())
    }
}

struct Inner {
    config: RegistryConfig,
    client: RwLock<Option<Arc<dyn NamingClient>>>,
    /// 已成功注册的端点，按注册顺序
    registered: Mutex<Vec<Endpoint>>,
    availability: AvailabilityProbe,
    listeners: Arc<SubscriptionCache>,
    metrics: Arc<dyn MetricsSink>,
    retry: Box<dyn RetryPolicy>,
    done: CancellationToken,
    /// 关闭信号与任务登记互斥，`tasks.wait()` 之后不会再有新任务
    spawn_gate: StdMutex<()>,
    state: AtomicU8,
    tasks: TaskTracker,
}

/// 基于命名服务的注册中心
#[derive(Clone)]
pub struct NamingRegistry {
    inner: Arc<Inner>,
}

impl NamingRegistry {
    pub fn builder(config: RegistryConfig) -> RegistryBuilder {
        RegistryBuilder::new(config)
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    pub fn subscription_cache(&self) -> &Arc<SubscriptionCache> {
        &self.inner.listeners
    }

    /// 已注册端点的副本
    pub async fn registered_endpoints(&self) -> Vec<Endpoint> {
        self.inner.registered.lock().await.clone()
    }

    /// 仍在运行的后台任务数（事件泵与定时扫描）
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) != STATE_RUNNING
    }

    async fn client(&self) -> Result<Arc<dyn NamingClient>> {
        self.inner
            .client
            .read()
            .await
            .clone()
            .ok_or_else(|| FlareError::registry_unavailable("naming client is not initialized"))
    }

    fn group(&self) -> &str {
        let group = self.inner.config.naming_group().trim();
        if group.is_empty() { DEFAULT_GROUP } else { group }
    }

    /// 单服务订阅：失败后按重试策略重试，直到成功或注册中心不可用
    async fn subscribe_until_success(&self, url: &Endpoint, notify: Arc<dyn NotifyListener>) {
        let service_name = get_subscribe_name(url);
        let mut attempt = 0usize;
        loop {
            if !self.is_available().await {
                warn!(service_name = %service_name, "registry unavailable, stop subscribing");
                return;
            }

            let err = match self.subscribe_service(&service_name, notify.clone()).await {
                Ok(()) => return,
                Err(e) => e,
            };
            if !self.inner.retry.should_retry(attempt, &err) {
                warn!(service_name = %service_name, attempt, error = %err, "subscribe is not retryable, giving up");
                return;
            }

            let delay = self.inner.retry.backoff_duration(attempt);
            attempt = attempt.saturating_add(1);
            debug!(service_name = %service_name, attempt, delay_ms = delay.as_millis() as u64, "retry subscribe");
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = self.inner.done.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// 登记后台任务；已发出关闭信号时不启动并返回 false
    fn spawn_task<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _gate = self.inner.spawn_gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.inner.done.is_cancelled() {
            return false;
        }
        self.inner.tasks.spawn(task);
        true
    }

    /// 发出关闭信号并停止登记新任务
    fn signal_shutdown(&self) {
        let _gate = self.inner.spawn_gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.inner.done.cancel();
        self.inner.tasks.close();
    }

    fn spawn_scheduled_lookup(&self, url: Endpoint, notify: Arc<dyn NotifyListener>) {
        let registry = self.clone();
        if !self.spawn_task(async move {
            registry.scheduled_lookup(url, notify).await;
        }) {
            debug!("registry is shutting down, scheduled lookup not started");
        }
    }

    /// 定时重新扫描服务列表，订阅新出现的服务
    async fn scheduled_lookup(&self, url: Endpoint, notify: Arc<dyn NotifyListener>) {
        let interval = self.inner.config.lookup_interval();
        loop {
            tokio::select! {
                biased;
                _ = self.inner.done.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if !self.is_available().await {
                break;
            }
            self.subscribe_all(&url, &notify).await;
        }
        debug!(interval_ms = interval.as_millis() as u64, "scheduled lookup stopped");
    }

    /// 订阅所有分类匹配且尚未订阅的服务；失败只记录日志
    async fn subscribe_all(&self, url: &Endpoint, notify: &Arc<dyn NotifyListener>) {
        let group = self.group().to_string();
        let service_names = match self.get_all_subscribe_service_names(url).await {
            Ok(names) => names,
            Err(e) => {
                warn!(group = %group, error = %e, "failed to list services");
                return;
            }
        };
        if service_names.is_empty() {
            warn!(group = %group, "no services to listen to");
            return;
        }

        for name in service_names {
            if self.inner.listeners.contains(&SubscriptionCache::key(&name, &group)) {
                continue;
            }
            if let Err(e) = self.subscribe_service(&name, notify.clone()).await {
                warn!(service_name = %name, error = %e, "subscribe service failed");
            }
        }
    }

    /// 列出分组内所有服务名，按订阅关心的分类过滤
    async fn get_all_subscribe_service_names(&self, url: &Endpoint) -> Result<Vec<String>> {
        let client = self.client().await?;
        let group = self.group().to_string();
        let services = client
            .get_all_services_info(GetAllServiceInfoParam {
                group_name: group.clone(),
                page_no: 1,
                page_size: i32::MAX as u32,
            })
            .await
            .map_err(|e| {
                FlareError::backend(ErrorCode::QueryFailed, format!("query services of group {} failed", group), e)
            })?;

        let categories = subscribed_categories(url);
        Ok(services
            .doms
            .into_iter()
            .filter(|dom| {
                category_of(dom)
                    .map(|real| categories.iter().any(|c| *c == real))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// 订阅单个服务并启动事件泵
    ///
    /// 同一 (服务名, 分组) 已有句柄时直接返回
    async fn subscribe_service(&self, service_name: &str, notify: Arc<dyn NotifyListener>) -> Result<()> {
        if service_name.is_empty() {
            warn!("can not subscribe because service name is empty");
            return Ok(());
        }
        if !self.is_available().await {
            warn!(service_name, "registry is not available, event listener game over");
            return Err(FlareError::registry_unavailable("naming registry is not available"));
        }

        let client = self.client().await?;
        let group = self.group().to_string();
        let key = SubscriptionCache::key(service_name, &group);
        if self.inner.listeners.contains(&key) {
            debug!(service_name, group = %group, "service already subscribed");
            return Ok(());
        }

        let listener = NamingListener::new(service_name, group.clone(), client);
        let result = listener.listen().await;
        self.inner
            .metrics
            .publish(RegistryMetricEvent::subscribe(result.is_ok()));
        if let Err(e) = result {
            warn!(service_name, group = %group, error = %e, "subscribe service failed");
            return Err(FlareError::backend(
                ErrorCode::SubscribeFailed,
                format!("subscribe service [{}] failed", service_name),
                e,
            ));
        }

        if !self.inner.listeners.insert_if_absent(key.clone(), listener.clone()) {
            // 并发订阅同一个服务，保留先写入的句柄
            listener.close().await;
            return Ok(());
        }
        let registry = self.clone();
        let pumped = listener.clone();
        if !self.spawn_task(async move {
            registry.handle_service_events(pumped, notify).await;
        }) {
            self.inner.listeners.remove_if_same(&key, &listener);
            listener.close().await;
            return Err(FlareError::registry_unavailable("naming registry is shutting down"));
        }

        info!(service_name, group = %group, "service subscribed");
        Ok(())
    }

    /// 事件泵：逐个取出句柄上的事件转发给消费方，出错或关闭时退出并关闭句柄
    async fn handle_service_events(&self, listener: Arc<NamingListener>, notify: Arc<dyn NotifyListener>) {
        loop {
            if !self.is_available().await {
                debug!(service_name = listener.service_name(), "registry unavailable, stop pumping events");
                break;
            }

            let event = tokio::select! {
                biased;
                _ = self.inner.done.cancelled() => break,
                event = listener.next() => event,
            };
            match event {
                Ok(event) => {
                    info!(service_name = listener.service_name(), event = %event, "service event received");
                    notify.notify(event);
                }
                Err(e) => {
                    warn!(service_name = listener.service_name(), error = %e, "listener stopped");
                    break;
                }
            }
        }
        listener.close().await;
    }

    /// 关闭并移除缓存中的全部句柄
    async fn close_listeners(&self) {
        let listeners = self.inner.listeners.drain();
        if listeners.is_empty() {
            return;
        }
        debug!(count = listeners.len(), "closing listeners");
        join_all(listeners.iter().map(|listener| listener.close())).await;
    }

    async fn close_client(&self) {
        let client = self.inner.client.write().await.take();
        if let Some(client) = client {
            client.close().await;
            info!("naming client released");
        }
    }
}

#[async_trait]
impl Registry for NamingRegistry {
    fn url(&self) -> &RegistryConfig {
        &self.inner.config
    }

    async fn register(&self, url: &Endpoint) -> Result<()> {
        let start = Instant::now();
        let service_name = get_service_name(url);
        let group = self.group().to_string();
        let client = self.client().await?;
        let param = create_register_param(url, &service_name, &group, &self.inner.config);
        info!(service_name = %service_name, group = %group, ip = %param.ip, port = param.port, weight = param.weight, "register instance");

        let result = client.register_instance(param).await;
        self.inner.metrics.publish(RegistryMetricEvent::register(
            matches!(result, Ok(true)),
            start,
        ));

        let reason = format!("registry [{}] to naming service failed", service_name);
        match result {
            Err(e) => Err(FlareError::backend(ErrorCode::RegisterFailed, reason, e)),
            Ok(false) => Err(FlareError::localized(ErrorCode::RegisterFailed, reason)),
            Ok(true) => {
                self.inner.registered.lock().await.push(url.clone());
                Ok(())
            }
        }
    }

    async fn unregister(&self, url: &Endpoint) -> Result<()> {
        let service_name = get_service_name(url);
        let group = self.group().to_string();
        let client = self.client().await?;
        let param = create_deregister_param(url, &service_name, &group, &self.inner.config);

        let reason = format!("deregister [{}] from naming service failed", service_name);
        match client.deregister_instance(param).await {
            Err(e) => Err(FlareError::backend(ErrorCode::DeregisterFailed, reason, e)),
            Ok(false) => Err(FlareError::localized(ErrorCode::DeregisterFailed, reason)),
            Ok(true) => Ok(()),
        }
    }

    async fn subscribe(&self, url: &Endpoint, listener: Arc<dyn NotifyListener>) -> Result<()> {
        if url.subscribe_role() != Some(Role::Consumer) {
            debug!(url = %url, "not a consumer, skip subscribing");
            return Ok(());
        }
        self.client().await?;

        if url.param_or(keys::INTERFACE, "") == ANY_VALUE {
            self.subscribe_all(url, &listener).await;
            self.spawn_scheduled_lookup(url.clone(), listener);
        } else {
            self.subscribe_until_success(url, listener).await;
        }
        Ok(())
    }

    async fn unsubscribe(&self, url: &Endpoint) -> Result<()> {
        let service_name = get_subscribe_name(url);
        let key = SubscriptionCache::key(&service_name, self.group());
        let Some(listener) = self.inner.listeners.get(&key) else {
            return Ok(());
        };
        let client = self.client().await?;
        client.unsubscribe(listener.subscribe_param()).await.map_err(|e| {
            FlareError::backend(
                ErrorCode::UnsubscribeFailed,
                format!("UnSubscribe [{}] to naming service failed", service_name),
                e,
            )
        })
    }

    async fn load_subscribe_instances(&self, url: &Endpoint, listener: &dyn NotifyListener) -> Result<()> {
        let service_name = get_subscribe_name(url);
        let group = self.group().to_string();
        let client = self.client().await?;
        let instances = client
            .select_all_instances(SelectAllInstancesParam {
                service_name: service_name.clone(),
                group_name: group.clone(),
            })
            .await
            .map_err(|e| {
                FlareError::backend(
                    ErrorCode::QueryFailed,
                    format!(
                        "could not query the instances for serviceName={},groupName={}",
                        service_name, group
                    ),
                    e,
                )
            })?;

        for instance in &instances {
            if let Some(endpoint) = generate_url(instance) {
                listener.notify(ServiceEvent::new(EventType::Add, endpoint));
            }
        }
        Ok(())
    }

    async fn is_available(&self) -> bool {
        if self.inner.done.is_cancelled() {
            return false;
        }
        let client = self.inner.client.read().await.clone();
        let group = self.group().to_string();
        self.inner
            .availability
            .check(move || async move {
                let Some(client) = client else {
                    return false;
                };
                let probe = client
                    .get_all_services_info(GetAllServiceInfoParam {
                        group_name: group,
                        page_no: 1,
                        page_size: 1,
                    })
                    .await;
                if let Err(e) = &probe {
                    warn!(error = %e, "naming service availability probe failed");
                }
                probe.is_ok()
            })
            .await
    }

    async fn destroy(&self) {
        if self
            .inner
            .state
            .compare_exchange(STATE_RUNNING, STATE_CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("naming registry already destroyed");
            return;
        }

        self.close_listeners().await;
        self.signal_shutdown();
        self.inner.tasks.wait().await;
        // 关闭信号发出前刚创建的句柄
        self.close_listeners().await;

        let registered = std::mem::take(&mut *self.inner.registered.lock().await);
        for url in &registered {
            info!(url = %url, "deregister url");
            if let Err(e) = self.unregister(url).await {
                error!(url = %url, error = %e, "deregister url failed");
            }
        }

        self.close_client().await;
        self.inner.state.store(STATE_CLOSED, Ordering::SeqCst);
        info!("naming registry destroyed");
    }
}
