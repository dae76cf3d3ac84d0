//! 进程内命名服务
//!
//! 与 [`NamingClient`] 的语义一致：注册 / 注销会立即推送给订阅者。
//! 带调用计数与故障注入，用于本地开发和测试。

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{
    DeregisterInstanceParam, GetAllServiceInfoParam, Instance, NamingClient,
    RegisterInstanceParam, SelectAllInstancesParam, ServiceList, SubscribeParam,
};
use crate::error::{ErrorCode, FlareError, Result};

/// 各接口的调用次数
#[derive(Debug, Default)]
pub struct CallStats {
    register: AtomicUsize,
    deregister: AtomicUsize,
    list_services: AtomicUsize,
    select_instances: AtomicUsize,
    subscribe: AtomicUsize,
    unsubscribe: AtomicUsize,
    close: AtomicUsize,
}

impl CallStats {
    pub fn register_calls(&self) -> usize {
        self.register.load(Ordering::SeqCst)
    }

    pub fn deregister_calls(&self) -> usize {
        self.deregister.load(Ordering::SeqCst)
    }

    pub fn list_services_calls(&self) -> usize {
        self.list_services.load(Ordering::SeqCst)
    }

    pub fn select_instances_calls(&self) -> usize {
        self.select_instances.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close.load(Ordering::SeqCst)
    }
}

/// 故障开关
#[derive(Debug, Default)]
struct Faults {
    register: AtomicBool,
    reject_register: AtomicBool,
    deregister: AtomicBool,
    list_services: AtomicBool,
    select_instances: AtomicBool,
    subscribe: AtomicBool,
    unsubscribe: AtomicBool,
}

#[derive(Default)]
struct State {
    /// (group, service) -> host -> instance
    services: BTreeMap<(String, String), HashMap<String, Instance>>,
    subscribers: Vec<SubscribeParam>,
}

/// 进程内命名服务客户端
#[derive(Default)]
pub struct MemoryNamingClient {
    state: Mutex<State>,
    stats: CallStats,
    faults: Faults,
    closed: AtomicBool,
}

impl MemoryNamingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_register(&self, fail: bool) {
        self.faults.register.store(fail, Ordering::SeqCst);
    }

    /// 调用成功但后端报告未注册
    pub fn reject_register(&self, reject: bool) {
        self.faults.reject_register.store(reject, Ordering::SeqCst);
    }

    pub fn fail_deregister(&self, fail: bool) {
        self.faults.deregister.store(fail, Ordering::SeqCst);
    }

    pub fn fail_list_services(&self, fail: bool) {
        self.faults.list_services.store(fail, Ordering::SeqCst);
    }

    pub fn fail_select_instances(&self, fail: bool) {
        self.faults.select_instances.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.faults.subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_unsubscribe(&self, fail: bool) {
        self.faults.unsubscribe.store(fail, Ordering::SeqCst);
    }

    /// 预置一个没有实例的服务名
    pub fn add_service_name(&self, group: &str, service_name: &str) {
        self.lock()
            .services
            .entry((group.to_string(), service_name.to_string()))
            .or_default();
    }

    /// 写入（或替换）一个实例并推送给订阅者
    pub fn put_instance(&self, group: &str, service_name: &str, instance: Instance) {
        self.lock()
            .services
            .entry((group.to_string(), service_name.to_string()))
            .or_default()
            .insert(instance.host(), instance);
        self.push(group, service_name);
    }

    /// 移除一个实例并推送给订阅者
    pub fn remove_instance(&self, group: &str, service_name: &str, host: &str) -> bool {
        let removed = self
            .lock()
            .services
            .get_mut(&(group.to_string(), service_name.to_string()))
            .map(|hosts| hosts.remove(host).is_some())
            .unwrap_or(false);
        if removed {
            self.push(group, service_name);
        }
        removed
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self, group: &str, service_name: &str) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| s.group_name == group && s.service_name == service_name)
            .count()
    }

    pub fn instances(&self, group: &str, service_name: &str) -> Vec<Instance> {
        self.lock()
            .services
            .get(&(group.to_string(), service_name.to_string()))
            .map(|hosts| hosts.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, fault: &AtomicBool, code: ErrorCode, op: &str) -> Result<()> {
        if self.is_closed() {
            return Err(FlareError::localized(ErrorCode::ConnectionClosed, "naming client is closed"));
        }
        if fault.load(Ordering::SeqCst) {
            return Err(FlareError::backend(code, format!("{} failed", op), "injected failure"));
        }
        Ok(())
    }

    /// 回调在锁外执行
    fn push(&self, group: &str, service_name: &str) {
        let (callbacks, instances) = {
            let state = self.lock();
            let callbacks: Vec<_> = state
                .subscribers
                .iter()
                .filter(|s| s.group_name == group && s.service_name == service_name)
                .map(|s| s.callback.clone())
                .collect();
            let instances: Vec<Instance> = state
                .services
                .get(&(group.to_string(), service_name.to_string()))
                .map(|hosts| hosts.values().cloned().collect())
                .unwrap_or_default();
            (callbacks, instances)
        };
        debug!(service_name, group, subscribers = callbacks.len(), "push instances");
        for callback in callbacks {
            callback(instances.clone());
        }
    }
}

#[async_trait]
impl NamingClient for MemoryNamingClient {
    async fn register_instance(&self, param: RegisterInstanceParam) -> Result<bool> {
        self.stats.register.fetch_add(1, Ordering::SeqCst);
        self.check(&self.faults.register, ErrorCode::RegisterFailed, "register instance")?;
        if self.faults.reject_register.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let instance = param.to_instance();
        self.put_instance(&param.group_name, &param.service_name, instance);
        Ok(true)
    }

    async fn deregister_instance(&self, param: DeregisterInstanceParam) -> Result<bool> {
        self.stats.deregister.fetch_add(1, Ordering::SeqCst);
        self.check(&self.faults.deregister, ErrorCode::DeregisterFailed, "deregister instance")?;
        let host = format!("{}:{}", param.ip, param.port);
        Ok(self.remove_instance(&param.group_name, &param.service_name, &host))
    }

    async fn get_all_services_info(&self, param: GetAllServiceInfoParam) -> Result<ServiceList> {
        self.stats.list_services.fetch_add(1, Ordering::SeqCst);
        self.check(&self.faults.list_services, ErrorCode::QueryFailed, "list services")?;
        let names: Vec<String> = self
            .lock()
            .services
            .keys()
            .filter(|(group, _)| *group == param.group_name)
            .map(|(_, name)| name.clone())
            .collect();
        let page_size = param.page_size.max(1) as usize;
        let skip = (param.page_no.max(1) as usize - 1).saturating_mul(page_size);
        Ok(ServiceList {
            count: names.len() as u64,
            doms: names.into_iter().skip(skip).take(page_size).collect(),
        })
    }

    async fn select_all_instances(&self, param: SelectAllInstancesParam) -> Result<Vec<Instance>> {
        self.stats.select_instances.fetch_add(1, Ordering::SeqCst);
        self.check(&self.faults.select_instances, ErrorCode::QueryFailed, "select instances")?;
        Ok(self.instances(&param.group_name, &param.service_name))
    }

    async fn subscribe(&self, param: SubscribeParam) -> Result<()> {
        self.stats.subscribe.fetch_add(1, Ordering::SeqCst);
        self.check(&self.faults.subscribe, ErrorCode::SubscribeFailed, "subscribe")?;
        let (group, service_name) = (param.group_name.clone(), param.service_name.clone());
        self.lock().subscribers.push(param);
        if !self.instances(&group, &service_name).is_empty() {
            self.push(&group, &service_name);
        }
        Ok(())
    }

    async fn unsubscribe(&self, param: SubscribeParam) -> Result<()> {
        self.stats.unsubscribe.fetch_add(1, Ordering::SeqCst);
        self.check(&self.faults.unsubscribe, ErrorCode::UnsubscribeFailed, "unsubscribe")?;
        self.lock().subscribers.retain(|s| !s.same_subscription(&param));
        Ok(())
    }

    async fn close(&self) {
        self.stats.close.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.lock().subscribers.clear();
    }
}
