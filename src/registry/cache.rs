//! 订阅句柄缓存
//!
//! 以 服务标识 + 分组 为键，同一个键最多只有一个活跃的远端订阅。
//! 默认在进程内共享；测试可以创建独立实例注入注册中心。

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, OnceLock};

use super::listener::NamingListener;

static GLOBAL_CACHE: OnceLock<Arc<SubscriptionCache>> = OnceLock::new();

#[derive(Default)]
pub struct SubscriptionCache {
    listeners: DashMap<String, Arc<NamingListener>>,
}

impl SubscriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进程级共享实例
    pub fn global() -> Arc<SubscriptionCache> {
        GLOBAL_CACHE.get_or_init(|| Arc::new(SubscriptionCache::new())).clone()
    }

    pub fn key(service_name: &str, group_name: &str) -> String {
        format!("{}{}", service_name, group_name)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.listeners.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<NamingListener>> {
        self.listeners.get(key).map(|entry| entry.value().clone())
    }

    /// 键不存在时写入，返回是否写入成功
    pub fn insert_if_absent(&self, key: String, listener: Arc<NamingListener>) -> bool {
        match self.listeners.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(listener);
                true
            }
        }
    }

    /// 仅当缓存中的句柄就是 `listener` 时移除
    pub fn remove_if_same(&self, key: &str, listener: &Arc<NamingListener>) -> bool {
        self.listeners
            .remove_if(key, |_, cached| Arc::ptr_eq(cached, listener))
            .is_some()
    }

    /// 移除并返回全部句柄
    pub fn drain(&self) -> Vec<Arc<NamingListener>> {
        let keys: Vec<String> = self.listeners.iter().map(|entry| entry.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.listeners.remove(&key).map(|(_, listener)| listener))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
