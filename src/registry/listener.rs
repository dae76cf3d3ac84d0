//! 订阅句柄
//!
//! 一个句柄对应后端的一个订阅：后端推送的实例列表与上一次的快照比较，
//! 差异转成 [`ServiceEvent`] 按产生顺序排队，由 [`NamingListener::next`] 逐个取出。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::service_name::generate_url;
use crate::client::{Instance, NamingClient, SubscribeCallback, SubscribeParam};
use crate::error::{FlareError, Result};
use crate::types::{EventType, ServiceEvent};

/// 回调侧状态：上一次的实例快照和事件发送端
struct InstanceDiff {
    service_name: String,
    instances: Mutex<HashMap<String, Instance>>,
    tx: mpsc::UnboundedSender<ServiceEvent>,
}

impl InstanceDiff {
    fn on_instances(&self, services: Vec<Instance>) {
        let mut added = Vec::new();
        let mut updated = Vec::new();
        let mut deleted = Vec::new();

        let mut cached = self.instances.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = HashMap::with_capacity(services.len());
        for instance in services {
            if !instance.enabled {
                continue;
            }
            let host = instance.host();
            if instance.healthy {
                match cached.get(&host) {
                    Some(old) if old.healthy => {
                        if old != &instance {
                            updated.push(instance.clone());
                        }
                    }
                    // 新实例或从不健康恢复
                    _ => added.push(instance.clone()),
                }
            }
            next.insert(host, instance);
        }
        for (host, old) in cached.iter().filter(|(_, old)| old.healthy) {
            match next.get(host) {
                Some(current) if current.healthy => {}
                _ => deleted.push(old.clone()),
            }
        }
        *cached = next;
        drop(cached);

        let batches = [
            (EventType::Add, added),
            (EventType::Delete, deleted),
            (EventType::Update, updated),
        ];
        for (action, instances) in batches {
            for instance in instances {
                let Some(endpoint) = generate_url(&instance) else {
                    warn!(service_name = %self.service_name, host = %instance.host(), "instance has no usable endpoint metadata");
                    continue;
                };
                if self.tx.send(ServiceEvent::new(action, endpoint)).is_err() {
                    return;
                }
            }
        }
    }
}

/// 订阅句柄
pub struct NamingListener {
    id: Uuid,
    service_name: String,
    group_name: String,
    client: Arc<dyn NamingClient>,
    callback: SubscribeCallback,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServiceEvent>>,
    closing: AtomicBool,
    closed: CancellationToken,
}

impl NamingListener {
    pub fn new(
        service_name: impl Into<String>,
        group_name: impl Into<String>,
        client: Arc<dyn NamingClient>,
    ) -> Arc<Self> {
        let service_name = service_name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let diff = Arc::new(InstanceDiff {
            service_name: service_name.clone(),
            instances: Mutex::new(HashMap::new()),
            tx,
        });
        let callback: SubscribeCallback = Arc::new(move |services| diff.on_instances(services));

        Arc::new(Self {
            id: Uuid::new_v4(),
            service_name,
            group_name: group_name.into(),
            client,
            callback,
            events: tokio::sync::Mutex::new(rx),
            closing: AtomicBool::new(false),
            closed: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn subscribe_param(&self) -> SubscribeParam {
        SubscribeParam {
            service_name: self.service_name.clone(),
            group_name: self.group_name.clone(),
            callback: self.callback.clone(),
        }
    }

    /// 发起远端订阅
    pub async fn listen(&self) -> Result<()> {
        self.client.subscribe(self.subscribe_param()).await
    }

    /// 等待下一个事件；句柄关闭后返回错误
    pub async fn next(&self) -> Result<ServiceEvent> {
        if self.is_closed() {
            return Err(FlareError::listener_closed(&self.service_name));
        }
        let mut events = self.events.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(FlareError::listener_closed(&self.service_name)),
            event = events.recv() => event.ok_or_else(|| FlareError::listener_closed(&self.service_name)),
        }
    }

    /// 关闭句柄：取消远端订阅并唤醒等待中的 `next`
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();
        if let Err(e) = self.client.unsubscribe(self.subscribe_param()).await {
            warn!(service_name = %self.service_name, error = %e, "unsubscribe on close failed");
        }
        debug!(service_name = %self.service_name, listener = %self.id, "listener closed");
    }
}
