//! 注册中心集成测试
//!
//! 使用进程内命名服务，每个测试使用独立的订阅缓存

use flare_naming::config::DEFAULT_GROUP;
use flare_naming::types::{ANY_VALUE, keys};
use flare_naming::{
    Endpoint, ErrorCode, EventType, MemoryNamingClient, MetricsCollector, NamingRegistry,
    NotifyListener, Registry, RegistryBuilder, RegistryConfig, RetryConfig, Role, ServiceEvent,
    SubscriptionCache,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

const SERVICE_NAME: &str = "providers:com.foo.Bar::";

fn config() -> RegistryConfig {
    RegistryConfig::new("127.0.0.1:8848")
}

fn registry_with(client: &Arc<MemoryNamingClient>, config: RegistryConfig) -> NamingRegistry {
    RegistryBuilder::new(config)
        .client(client.clone())
        .subscription_cache(Arc::new(SubscriptionCache::new()))
        .build()
}

fn registry(client: &Arc<MemoryNamingClient>) -> NamingRegistry {
    registry_with(client, config())
}

fn provider(port: u16) -> Endpoint {
    Endpoint::new("tri", "10.0.0.1", port)
        .with_path("/com.foo.Bar")
        .with_methods(["SayHello"])
        .with_param(keys::INTERFACE, "com.foo.Bar")
}

fn consumer() -> Endpoint {
    Endpoint::new("tri", "10.0.0.9", 0)
        .with_role(Role::Consumer)
        .with_param(keys::INTERFACE, "com.foo.Bar")
}

fn channel_listener() -> (Arc<dyn NotifyListener>, mpsc::UnboundedReceiver<ServiceEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener: Arc<dyn NotifyListener> = Arc::new(move |event: ServiceEvent| {
        let _ = tx.send(event);
    });
    (listener, rx)
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<ServiceEvent>) -> ServiceEvent {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("event should arrive")
        .expect("channel open")
}

#[tokio::test]
async fn register_then_destroy_deregisters_once() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    let endpoint = provider(20000);

    assert_ok!(registry.register(&endpoint).await);
    assert_eq!(registry.registered_endpoints().await, vec![endpoint.clone()]);
    assert_eq!(client.instances(DEFAULT_GROUP, SERVICE_NAME).len(), 1);

    registry.destroy().await;

    assert_eq!(client.stats().deregister_calls(), 1);
    assert!(registry.registered_endpoints().await.is_empty());
    assert!(client.instances(DEFAULT_GROUP, SERVICE_NAME).is_empty());
    assert!(client.is_closed());
}

#[tokio::test]
async fn unregister_keeps_ledger_until_destroy() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    let endpoint = provider(20000);

    registry.register(&endpoint).await.unwrap();
    registry.unregister(&endpoint).await.unwrap();
    assert_eq!(registry.registered_endpoints().await.len(), 1);

    // 已经不在后端，再次注销报告未移除
    let err = assert_err!(registry.unregister(&endpoint).await);
    assert_eq!(err.code(), Some(ErrorCode::DeregisterFailed));

    // 关闭时注销失败只记录日志
    registry.destroy().await;
    assert_eq!(client.stats().deregister_calls(), 3);
    assert!(registry.registered_endpoints().await.is_empty());
}

#[tokio::test]
async fn weight_is_normalized_on_register() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);

    let cases = [("abc", 1.0), ("0", 1.0), ("20000", 10000.0), ("5.5", 5.5)];
    for (idx, (raw, _)) in cases.iter().enumerate() {
        let endpoint = provider(20000 + idx as u16).with_param(keys::WEIGHT, *raw);
        registry.register(&endpoint).await.unwrap();
    }

    let instances = client.instances(DEFAULT_GROUP, SERVICE_NAME);
    for (idx, (_, expected)) in cases.iter().enumerate() {
        let port = 20000 + idx as u16;
        let instance = instances.iter().find(|i| i.port == port).unwrap();
        assert_eq!(instance.weight, *expected);
        assert!(instance.ephemeral && instance.enabled && instance.healthy);
    }
    registry.destroy().await;
}

#[tokio::test]
async fn register_records_metadata() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);

    registry.register(&provider(20000)).await.unwrap();
    let instance = client.instances(DEFAULT_GROUP, SERVICE_NAME).remove(0);
    assert_eq!(instance.metadata.get(keys::CATEGORY).map(String::as_str), Some("providers"));
    assert_eq!(instance.metadata.get(keys::PROTOCOL).map(String::as_str), Some("tri"));
    assert_eq!(instance.metadata.get(keys::PATH).map(String::as_str), Some("/com.foo.Bar"));
    assert_eq!(instance.metadata.get(keys::METHODS).map(String::as_str), Some("SayHello"));
    registry.destroy().await;
}

#[tokio::test]
async fn register_override_and_default_port() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry_with(&client, config().with_ip_to_registry("192.168.1.10"));

    registry.register(&provider(0)).await.unwrap();
    let instance = client.instances(DEFAULT_GROUP, SERVICE_NAME).remove(0);
    assert_eq!(instance.ip, "192.168.1.10");
    assert_eq!(instance.port, 80);
    registry.destroy().await;
}

#[tokio::test]
async fn rejected_register_is_an_error() {
    let client = Arc::new(MemoryNamingClient::new());
    client.reject_register(true);
    let collector = MetricsCollector::new();
    let registry = RegistryBuilder::new(config())
        .client(client.clone())
        .subscription_cache(Arc::new(SubscriptionCache::new()))
        .metrics(Arc::new(collector.clone()))
        .build();

    let err = registry.register(&provider(20000)).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::RegisterFailed));
    assert_eq!(
        err.reason(),
        "registry [providers:com.foo.Bar::] to naming service failed"
    );
    assert!(registry.registered_endpoints().await.is_empty());
    assert_eq!(collector.snapshot().register_failed, 1);
}

#[tokio::test]
async fn backend_register_failure_is_returned() {
    let client = Arc::new(MemoryNamingClient::new());
    client.fail_register(true);
    let collector = MetricsCollector::new();
    let registry = RegistryBuilder::new(config())
        .client(client.clone())
        .subscription_cache(Arc::new(SubscriptionCache::new()))
        .metrics(Arc::new(collector.clone()))
        .build();

    let err = registry.register(&provider(20000)).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::RegisterFailed));
    assert!(err.details().is_some());
    assert!(registry.registered_endpoints().await.is_empty());

    client.fail_register(false);
    registry.register(&provider(20000)).await.unwrap();
    let metrics = collector.snapshot();
    assert_eq!(metrics.register_total, 2);
    assert_eq!(metrics.register_success, 1);
}

#[tokio::test]
async fn duplicate_subscribe_shares_one_handle() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    let (listener, _rx) = channel_listener();

    registry.subscribe(&consumer(), listener.clone()).await.unwrap();
    registry.subscribe(&consumer(), listener).await.unwrap();

    assert_eq!(client.stats().subscribe_calls(), 1);
    assert_eq!(registry.subscription_cache().len(), 1);
    assert_eq!(registry.pending_tasks(), 1);
    assert_eq!(client.subscriber_count(DEFAULT_GROUP, SERVICE_NAME), 1);
    registry.destroy().await;
}

#[tokio::test]
async fn non_consumer_subscribe_is_noop() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    let (listener, _rx) = channel_listener();

    let url = consumer().with_role(Role::Provider);
    registry.subscribe(&url, listener).await.unwrap();

    assert_eq!(client.stats().subscribe_calls(), 0);
    assert_eq!(client.stats().list_services_calls(), 0);
    assert!(registry.subscription_cache().is_empty());
}

#[tokio::test]
async fn missing_role_subscribes_as_consumer() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    let (listener, _rx) = channel_listener();

    let url = Endpoint::new("tri", "10.0.0.9", 0).with_param(keys::INTERFACE, "com.foo.Bar");
    registry.subscribe(&url, listener).await.unwrap();

    assert_eq!(client.stats().subscribe_calls(), 1);
    registry.destroy().await;
}

#[tokio::test]
async fn events_are_delivered_in_order() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    let (listener, mut rx) = channel_listener();

    registry.subscribe(&consumer(), listener).await.unwrap();
    for port in [20001, 20002, 20003] {
        registry.register(&provider(port)).await.unwrap();
    }

    for port in [20001, 20002, 20003] {
        let event = recv(&mut rx).await;
        assert_eq!(event.action, EventType::Add);
        assert_eq!(event.service.port, port);
        assert_eq!(event.service.path, "/com.foo.Bar");
    }

    registry.unregister(&provider(20002)).await.unwrap();
    let event = recv(&mut rx).await;
    assert_eq!(event.action, EventType::Delete);
    assert_eq!(event.service.port, 20002);

    registry.register(&provider(20001).with_param(keys::WEIGHT, "3")).await.unwrap();
    let event = recv(&mut rx).await;
    assert_eq!(event.action, EventType::Update);
    assert_eq!(event.service.port, 20001);

    registry.destroy().await;
}

#[tokio::test]
async fn subscribe_replays_existing_instances() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    registry.register(&provider(20000)).await.unwrap();

    let (listener, mut rx) = channel_listener();
    registry.subscribe(&consumer(), listener).await.unwrap();

    let event = recv(&mut rx).await;
    assert_eq!(event.action, EventType::Add);
    assert_eq!(event.service.ip, "10.0.0.1");
    registry.destroy().await;
}

#[tokio::test]
async fn wildcard_subscribes_matching_categories_only() {
    let client = Arc::new(MemoryNamingClient::new());
    client.add_service_name(DEFAULT_GROUP, "providers:com.foo.Bar:1.0:g1");
    client.add_service_name(DEFAULT_GROUP, "consumers:com.foo.Bar:1.0:g1");
    let registry = registry(&client);
    let (listener, _rx) = channel_listener();

    let url = Endpoint::new("tri", "10.0.0.9", 0)
        .with_role(Role::Consumer)
        .with_param(keys::INTERFACE, ANY_VALUE)
        .with_param(keys::CATEGORY, "providers");
    registry.subscribe(&url, listener).await.unwrap();

    assert_eq!(client.stats().subscribe_calls(), 1);
    assert_eq!(registry.subscription_cache().len(), 1);
    let key = SubscriptionCache::key("providers:com.foo.Bar:1.0:g1", DEFAULT_GROUP);
    assert!(registry.subscription_cache().contains(&key));
    assert_eq!(client.subscriber_count(DEFAULT_GROUP, "consumers:com.foo.Bar:1.0:g1"), 0);

    // 单个事件泵 + 定时扫描
    assert_eq!(registry.pending_tasks(), 2);
    registry.destroy().await;
    assert_eq!(registry.pending_tasks(), 0);
}

#[tokio::test]
async fn wildcard_without_services_is_not_an_error() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    let (listener, _rx) = channel_listener();

    let url = Endpoint::new("tri", "10.0.0.9", 0)
        .with_role(Role::Consumer)
        .with_param(keys::INTERFACE, ANY_VALUE);
    registry.subscribe(&url, listener).await.unwrap();

    assert_eq!(client.stats().subscribe_calls(), 0);
    assert!(registry.subscription_cache().is_empty());
    registry.destroy().await;
}

#[tokio::test]
async fn destroy_twice_closes_client_once() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);

    registry.destroy().await;
    registry.destroy().await;

    assert_eq!(client.stats().close_calls(), 1);
    assert!(registry.is_destroyed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_destroy_closes_client_once() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    registry.register(&provider(20000)).await.unwrap();

    let other = registry.clone();
    let (first, second) = tokio::join!(
        tokio::spawn(async move { other.destroy().await }),
        registry.destroy()
    );
    first.unwrap();
    let () = second;

    assert_eq!(client.stats().close_calls(), 1);
    assert_eq!(client.stats().deregister_calls(), 1);
}

#[tokio::test]
async fn destroy_unblocks_idle_event_pump() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    let (listener, _rx) = channel_listener();

    registry.subscribe(&consumer(), listener).await.unwrap();
    assert_eq!(registry.pending_tasks(), 1);

    timeout(Duration::from_secs(1), registry.destroy())
        .await
        .expect("destroy should not hang on an idle subscription");
    assert_eq!(registry.pending_tasks(), 0);
    assert!(registry.subscription_cache().is_empty());
    assert_eq!(client.stats().unsubscribe_calls(), 1);
}

#[tokio::test]
async fn destroy_without_client_is_noop() {
    let registry = RegistryBuilder::new(config())
        .subscription_cache(Arc::new(SubscriptionCache::new()))
        .build();

    assert!(!registry.is_available().await);
    let err = registry.register(&provider(20000)).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::RegistryUnavailable));

    registry.destroy().await;
    registry.destroy().await;
    assert!(registry.is_destroyed());
}

#[tokio::test]
async fn subscribe_after_destroy_is_rejected() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    registry.destroy().await;

    let (listener, _rx) = channel_listener();
    assert!(registry.subscribe(&consumer(), listener).await.is_err());
    assert!(!registry.is_available().await);
    assert_eq!(client.stats().subscribe_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn availability_is_cached_within_check_interval() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);

    assert!(registry.is_available().await);
    assert!(registry.is_available().await);
    assert_eq!(client.stats().list_services_calls(), 1);

    client.fail_list_services(true);
    tokio::time::advance(Duration::from_secs(4)).await;
    assert!(registry.is_available().await);
    assert_eq!(client.stats().list_services_calls(), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(!registry.is_available().await);
    assert_eq!(client.stats().list_services_calls(), 2);

    // 失败同样刷新检查时间
    assert!(!registry.is_available().await);
    assert_eq!(client.stats().list_services_calls(), 2);
}

#[tokio::test]
async fn subscribe_retries_until_success() {
    let client = Arc::new(MemoryNamingClient::new());
    client.fail_subscribe(true);
    let collector = MetricsCollector::new();
    let config = config().with_subscribe_retry(RetryConfig::fixed(Duration::from_millis(10)));
    let registry = RegistryBuilder::new(config)
        .client(client.clone())
        .subscription_cache(Arc::new(SubscriptionCache::new()))
        .metrics(Arc::new(collector.clone()))
        .build();
    let (listener, _rx) = channel_listener();

    let subscriber = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.subscribe(&consumer(), listener).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.fail_subscribe(false);

    timeout(Duration::from_secs(1), subscriber)
        .await
        .expect("subscribe should finish once the backend recovers")
        .unwrap()
        .unwrap();

    assert!(client.stats().subscribe_calls() >= 2);
    assert_eq!(registry.subscription_cache().len(), 1);
    let metrics = collector.snapshot();
    assert_eq!(metrics.subscribe_success, 1);
    assert!(metrics.subscribe_failed >= 1);
    registry.destroy().await;
}

#[tokio::test]
async fn subscribe_gives_up_when_registry_unavailable() {
    let client = Arc::new(MemoryNamingClient::new());
    client.fail_list_services(true);
    let registry = registry(&client);
    let (listener, _rx) = channel_listener();

    registry.subscribe(&consumer(), listener).await.unwrap();
    assert_eq!(client.stats().subscribe_calls(), 0);
    assert!(registry.subscription_cache().is_empty());
}

#[tokio::test]
async fn load_subscribe_instances_emits_add_events() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);
    registry.register(&provider(20001)).await.unwrap();
    registry.register(&provider(20002)).await.unwrap();

    let (listener, mut rx) = channel_listener();
    registry.load_subscribe_instances(&consumer(), listener.as_ref()).await.unwrap();

    let mut ports = vec![recv(&mut rx).await, recv(&mut rx).await]
        .into_iter()
        .map(|event| {
            assert_eq!(event.action, EventType::Add);
            event.service.port
        })
        .collect::<Vec<_>>();
    ports.sort();
    assert_eq!(ports, vec![20001, 20002]);
    registry.destroy().await;
}

#[tokio::test]
async fn registry_group_drives_register_and_lookup() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry_with(&client, config().with_registry_group("g1"));
    registry.register(&provider(20000)).await.unwrap();

    assert_eq!(client.instances("g1", SERVICE_NAME).len(), 1);
    assert!(client.instances(DEFAULT_GROUP, SERVICE_NAME).is_empty());

    let (listener, mut rx) = channel_listener();
    registry.load_subscribe_instances(&consumer(), listener.as_ref()).await.unwrap();
    let event = recv(&mut rx).await;
    assert_eq!(event.action, EventType::Add);
    assert_eq!(event.service.port, 20000);

    registry.destroy().await;
    assert!(client.instances("g1", SERVICE_NAME).is_empty());
}

#[tokio::test]
async fn load_subscribe_instances_surfaces_query_failure() {
    let client = Arc::new(MemoryNamingClient::new());
    client.fail_select_instances(true);
    let registry = registry(&client);
    let (listener, _rx) = channel_listener();

    let err = registry
        .load_subscribe_instances(&consumer(), listener.as_ref())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::QueryFailed));
    assert_eq!(
        err.reason(),
        "could not query the instances for serviceName=providers:com.foo.Bar::,groupName=DEFAULT_GROUP"
    );
}

#[tokio::test]
async fn unsubscribe_keeps_cached_handle() {
    let client = Arc::new(MemoryNamingClient::new());
    let registry = registry(&client);

    // 没有订阅时是空操作
    registry.unsubscribe(&consumer()).await.unwrap();
    assert_eq!(client.stats().unsubscribe_calls(), 0);

    let (listener, _rx) = channel_listener();
    registry.subscribe(&consumer(), listener).await.unwrap();
    registry.unsubscribe(&consumer()).await.unwrap();
    assert_eq!(client.stats().unsubscribe_calls(), 1);
    assert_eq!(client.subscriber_count(DEFAULT_GROUP, SERVICE_NAME), 0);
    assert_eq!(registry.subscription_cache().len(), 1);

    client.fail_unsubscribe(true);
    let err = registry.unsubscribe(&consumer()).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::UnsubscribeFailed));
    client.fail_unsubscribe(false);
    registry.destroy().await;
}
