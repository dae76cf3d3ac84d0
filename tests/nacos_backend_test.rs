//! 命名服务后端集成测试
//!
//! 这些测试需要运行中的 Nacos 服务器实例。
//! 默认情况下，测试会被忽略，需要使用 `cargo test --test nacos_backend_test -- --ignored` 运行。
//!
//! 启动 Nacos 服务器：
//! ```bash
//! docker run -d --name nacos-test -p 8848:8848 -e MODE=standalone nacos/nacos-server:v2.3.0
//! ```

use flare_naming::types::keys;
use flare_naming::{
    Endpoint, EventType, NotifyListener, Registry, RegistryConfig, Role, ServiceEvent,
    create_registry,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep, timeout};

/// Nacos 服务器地址
/// 可以通过环境变量 NACOS_ADDRESS 覆盖，默认为 127.0.0.1:8848
fn nacos_address() -> String {
    std::env::var("NACOS_ADDRESS").unwrap_or_else(|_| "127.0.0.1:8848".to_string())
}

fn test_config() -> RegistryConfig {
    let mut config = RegistryConfig::new(nacos_address()).with_group("flare-test");
    config.poll_interval_ms = 500;
    config
}

fn provider(port: u16) -> Endpoint {
    Endpoint::new("tri", "127.0.0.1", port)
        .with_path("/com.flare.test.Echo")
        .with_param(keys::INTERFACE, "com.flare.test.Echo")
        .with_param(keys::VERSION, "1.0.0")
}

#[tokio::test]
#[ignore]
async fn test_register_and_load_instances() {
    let registry = create_registry(test_config())
        .await
        .expect("Failed to connect to naming service");
    assert!(registry.is_available().await);

    let endpoint = provider(30001);
    registry.register(&endpoint).await.expect("Failed to register");
    // 等待服务端索引实例
    sleep(Duration::from_secs(2)).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = move |event: ServiceEvent| {
        let _ = tx.send(event);
    };
    let consumer = endpoint.clone().with_role(Role::Consumer);
    registry
        .load_subscribe_instances(&consumer, &listener)
        .await
        .expect("Failed to load instances");

    let event = rx.recv().await.expect("no instance loaded");
    assert_eq!(event.action, EventType::Add);
    assert_eq!(event.service.port, 30001);

    registry.destroy().await;
}

#[tokio::test]
#[ignore]
async fn test_subscribe_receives_new_instance() {
    let registry = create_registry(test_config())
        .await
        .expect("Failed to connect to naming service");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener: Arc<dyn NotifyListener> = Arc::new(move |event: ServiceEvent| {
        let _ = tx.send(event);
    });
    let consumer = provider(0).with_role(Role::Consumer);
    registry
        .subscribe(&consumer, listener)
        .await
        .expect("Failed to subscribe");

    registry.register(&provider(30002)).await.expect("Failed to register");

    let event = timeout(Duration::from_secs(10), async {
        loop {
            match rx.recv().await {
                Some(event) if event.service.port == 30002 => return event,
                Some(_) => continue,
                None => panic!("listener dropped"),
            }
        }
    })
    .await
    .expect("no event for the new instance");
    assert_eq!(event.action, EventType::Add);

    registry.destroy().await;
}
