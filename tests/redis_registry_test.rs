//! Redis 注册中心集成测试
//!
//! 这些测试需要运行中的 Redis 实例。
//! 默认情况下测试被忽略，使用 `cargo test --test redis_registry_test -- --ignored` 运行。
//!
//! 启动 Redis：
//! ```bash
//! docker run -d --name redis-test -p 6379:6379 redis:7
//! ```

use sharp_server_core::registry::{RedisRegistry, ServiceRegistryTrait};
use sharp_server_core::types::{ServiceInstance, ServiceStatus};
use std::time::Duration;
use tokio::time::sleep;

/// Redis 地址，可通过环境变量 REDIS_URL 覆盖
fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// 每个测试使用独立前缀，避免相互污染
fn test_prefix(tag: &str) -> String {
    format!("sharptest-{}-{}", tag, uuid::Uuid::new_v4())
}

fn test_instance(id: &str, port: u16) -> ServiceInstance {
    ServiceInstance::new("GameServer", "10.0.0.1", port)
        .with_id(id)
        .with_metadata("env", "test")
}

#[tokio::test]
#[ignore]
async fn test_redis_register_and_discover() {
    let registry = RedisRegistry::new(&redis_url(), test_prefix("register"))
        .await
        .expect("failed to connect to redis");

    let g1 = test_instance("g1", 7144);
    registry
        .register(&g1, Duration::from_secs(60))
        .await
        .expect("failed to register");

    let found = registry.discover("GameServer").await.expect("discover failed");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].service_id, "g1");
    assert_eq!(found[0].status, ServiceStatus::Up);

    registry.unregister("g1").await.expect("unregister failed");
}

#[tokio::test]
#[ignore]
async fn test_redis_get_via_reverse_index() {
    let registry = RedisRegistry::new(&redis_url(), test_prefix("index"))
        .await
        .expect("failed to connect to redis");

    let g1 = test_instance("g1", 7144);
    registry
        .register(&g1, Duration::from_secs(60))
        .await
        .expect("failed to register");

    let got = registry
        .get_service("g1")
        .await
        .expect("get_service failed")
        .expect("instance missing");
    assert_eq!(got.service_name, "GameServer");
    assert_eq!(got.uri(), "http://10.0.0.1:7144");

    assert!(registry
        .get_service("no-such-id")
        .await
        .expect("get_service failed")
        .is_none());

    registry.unregister("g1").await.expect("unregister failed");
}

#[tokio::test]
#[ignore]
async fn test_redis_unregister_cleans_indices() {
    let registry = RedisRegistry::new(&redis_url(), test_prefix("unregister"))
        .await
        .expect("failed to connect to redis");

    registry
        .register(&test_instance("g1", 7144), Duration::from_secs(60))
        .await
        .expect("failed to register");
    registry.unregister("g1").await.expect("unregister failed");

    assert!(registry
        .discover("GameServer")
        .await
        .expect("discover failed")
        .is_empty());
    assert!(registry
        .get_service("g1")
        .await
        .expect("get_service failed")
        .is_none());

    // 实例不存在时注销不是错误
    registry.unregister("g1").await.expect("unregister failed");
}

#[tokio::test]
#[ignore]
async fn test_redis_expiry_without_refresh() {
    let registry = RedisRegistry::new(&redis_url(), test_prefix("expiry"))
        .await
        .expect("failed to connect to redis");

    registry
        .register(&test_instance("g1", 7144), Duration::from_secs(2))
        .await
        .expect("failed to register");

    sleep(Duration::from_secs(3)).await;

    assert!(registry
        .discover("GameServer")
        .await
        .expect("discover failed")
        .is_empty());
    assert!(registry
        .get_service("g1")
        .await
        .expect("get_service failed")
        .is_none());
}

#[tokio::test]
#[ignore]
async fn test_redis_refresh_extends_ttl() {
    let registry = RedisRegistry::new(&redis_url(), test_prefix("refresh"))
        .await
        .expect("failed to connect to redis");

    registry
        .register(&test_instance("g1", 7144), Duration::from_secs(2))
        .await
        .expect("failed to register");

    for _ in 0..3 {
        sleep(Duration::from_millis(1200)).await;
        registry
            .refresh("g1", Duration::from_secs(2))
            .await
            .expect("refresh failed");
    }

    // 远超初始 TTL 后仍然可见
    let found = registry.discover("GameServer").await.expect("discover failed");
    assert_eq!(found.len(), 1);

    registry.unregister("g1").await.expect("unregister failed");
}

#[tokio::test]
#[ignore]
async fn test_redis_reregister_replaces_record() {
    let registry = RedisRegistry::new(&redis_url(), test_prefix("reregister"))
        .await
        .expect("failed to connect to redis");

    registry
        .register(&test_instance("g1", 7144), Duration::from_secs(60))
        .await
        .expect("failed to register");
    registry
        .register(&test_instance("g1", 7145), Duration::from_secs(60))
        .await
        .expect("failed to re-register");

    let found = registry.discover("GameServer").await.expect("discover failed");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].port, 7145);

    registry.unregister("g1").await.expect("unregister failed");
}

#[tokio::test]
#[ignore]
async fn test_redis_stale_set_member_pruned() {
    let registry = RedisRegistry::new(&redis_url(), test_prefix("prune"))
        .await
        .expect("failed to connect to redis");

    // g1 的值记录先于集合 TTL 过期，留下失效的集合成员
    registry
        .register(&test_instance("g1", 7144), Duration::from_secs(2))
        .await
        .expect("failed to register g1");
    registry
        .register(&test_instance("g2", 7145), Duration::from_secs(60))
        .await
        .expect("failed to register g2");

    sleep(Duration::from_secs(3)).await;

    let found = registry.discover("GameServer").await.expect("discover failed");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].service_id, "g2");

    // 第二次发现时失效成员已被清理
    let again = registry.discover("GameServer").await.expect("discover failed");
    assert_eq!(again.len(), 1);

    registry.unregister("g2").await.expect("unregister failed");
}

#[tokio::test]
#[ignore]
async fn test_redis_discover_excludes_non_up() {
    let registry = RedisRegistry::new(&redis_url(), test_prefix("status"))
        .await
        .expect("failed to connect to redis");

    registry
        .register(&test_instance("g1", 7144), Duration::from_secs(60))
        .await
        .expect("failed to register g1");
    registry
        .register(
            &test_instance("g2", 7145).with_status(ServiceStatus::Maintenance),
            Duration::from_secs(60),
        )
        .await
        .expect("failed to register g2");

    let found = registry.discover("GameServer").await.expect("discover failed");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].service_id, "g1");

    registry.unregister("g1").await.expect("unregister failed");
    registry.unregister("g2").await.expect("unregister failed");
}
