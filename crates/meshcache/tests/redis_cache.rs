//! Integration tests against a real Redis.
//!
//! Tests use testcontainers to spin up a Redis instance and need Docker:
//!
//! ```text
//! cargo test -p meshcache --test redis_cache -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use meshcache::{
    AppConfig, CacheManager, InvalidationStats, LruStrategy, RedisConfig, SetOptions,
    StrategyKind, TtlStatus, create_cache, create_store,
};
use meshcache_store::{DynStore, KeyValueStore, RedisStore};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, u16)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn redis_config(db: i64) -> RedisConfig {
    let (_, port) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, port)
        })
        .await;

    RedisConfig {
        host: "127.0.0.1".into(),
        port: *port,
        db,
        ..Default::default()
    }
}

async fn connect(db: i64) -> DynStore {
    Arc::new(
        RedisStore::connect(&redis_config(db).await)
            .await
            .expect("connect to redis"),
    )
}

async fn wait_for_stats(manager: &CacheManager, expected: InvalidationStats) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while manager.invalidation_stats() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {expected:?}, got {:?}",
            manager.invalidation_stats()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_store_commands() {
    let store = connect(1).await;
    assert!(store.ping().await.is_ok());

    store.set_ex("t:a", "1", 60).await.unwrap();
    store.set("t:b", "2").await.unwrap();
    assert_eq!(store.get("t:a").await.unwrap().as_deref(), Some("1"));
    assert_eq!(store.ttl("t:b").await.unwrap(), -1);
    assert_eq!(store.ttl("t:missing").await.unwrap(), -2);

    let keys = store.scan_all("t:*").await.unwrap();
    assert_eq!(keys, vec!["t:a".to_string(), "t:b".to_string()]);
    assert_eq!(store.del(&keys).await.unwrap(), 2);

    store.zadd("t:z", "x", 2.0).await.unwrap();
    store.zadd("t:z", "y", 1.0).await.unwrap();
    assert_eq!(store.zrange("t:z", 0, -1).await.unwrap(), vec!["y", "x"]);
    assert_eq!(store.zscore("t:z", "x").await.unwrap(), Some(2.0));
    assert_eq!(store.zrem("t:z", &["x".into()]).await.unwrap(), 1);
    assert_eq!(store.zcard("t:z").await.unwrap(), 1);
    store.del(&["t:z".into()]).await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_store_connects() {
    let store = create_store(&redis_config(2).await).await;
    assert_eq!(store.backend_name(), "redis");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_invalidation_between_instances() {
    let mut config = AppConfig::default();
    config.cache.key_prefix = "it:".into();
    config.cache.invalidation_channel = "it:invalidation".into();

    // Same process: give the instances distinct identities.
    let instance = |store: DynStore, id: &str| {
        Arc::new(
            CacheManager::builder(store)
                .with_config(&config.cache)
                .with_instance_id(id)
                .build(),
        )
    };
    let a = instance(connect(3).await, "instance-a");
    let b = instance(connect(3).await, "instance-b");
    b.start_listener().await.unwrap();

    a.set("user:42", &"Ada", &SetOptions::new().ttl(60)).await.unwrap();
    assert_eq!(a.ttl("user:42").await, TtlStatus::Expires(60));
    assert!(a.invalidate("user:42", true).await);

    wait_for_stats(
        &b,
        InvalidationStats {
            applied: 1,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(b.get::<String>("user:42").await, None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_create_cache_over_redis() {
    let mut config = AppConfig::default();
    config.redis = redis_config(5).await;
    config.cache.strategy = StrategyKind::Lru;
    config.cache.lru.max_entries = 10;

    let store = create_store(&config.redis).await;
    let cache = create_cache(&config, store).await.unwrap();
    for i in 0..25 {
        cache.set(&format!("user:{i}"), &i, &SetOptions::new()).await.unwrap();
    }

    let lru = LruStrategy::new(cache.manager().store().clone(), 10, None, "lru:access");
    assert!(lru.size().await <= 10);
    assert_eq!(cache.get::<u32>("user:24").await, Some(24));
    assert_eq!(cache.get::<u32>("user:0").await, None);
    lru.clear().await;
}
