//! Cross-instance invalidation through the shared pub/sub channel.
//!
//! Each "instance" is its own `CacheManager` over a clone of one
//! `MemoryStore`, which behaves like separate connections to one server.

use std::sync::Arc;
use std::time::Duration;

use meshcache::{CacheManager, CacheService, InvalidationStats, SetOptions, TagIndexMode};
use meshcache_store::{KeyValueStore, MemoryStore};

fn instance(store: &MemoryStore, id: &str) -> Arc<CacheManager> {
    Arc::new(
        CacheManager::builder(Arc::new(store.clone()))
            .with_prefix("app:")
            .with_instance_id(id)
            .build(),
    )
}

async fn started(store: &MemoryStore, id: &str) -> Arc<CacheManager> {
    let manager = instance(store, id);
    manager.start_listener().await.unwrap();
    manager
}

/// Waits until the listener has processed `expected` events.
async fn wait_for_stats(manager: &CacheManager, expected: InvalidationStats) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.invalidation_stats() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {expected:?}, got {:?}",
            manager.invalidation_stats()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_key_invalidation_reaches_other_instances() {
    let store = MemoryStore::new();
    let a = started(&store, "a").await;
    let b = started(&store, "b").await;

    a.set("user:1", &"Ada", &SetOptions::new()).await.unwrap();
    assert_eq!(b.get::<String>("user:1").await.as_deref(), Some("Ada"));

    assert!(a.invalidate("user:1", true).await);

    wait_for_stats(
        &b,
        InvalidationStats {
            applied: 1,
            ..Default::default()
        },
    )
    .await;
    wait_for_stats(
        &a,
        InvalidationStats {
            ignored_own: 1,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(b.get::<String>("user:1").await, None);
}

#[tokio::test]
async fn test_pattern_event_uses_receiver_prefix() {
    let store = MemoryStore::new();
    let a = started(&store, "a").await;
    // Same channel, different namespace.
    let b = Arc::new(
        CacheManager::builder(Arc::new(store.clone()))
            .with_prefix("other:")
            .with_instance_id("b")
            .build(),
    );
    b.start_listener().await.unwrap();

    a.set("user:1", &1, &SetOptions::new()).await.unwrap();
    b.set("user:1", &1, &SetOptions::new()).await.unwrap();
    b.set("order:1", &1, &SetOptions::new()).await.unwrap();

    assert_eq!(a.invalidate_pattern("user:*", true).await, 1);
    wait_for_stats(
        &b,
        InvalidationStats {
            applied: 1,
            ..Default::default()
        },
    )
    .await;

    assert!(!store.exists("other:user:1").await.unwrap());
    assert!(store.exists("other:order:1").await.unwrap());
}

#[tokio::test]
async fn test_remember_then_tag_invalidation_scenario() {
    let store = MemoryStore::new();
    let a = CacheService::new(started(&store, "a").await);
    let b = started(&store, "b").await;

    let user: Result<String, String> = a
        .remember(
            "user:42",
            || async { Ok("Ada".to_string()) },
            &SetOptions::new().tag("user-list"),
        )
        .await;
    assert_eq!(user.as_deref(), Ok("Ada"));

    // B tags an unrelated key under the same tag in its own index.
    b.set("user:43", &"Grace", &SetOptions::new().tag("user-list"))
        .await
        .unwrap();

    assert_eq!(a.invalidate_by_tags(&["user-list".into()]).await, 1);
    assert_eq!(a.get::<String>("user:42").await, None);

    wait_for_stats(
        &b,
        InvalidationStats {
            applied: 1,
            ..Default::default()
        },
    )
    .await;
    // B resolved the tag against its own index.
    assert_eq!(b.get::<String>("user:43").await, None);
    assert!(b.tagged_keys("user-list").await.is_empty());
}

#[tokio::test]
async fn test_local_tag_index_only_knows_own_keys() {
    let store = MemoryStore::new();
    let a = instance(&store, "a");
    let b = instance(&store, "b");

    b.set("user:7", &7, &SetOptions::new().tag("user-list"))
        .await
        .unwrap();

    // No listener on B: A's tag call cannot reach B's key.
    assert_eq!(a.invalidate_by_tags(&["user-list".into()], true).await, 0);
    assert!(b.exists("user:7").await);
    assert_eq!(b.tag_index_mode(), TagIndexMode::Local);
}

#[tokio::test]
async fn test_listener_survives_malformed_events() {
    let store = MemoryStore::new();
    let a = started(&store, "a").await;
    a.set("k", &1, &SetOptions::new()).await.unwrap();

    store.publish("cache:invalidation", "not json").await.unwrap();
    store
        .publish("cache:invalidation", r#"{"type":"unknown","source":"x"}"#)
        .await
        .unwrap();
    store
        .publish(
            "cache:invalidation",
            r#"{"type":"invalidate","key":"k","source":"x"}"#,
        )
        .await
        .unwrap();

    wait_for_stats(
        &a,
        InvalidationStats {
            applied: 1,
            ignored_own: 0,
            malformed: 2,
        },
    )
    .await;
    assert!(!a.exists("k").await);
}

#[tokio::test]
async fn test_other_channels_are_ignored() {
    let store = MemoryStore::new();
    let a = started(&store, "a").await;
    a.set("k", &1, &SetOptions::new()).await.unwrap();

    store
        .publish("elsewhere", r#"{"type":"invalidate","key":"k","source":"x"}"#)
        .await
        .unwrap();
    store
        .publish(
            "cache:invalidation",
            r#"{"type":"invalidate","key":"missing","source":"x"}"#,
        )
        .await
        .unwrap();

    wait_for_stats(
        &a,
        InvalidationStats {
            applied: 1,
            ..Default::default()
        },
    )
    .await;
    assert!(a.exists("k").await);
}

#[tokio::test]
async fn test_flush_propagates() {
    let store = MemoryStore::new();
    let a = started(&store, "a").await;
    let b = started(&store, "b").await;

    a.set("x", &1, &SetOptions::new()).await.unwrap();
    b.set("y", &2, &SetOptions::new().tag("t")).await.unwrap();

    assert_eq!(a.flush().await, 2);
    wait_for_stats(
        &b,
        InvalidationStats {
            applied: 1,
            ..Default::default()
        },
    )
    .await;
    assert!(!b.exists("y").await);
}

#[tokio::test]
async fn test_listener_stops_when_manager_dropped() {
    let store = MemoryStore::new();
    let a = instance(&store, "a");
    let handle = a.start_listener().await.unwrap();
    drop(a);

    store
        .publish(
            "cache:invalidation",
            r#"{"type":"invalidate","key":"k","source":"x"}"#,
        )
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("listener should stop")
        .unwrap();
}
