//! Cache manager: namespacing, tags and cross-instance invalidation.
//!
//! ## How invalidation propagates
//!
//! ```text
//! Instance A: manager.invalidate("user:42")
//!   ├─ strategy.delete("cache:user:42")          (local state wins)
//!   └─ PUBLISH cache:invalidation {"type":"invalidate","key":"user:42","source":"A"}
//!                 │
//!   ┌─────────────┴──────────────┐
//!   ▼                            ▼
//! Instance A listener          Instance B listener
//! source == self → ignored     invalidate("user:42", broadcast = false)
//! ```
//!
//! Delivery is best-effort: a subscriber that is disconnected while an event
//! is published never sees it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use meshcache_store::{DynStore, MessageStream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::config::{CacheConfig, TagIndexMode};
use crate::error::CacheResult;
use crate::events::{InvalidationAction, InvalidationEvent, default_instance_id};
use crate::strategy::{DynStrategy, TtlStatus, build_strategy};
use crate::tags::TagIndex;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Options for [`CacheManager::set`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Expiry in seconds; `None` (or 0) falls back to the configured default.
    pub ttl_secs: Option<u64>,
    /// Tags to record the key under.
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, secs: u64) -> Self {
        self.ttl_secs = Some(secs);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Counters for inbound invalidation events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationStats {
    /// Events from other instances applied locally.
    pub applied: u64,
    /// Events emitted by this instance and dropped on receipt.
    pub ignored_own: u64,
    /// Payloads that could not be parsed.
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct EventCounters {
    applied: AtomicU64,
    ignored_own: AtomicU64,
    malformed: AtomicU64,
}

/// Coordination core shared by every cache user of an instance.
pub struct CacheManager {
    strategy: DynStrategy,
    store: DynStore,
    tags: TagIndex,
    prefix: String,
    default_ttl_secs: u64,
    instance_id: String,
    channel: String,
    counters: EventCounters,
}

impl CacheManager {
    /// Starts building a manager over `store` with default settings.
    pub fn builder(store: DynStore) -> CacheManagerBuilder {
        CacheManagerBuilder::new(store)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn strategy(&self) -> &DynStrategy {
        &self.strategy
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub fn tag_index_mode(&self) -> TagIndexMode {
        self.tags.mode()
    }

    pub fn invalidation_stats(&self) -> InvalidationStats {
        InvalidationStats {
            applied: self.counters.applied.load(Ordering::Relaxed),
            ignored_own: self.counters.ignored_own.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Reads a value. Missing, unreadable and mistyped entries are all misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.build_key(key);
        let Some(value) = self.strategy.get(&full_key).await else {
            tracing::debug!(key = %key, "Cache miss");
            crate::metrics::record_cache_miss();
            return None;
        };

        match serde_json::from_value(value) {
            Ok(typed) => {
                tracing::debug!(key = %key, "Cache hit");
                crate::metrics::record_cache_hit();
                Some(typed)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cached value has unexpected shape");
                crate::metrics::record_cache_miss();
                None
            }
        }
    }

    /// Writes a value and records it under the given tags.
    pub async fn set<T>(&self, key: &str, value: &T, options: &SetOptions) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        let full_key = self.build_key(key);
        let ttl = options
            .ttl_secs
            .filter(|t| *t > 0)
            .unwrap_or(self.default_ttl_secs);
        let value = serde_json::to_value(value)?;

        self.strategy
            .set(&full_key, &value, (ttl > 0).then_some(ttl))
            .await
            .inspect_err(|e| tracing::error!(key = %key, error = %e, "Failed to set cache"))?;

        if !options.tags.is_empty() {
            self.tags.add(&full_key, &options.tags).await;
        }

        tracing::debug!(key = %key, ttl_secs = ttl, tags = ?options.tags, "Cache set");
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.strategy.exists(&self.build_key(key)).await
    }

    pub async fn ttl(&self, key: &str) -> TtlStatus {
        self.strategy.ttl(&self.build_key(key)).await
    }

    pub async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        self.strategy.expire(&self.build_key(key), ttl_secs).await
    }

    /// Keys (fully qualified) this instance can see under `tag`.
    pub async fn tagged_keys(&self, tag: &str) -> Vec<String> {
        self.tags.keys(tag).await
    }

    /// Deletes one key; broadcasts only if something was deleted.
    pub async fn invalidate(&self, key: &str, broadcast: bool) -> bool {
        let full_key = self.build_key(key);
        let deleted = self.strategy.delete(&full_key).await.unwrap_or_else(|e| {
            tracing::warn!(key = %key, error = %e, "Cache invalidation failed");
            false
        });

        if deleted {
            crate::metrics::record_invalidation("invalidate", origin(broadcast), 1);
            if broadcast {
                self.broadcast(InvalidationAction::Invalidate {
                    key: key.to_string(),
                })
                .await;
            }
        }

        tracing::debug!(key = %key, deleted, "Cache invalidated for key");
        deleted
    }

    /// Deletes every key matching a logical glob pattern; broadcasts only if
    /// something was deleted.
    pub async fn invalidate_pattern(&self, pattern: &str, broadcast: bool) -> u64 {
        let full_pattern = self.build_key(pattern);
        let count = self
            .strategy
            .delete_pattern(&full_pattern)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(pattern = %pattern, error = %e, "Cache pattern invalidation failed");
                0
            });

        if count > 0 {
            crate::metrics::record_invalidation("invalidate-pattern", origin(broadcast), count);
            if broadcast {
                self.broadcast(InvalidationAction::InvalidatePattern {
                    pattern: pattern.to_string(),
                })
                .await;
            }
        }

        tracing::debug!(pattern = %pattern, count, "Cache invalidated keys for pattern");
        count
    }

    /// Deletes every key recorded under the tags, drops the tag entries and
    /// broadcasts one event carrying all of them.
    pub async fn invalidate_by_tags(&self, tags: &[String], broadcast: bool) -> u64 {
        let mut total = 0;
        for tag in tags {
            for key in self.tags.take(tag).await {
                match self.strategy.delete(&key).await {
                    Ok(true) => total += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(tag = %tag, key = %key, error = %e, "Tagged key invalidation failed");
                    }
                }
            }
        }

        crate::metrics::record_invalidation("invalidate-tags", origin(broadcast), total);
        if broadcast && !tags.is_empty() {
            self.broadcast(InvalidationAction::InvalidateTags {
                tags: tags.to_vec(),
            })
            .await;
        }

        tracing::debug!(tags = ?tags, count = total, "Cache invalidated keys for tags");
        total
    }

    /// Deletes everything under the namespace, tells other instances to do
    /// the same and forgets every tag.
    pub async fn flush(&self) -> u64 {
        let count = self.invalidate_pattern("*", true).await;
        self.tags.clear().await;
        tracing::info!(count, "Cache flushed");
        count
    }

    async fn broadcast(&self, action: InvalidationAction) {
        let event = InvalidationEvent::new(action, self.instance_id.clone());
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode invalidation event");
                return;
            }
        };

        match self.store.publish(&self.channel, &payload).await {
            Ok(receivers) => {
                tracing::debug!(kind = event.action.kind(), receivers, "Published cache invalidation");
            }
            Err(e) => {
                // Local deletion already happened and is kept.
                tracing::warn!(kind = event.action.kind(), error = %e, "Failed to publish cache invalidation");
            }
        }
    }

    /// Applies one raw payload received on the invalidation channel.
    ///
    /// Malformed payloads and events emitted by this instance are dropped.
    pub async fn handle_invalidation_message(&self, payload: &str) {
        let event = match InvalidationEvent::from_json(payload) {
            Ok(event) => event,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_event_received("malformed");
                tracing::warn!(error = %e, payload = %payload, "Dropping malformed cache invalidation event");
                return;
            }
        };

        if event.source == self.instance_id {
            self.counters.ignored_own.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_event_received("own");
            return;
        }

        tracing::debug!(kind = event.action.kind(), source = %event.source, "Handling cache invalidation event");
        match &event.action {
            InvalidationAction::Invalidate { key } => {
                self.invalidate(key, false).await;
            }
            InvalidationAction::InvalidatePattern { pattern } => {
                self.invalidate_pattern(pattern, false).await;
            }
            InvalidationAction::InvalidateTags { tags } => {
                self.invalidate_by_tags(tags, false).await;
            }
        }
        self.counters.applied.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_event_received("applied");
    }

    /// Subscribes to the invalidation channel and spawns the dispatch loop.
    ///
    /// The subscription is active when this returns. The loop resubscribes
    /// with exponential backoff if the subscription drops, and stops once
    /// the manager is dropped.
    pub async fn start_listener(self: &Arc<Self>) -> CacheResult<JoinHandle<()>> {
        let stream = self.store.subscribe(&self.channel).await?;
        tracing::info!(
            channel = %self.channel,
            instance_id = %self.instance_id,
            "Listening for cache invalidation events"
        );
        Ok(tokio::spawn(run_listener(
            Arc::downgrade(self),
            self.store.clone(),
            self.channel.clone(),
            stream,
        )))
    }
}

fn origin(broadcast: bool) -> &'static str {
    if broadcast { "local" } else { "remote" }
}

async fn run_listener(
    manager: Weak<CacheManager>,
    store: DynStore,
    channel: String,
    mut stream: MessageStream,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        while let Some(payload) = stream.next().await {
            let Some(manager) = manager.upgrade() else {
                tracing::debug!("Cache manager dropped, stopping invalidation listener");
                return;
            };
            manager.handle_invalidation_message(&payload).await;
            backoff = INITIAL_BACKOFF;
        }

        tracing::warn!(channel = %channel, "Invalidation subscription closed, resubscribing");
        loop {
            if manager.strong_count() == 0 {
                return;
            }
            tokio::time::sleep(backoff).await;
            match store.subscribe(&channel).await {
                Ok(resubscribed) => {
                    stream = resubscribed;
                    tracing::info!(channel = %channel, "Resubscribed to invalidation channel");
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "Invalidation listener error, reconnecting..."
                    );
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

/// Builder for [`CacheManager`].
pub struct CacheManagerBuilder {
    store: DynStore,
    strategy: Option<DynStrategy>,
    config: CacheConfig,
    instance_id: Option<String>,
}

impl CacheManagerBuilder {
    pub fn new(store: DynStore) -> Self {
        Self {
            store,
            strategy: None,
            config: CacheConfig::default(),
            instance_id: None,
        }
    }

    /// Takes prefix, default TTL, channel, tag mode and strategy from config.
    pub fn with_config(mut self, config: &CacheConfig) -> Self {
        self.config = config.clone();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, secs: u64) -> Self {
        self.config.default_ttl_secs = secs;
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.config.invalidation_channel = channel.into();
        self
    }

    pub fn with_tag_index(mut self, mode: TagIndexMode) -> Self {
        self.config.tag_index = mode;
        self
    }

    /// Overrides the strategy selected by configuration.
    pub fn with_strategy(mut self, strategy: DynStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Overrides the `{hostname}-{pid}` identity.
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn build(self) -> CacheManager {
        let strategy = self
            .strategy
            .unwrap_or_else(|| build_strategy(&self.config, self.store.clone()));
        let tags = TagIndex::new(
            self.config.tag_index,
            self.store.clone(),
            &self.config.key_prefix,
        );
        CacheManager {
            strategy,
            store: self.store,
            tags,
            prefix: self.config.key_prefix,
            default_ttl_secs: self.config.default_ttl_secs,
            instance_id: self.instance_id.unwrap_or_else(default_instance_id),
            channel: self.config.invalidation_channel,
            counters: EventCounters::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meshcache_store::{KeyValueStore, MemoryStore, MessageStream, StoreError, StoreResult};
    use serde_json::json;

    /// A memory store whose publisher connection is down.
    struct PublishDown(MemoryStore);

    #[async_trait]
    impl KeyValueStore for PublishDown {
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            self.0.get(key).await
        }
        async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            self.0.set(key, value).await
        }
        async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
            self.0.set_ex(key, value, ttl_secs).await
        }
        async fn del(&self, keys: &[String]) -> StoreResult<u64> {
            self.0.del(keys).await
        }
        async fn exists(&self, key: &str) -> StoreResult<bool> {
            self.0.exists(key).await
        }
        async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool> {
            self.0.expire(key, ttl_secs).await
        }
        async fn ttl(&self, key: &str) -> StoreResult<i64> {
            self.0.ttl(key).await
        }
        async fn scan(
            &self,
            cursor: u64,
            pattern: &str,
            count: usize,
        ) -> StoreResult<(u64, Vec<String>)> {
            self.0.scan(cursor, pattern, count).await
        }
        async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
            self.0.zadd(key, member, score).await
        }
        async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
            self.0.zrem(key, members).await
        }
        async fn zcard(&self, key: &str) -> StoreResult<u64> {
            self.0.zcard(key).await
        }
        async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
            self.0.zscore(key, member).await
        }
        async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
            self.0.zrange(key, start, stop).await
        }
        async fn zrange_withscores(
            &self,
            key: &str,
            start: isize,
            stop: isize,
        ) -> StoreResult<Vec<(String, f64)>> {
            self.0.zrange_withscores(key, start, stop).await
        }
        async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
            self.0.zrangebyscore(key, min, max).await
        }
        async fn publish(&self, _channel: &str, _payload: &str) -> StoreResult<u64> {
            Err(StoreError::Connection {
                message: "publisher connection closed".into(),
            })
        }
        async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
            self.0.subscribe(channel).await
        }
        async fn ping(&self) -> StoreResult<()> {
            self.0.ping().await
        }
        fn backend_name(&self) -> &'static str {
            "memory"
        }
    }

    fn manager(store: &MemoryStore, id: &str) -> CacheManager {
        CacheManager::builder(Arc::new(store.clone()))
            .with_prefix("app:")
            .with_default_ttl(0)
            .with_instance_id(id)
            .build()
    }

    #[tokio::test]
    async fn test_keys_are_namespaced() {
        let store = MemoryStore::new();
        let cache = manager(&store, "a");
        cache.set("user:1", &json!({"n": 1}), &SetOptions::new()).await.unwrap();

        assert!(store.exists("app:user:1").await.unwrap());
        assert_eq!(cache.get::<serde_json::Value>("user:1").await, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_default_ttl_applies() {
        let store = MemoryStore::new();
        let cache = CacheManager::builder(Arc::new(store.clone()))
            .with_default_ttl(300)
            .with_instance_id("a")
            .build();
        cache.set("k", &1, &SetOptions::new()).await.unwrap();
        cache.set("short", &1, &SetOptions::new().ttl(10)).await.unwrap();
        assert_eq!(cache.ttl("k").await, TtlStatus::Expires(300));
        assert_eq!(cache.ttl("short").await, TtlStatus::Expires(10));
    }

    #[tokio::test]
    async fn test_mistyped_value_is_a_miss() {
        let store = MemoryStore::new();
        let cache = manager(&store, "a");
        cache.set("k", "text", &SetOptions::new()).await.unwrap();
        assert_eq!(cache.get::<u32>("k").await, None);
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("text"));
    }

    #[tokio::test]
    async fn test_invalidate_publishes_only_when_deleted() {
        let store = MemoryStore::new();
        let cache = manager(&store, "a");
        let mut events = store.subscribe("cache:invalidation").await.unwrap();

        assert!(!cache.invalidate("missing", true).await);
        cache.set("k", &1, &SetOptions::new()).await.unwrap();
        assert!(cache.invalidate("k", true).await);

        let payload = events.next().await.unwrap();
        let event = InvalidationEvent::from_json(&payload).unwrap();
        assert_eq!(event.source, "a");
        assert_eq!(event.action, InvalidationAction::Invalidate { key: "k".into() });
    }

    #[tokio::test]
    async fn test_failed_delete_reports_false() {
        let store = MemoryStore::new();
        let cache = manager(&store, "a");
        cache.set("k", &1, &SetOptions::new()).await.unwrap();
        store.set_unavailable(true);

        assert!(!cache.invalidate("k", true).await);
        assert_eq!(cache.invalidate_pattern("*", true).await, 0);
        assert_eq!(cache.get::<i32>("k").await, None);
        assert!(cache.set("k", &2, &SetOptions::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_tags_group_keys() {
        let store = MemoryStore::new();
        let cache = manager(&store, "a");
        let listed = SetOptions::new().tag("user-list");
        cache.set("user:1", &1, &listed).await.unwrap();
        cache.set("user:2", &2, &listed.clone().tag("admins")).await.unwrap();
        cache.set("order:1", &3, &SetOptions::new()).await.unwrap();

        assert_eq!(
            cache.tagged_keys("user-list").await,
            vec!["app:user:1".to_string(), "app:user:2".to_string()]
        );
        assert_eq!(cache.invalidate_by_tags(&["user-list".into()], false).await, 2);
        assert!(cache.tagged_keys("user-list").await.is_empty());
        assert!(!cache.exists("user:1").await);
        assert!(cache.exists("order:1").await);
        // The other tag still points at the (now deleted) key.
        assert_eq!(cache.invalidate_by_tags(&["admins".into()], false).await, 0);
    }

    #[tokio::test]
    async fn test_flush_clears_namespace_and_tags() {
        let store = MemoryStore::new();
        let cache = manager(&store, "a");
        cache.set("a", &1, &SetOptions::new().tag("t")).await.unwrap();
        cache.set("b", &2, &SetOptions::new()).await.unwrap();
        store.set("other:key", "1").await.unwrap();

        assert_eq!(cache.flush().await, 2);
        assert!(cache.tagged_keys("t").await.is_empty());
        assert!(store.exists("other:key").await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_and_own_events_are_dropped() {
        let store = MemoryStore::new();
        let cache = manager(&store, "a");
        cache.set("k", &1, &SetOptions::new()).await.unwrap();

        cache.handle_invalidation_message("{oops").await;
        cache
            .handle_invalidation_message(r#"{"type":"invalidate","key":"k","source":"a"}"#)
            .await;
        assert!(cache.exists("k").await);

        cache
            .handle_invalidation_message(r#"{"type":"invalidate","key":"k","source":"b"}"#)
            .await;
        assert!(!cache.exists("k").await);
        assert_eq!(
            cache.invalidation_stats(),
            InvalidationStats {
                applied: 1,
                ignored_own: 1,
                malformed: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_shared_tag_index_is_visible_to_every_instance() {
        let store = MemoryStore::new();
        let build = |id: &str| {
            CacheManager::builder(Arc::new(store.clone()))
                .with_prefix("app:")
                .with_tag_index(TagIndexMode::Shared)
                .with_instance_id(id)
                .build()
        };
        let a = build("a");
        let b = build("b");

        b.set("user:7", &7, &SetOptions::new().tag("user-list")).await.unwrap();
        assert_eq!(a.tagged_keys("user-list").await, vec!["app:user:7".to_string()]);

        assert_eq!(a.invalidate_by_tags(&["user-list".into()], false).await, 1);
        assert!(!b.exists("user:7").await);
        assert!(b.tagged_keys("user-list").await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_local_deletes() {
        let store = MemoryStore::new();
        let cache = CacheManager::builder(Arc::new(PublishDown(store.clone())))
            .with_prefix("app:")
            .with_instance_id("a")
            .build();

        cache.set("user:1", &1, &SetOptions::new()).await.unwrap();
        cache.set("user:2", &2, &SetOptions::new()).await.unwrap();
        cache.set("order:1", &3, &SetOptions::new().tag("orders")).await.unwrap();

        assert!(cache.invalidate("user:1", true).await);
        assert!(!store.exists("app:user:1").await.unwrap());

        assert_eq!(cache.invalidate_pattern("user:*", true).await, 1);
        assert!(!store.exists("app:user:2").await.unwrap());

        assert_eq!(cache.invalidate_by_tags(&["orders".into()], true).await, 1);
        assert!(!store.exists("app:order:1").await.unwrap());
        assert!(cache.tagged_keys("orders").await.is_empty());
    }
}
