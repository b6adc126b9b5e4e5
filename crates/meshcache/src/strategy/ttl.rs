//! Expiry-only strategy: entries live until their TTL runs out or they are
//! deleted. No size bound.

use async_trait::async_trait;
use meshcache_store::DynStore;
use serde_json::Value;

use super::{CacheStrategy, TtlStatus, parse_stored};
use crate::error::CacheResult;

pub struct TtlStrategy {
    store: DynStore,
}

impl TtlStrategy {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CacheStrategy for TtlStrategy {
    async fn get(&self, key: &str) -> Option<Value> {
        match self.store.get(key).await {
            Ok(Some(raw)) => parse_stored(key, &raw),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Error getting cache key");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> CacheResult<()> {
        let serialized = serde_json::to_string(value)?;
        let result = match ttl_secs {
            Some(ttl) if ttl > 0 => self.store.set_ex(key, &serialized, ttl).await,
            _ => self.store.set(key, &serialized).await,
        };
        result.map_err(|e| {
            tracing::error!(key = %key, error = %e, "Error setting cache key");
            e.into()
        })
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        match self.store.del(&[key.to_string()]).await {
            Ok(removed) => Ok(removed > 0),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Error deleting cache key");
                Err(e.into())
            }
        }
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let deleted = match self.store.scan_all(pattern).await {
            Ok(keys) => self.store.del(&keys).await,
            Err(e) => Err(e),
        };
        deleted.map_err(|e| {
            tracing::error!(pattern = %pattern, error = %e, "Error deleting pattern");
            e.into()
        })
    }

    async fn exists(&self, key: &str) -> bool {
        self.store.exists(key).await.unwrap_or_else(|e| {
            tracing::error!(key = %key, error = %e, "Error checking existence of key");
            false
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        self.store.expire(key, ttl_secs).await.unwrap_or_else(|e| {
            tracing::error!(key = %key, error = %e, "Error setting expiration for key");
            false
        })
    }

    async fn ttl(&self, key: &str) -> TtlStatus {
        match self.store.ttl(key).await {
            Ok(reply) => TtlStatus::from_reply(reply),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Error getting TTL for key");
                TtlStatus::Missing
            }
        }
    }

    fn name(&self) -> &'static str {
        "ttl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcache_store::{KeyValueStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn strategy() -> (MemoryStore, TtlStrategy) {
        let store = MemoryStore::new();
        let strategy = TtlStrategy::new(Arc::new(store.clone()));
        (store, strategy)
    }

    #[tokio::test]
    async fn test_round_trip_without_expiry() {
        let (_, strategy) = strategy();
        let values = [
            json!({"id": 42, "name": "Ada", "roles": ["admin"], "active": true}),
            json!([1, 2.5, "three", null]),
            json!("plain"),
            json!(0),
        ];
        for (i, value) in values.iter().enumerate() {
            let key = format!("k{i}");
            strategy.set(&key, value, None).await.unwrap();
            assert_eq!(strategy.get(&key).await.as_ref(), Some(value));
            assert_eq!(strategy.ttl(&key).await, TtlStatus::Persistent);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let (_, strategy) = strategy();
        strategy.set("session", &json!("v"), Some(1)).await.unwrap();
        assert!(strategy.exists("session").await);
        assert_eq!(strategy.ttl("session").await, TtlStatus::Expires(1));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(strategy.get("session").await, None);
        assert!(!strategy.exists("session").await);
        assert_eq!(strategy.ttl("session").await, TtlStatus::Missing);
    }

    #[tokio::test]
    async fn test_unparsable_value_is_a_miss() {
        let (store, strategy) = strategy();
        store.set("broken", "{not json").await.unwrap();
        assert_eq!(strategy.get("broken").await, None);
    }

    #[tokio::test]
    async fn test_delete_and_delete_pattern() {
        let (store, strategy) = strategy();
        for i in 0..5 {
            strategy.set(&format!("user:{i}"), &json!(i), None).await.unwrap();
        }
        strategy.set("order:1", &json!(1), None).await.unwrap();

        assert!(strategy.delete("user:0").await.unwrap());
        assert!(!strategy.delete("user:0").await.unwrap());
        assert_eq!(strategy.delete_pattern("user:*").await.unwrap(), 4);
        assert_eq!(strategy.delete_pattern("user:*").await.unwrap(), 0);
        assert!(store.exists("order:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_outage_reads_miss_writes_fail() {
        let (store, strategy) = strategy();
        strategy.set("k", &json!(1), None).await.unwrap();
        store.set_unavailable(true);

        assert_eq!(strategy.get("k").await, None);
        assert!(!strategy.exists("k").await);
        assert!(!strategy.expire("k", 10).await);
        assert_eq!(strategy.ttl("k").await, TtlStatus::Missing);
        assert!(strategy.set("k", &json!(2), None).await.is_err());
        assert!(strategy.delete("k").await.is_err());
        assert!(strategy.delete_pattern("*").await.is_err());
    }
}
