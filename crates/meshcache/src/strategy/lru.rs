//! Bounded strategy with approximate least-recently-used eviction.
//!
//! Recency lives in the store as a sorted set (`index_key`) mapping each key
//! to its last access time. Reads and writes refresh the score; when the set
//! reaches `max_entries`, the oldest tenth (at least one) is evicted in one
//! batch before the next insert.
//!
//! The cardinality check and the insert are separate round-trips, so
//! concurrent writers can push the index slightly past the bound. The bound
//! is soft.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use meshcache_store::{DynStore, StoreResult};
use serde_json::Value;
use time::OffsetDateTime;

use super::{CacheStrategy, TtlStatus, parse_stored};
use crate::error::CacheResult;

/// Snapshot of the access index.
#[derive(Debug, Clone, PartialEq)]
pub struct LruStats {
    pub size: u64,
    pub max_size: u64,
    pub utilization_percent: f64,
    pub oldest_access: Option<OffsetDateTime>,
    pub newest_access: Option<OffsetDateTime>,
}

pub struct LruStrategy {
    store: DynStore,
    max_entries: u64,
    default_ttl_secs: Option<u64>,
    index_key: String,
    // Last issued score (µs since epoch); keeps scores strictly increasing.
    last_score: AtomicU64,
}

impl LruStrategy {
    pub fn new(
        store: DynStore,
        max_entries: u64,
        default_ttl_secs: Option<u64>,
        index_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            max_entries: max_entries.max(1),
            default_ttl_secs,
            index_key: index_key.into(),
            last_score: AtomicU64::new(0),
        }
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    pub fn index_key(&self) -> &str {
        &self.index_key
    }

    /// Number of entries evicted per batch: 10% of the bound, at least one.
    pub fn eviction_batch(&self) -> u64 {
        (self.max_entries / 10).max(1)
    }

    fn next_score(&self) -> u64 {
        let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as u64;
        let previous = self
            .last_score
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }

    async fn touch(&self, key: &str) -> StoreResult<()> {
        let score = self.next_score() as f64;
        self.store.zadd(&self.index_key, key, score).await
    }

    async fn evict_if_needed(&self) {
        let size = match self.store.zcard(&self.index_key).await {
            Ok(size) => size,
            Err(e) => {
                tracing::error!(error = %e, "Error during LRU eviction");
                return;
            }
        };
        if size < self.max_entries {
            return;
        }

        let batch = self.eviction_batch() as isize;
        let victims = match self.store.zrange(&self.index_key, 0, batch - 1).await {
            Ok(victims) if !victims.is_empty() => victims,
            Ok(_) => return,
            Err(e) => {
                tracing::error!(error = %e, "Error during LRU eviction");
                return;
            }
        };

        if let Err(e) = self.store.del(&victims).await {
            tracing::error!(error = %e, "Error during LRU eviction");
            return;
        }
        if let Err(e) = self.store.zrem(&self.index_key, &victims).await {
            tracing::error!(error = %e, "Error removing evicted keys from LRU index");
            return;
        }

        crate::metrics::record_lru_evictions(victims.len() as u64);
        tracing::debug!(evicted = victims.len(), size, "LRU evicted keys");
    }

    /// Number of indexed entries.
    pub async fn size(&self) -> u64 {
        self.store.zcard(&self.index_key).await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Error getting LRU cache size");
            0
        })
    }

    /// Deletes every indexed entry and the index itself. Returns the number
    /// of indexed keys.
    pub async fn clear(&self) -> u64 {
        let keys = match self.store.zrange(&self.index_key, 0, -1).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(error = %e, "Error cleaning up LRU cache");
                return 0;
            }
        };
        if keys.is_empty() {
            return 0;
        }

        let mut doomed = keys.clone();
        doomed.push(self.index_key.clone());
        if let Err(e) = self.store.del(&doomed).await {
            tracing::error!(error = %e, "Error cleaning up LRU cache");
            return 0;
        }

        tracing::info!(removed = keys.len(), "LRU cache cleared");
        keys.len() as u64
    }

    pub async fn stats(&self) -> LruStats {
        let size = self.size().await;
        let (mut oldest_access, mut newest_access) = (None, None);

        if size > 0 {
            oldest_access = self.access_time_at(0).await;
            newest_access = self.access_time_at(-1).await;
        }

        LruStats {
            size,
            max_size: self.max_entries,
            utilization_percent: size as f64 / self.max_entries as f64 * 100.0,
            oldest_access,
            newest_access,
        }
    }

    async fn access_time_at(&self, index: isize) -> Option<OffsetDateTime> {
        let entries = self
            .store
            .zrange_withscores(&self.index_key, index, index)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Error getting LRU stats"))
            .ok()?;
        let (_, score) = entries.into_iter().next()?;
        OffsetDateTime::from_unix_timestamp_nanos(score as i128 * 1_000).ok()
    }
}

#[async_trait]
impl CacheStrategy for LruStrategy {
    async fn get(&self, key: &str) -> Option<Value> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Error getting LRU cache key");
                return None;
            }
        };
        let value = parse_stored(key, &raw)?;

        if let Err(e) = self.touch(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to refresh LRU access time");
        }
        Some(value)
    }

    async fn set(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> CacheResult<()> {
        self.evict_if_needed().await;

        let serialized = serde_json::to_string(value)?;
        let ttl = ttl_secs.filter(|t| *t > 0).or(self.default_ttl_secs);

        let written = match ttl {
            Some(ttl) if ttl > 0 => self.store.set_ex(key, &serialized, ttl).await,
            _ => self.store.set(key, &serialized).await,
        };
        let result = match written {
            Ok(()) => self.touch(key).await,
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            tracing::error!(key = %key, error = %e, "Error setting LRU cache key");
            e.into()
        })
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let members = [key.to_string()];
        let (deleted, unindexed) = tokio::join!(
            self.store.del(&members),
            self.store.zrem(&self.index_key, &members),
        );
        if let Err(e) = unindexed {
            tracing::warn!(key = %key, error = %e, "Failed to remove key from LRU index");
        }
        match deleted {
            Ok(removed) => Ok(removed > 0),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Error deleting LRU cache key");
                Err(e.into())
            }
        }
    }

    /// Only keys tracked by this strategy's index are deleted.
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let result = async {
            let mut keys = Vec::new();
            for key in self.store.scan_all(pattern).await? {
                if self.store.zscore(&self.index_key, &key).await?.is_some() {
                    keys.push(key);
                }
            }
            if keys.is_empty() {
                return Ok(0);
            }
            let removed = self.store.del(&keys).await?;
            self.store.zrem(&self.index_key, &keys).await?;
            Ok::<u64, meshcache_store::StoreError>(removed)
        }
        .await;

        result.map_err(|e| {
            tracing::error!(pattern = %pattern, error = %e, "Error deleting LRU pattern");
            e.into()
        })
    }

    async fn exists(&self, key: &str) -> bool {
        self.store.exists(key).await.unwrap_or_else(|e| {
            tracing::error!(key = %key, error = %e, "Error checking existence of LRU key");
            false
        })
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> bool {
        match self.store.expire(key, ttl_secs).await {
            Ok(true) => {
                if let Err(e) = self.touch(key).await {
                    tracing::warn!(key = %key, error = %e, "Failed to refresh LRU access time");
                }
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Error setting expiration for LRU key");
                false
            }
        }
    }

    async fn ttl(&self, key: &str) -> TtlStatus {
        match self.store.ttl(key).await {
            Ok(reply) => TtlStatus::from_reply(reply),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Error getting TTL for LRU key");
                TtlStatus::Missing
            }
        }
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}
