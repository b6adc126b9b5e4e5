//! Eviction strategies.
//!
//! Every strategy speaks JSON values over a [`KeyValueStore`] and exposes the
//! same seven operations, so the manager can be configured with either one
//! at construction time.
//!
//! ## Failure contract
//!
//! | Operation        | Store failure                         |
//! |------------------|---------------------------------------|
//! | `get`            | logged, reported as a miss            |
//! | `set`            | logged, propagated                    |
//! | `delete`         | logged, propagated                    |
//! | `delete_pattern` | logged, propagated                    |
//! | `exists`         | logged, reported as `false`           |
//! | `expire`         | logged, reported as `false`           |
//! | `ttl`            | logged, reported as [`TtlStatus::Missing`] |

use std::sync::Arc;

use async_trait::async_trait;
use meshcache_store::DynStore;
use serde_json::Value;

use crate::config::{CacheConfig, StrategyKind};
use crate::error::CacheResult;

pub mod lru;
pub mod ttl;

pub use lru::{LruStats, LruStrategy};
pub use ttl::TtlStrategy;

/// Remaining lifetime of a key, as reported by `TTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// Expires in the given number of seconds.
    Expires(u64),
    /// Exists without an expiry.
    Persistent,
    /// Does not exist (or could not be checked).
    Missing,
}

impl TtlStatus {
    /// Interprets a raw `TTL` reply.
    pub fn from_reply(reply: i64) -> Self {
        match reply {
            -1 => Self::Persistent,
            r if r < 0 => Self::Missing,
            r => Self::Expires(r as u64),
        }
    }

    /// Seconds remaining, or the Redis sentinels `-1` / `-2`.
    pub fn as_seconds(self) -> i64 {
        match self {
            Self::Expires(secs) => secs as i64,
            Self::Persistent => -1,
            Self::Missing => -2,
        }
    }
}

/// Uniform contract over eviction policies.
#[async_trait]
pub trait CacheStrategy: Send + Sync {
    /// Reads and parses a value. Store or parse failures are misses.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Serializes and writes a value, with expiry when `ttl_secs` is set.
    async fn set(&self, key: &str, value: &Value, ttl_secs: Option<u64>) -> CacheResult<()>;

    /// Deletes a key. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Deletes every key matching a glob pattern, found with cursor scans.
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    async fn exists(&self, key: &str) -> bool;

    /// Sets a new expiry. Returns `true` if the key existed.
    async fn expire(&self, key: &str, ttl_secs: u64) -> bool;

    async fn ttl(&self, key: &str) -> TtlStatus;

    /// Strategy name for logs.
    fn name(&self) -> &'static str;
}

/// Shareable strategy instance.
pub type DynStrategy = Arc<dyn CacheStrategy>;

/// Builds the strategy selected by configuration.
pub fn build_strategy(config: &CacheConfig, store: DynStore) -> DynStrategy {
    match config.strategy {
        StrategyKind::Ttl => Arc::new(TtlStrategy::new(store)),
        StrategyKind::Lru => Arc::new(LruStrategy::new(
            store,
            config.lru.max_entries,
            config.lru.default_ttl_secs,
            config.lru.index_key.clone(),
        )),
    }
}

/// Parses a stored payload, logging and discarding anything unparsable.
pub(crate) fn parse_stored(key: &str, raw: &str) -> Option<Value> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Discarding unparsable cached value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_status_from_reply() {
        assert_eq!(TtlStatus::from_reply(42), TtlStatus::Expires(42));
        assert_eq!(TtlStatus::from_reply(-1), TtlStatus::Persistent);
        assert_eq!(TtlStatus::from_reply(-2), TtlStatus::Missing);
        assert_eq!(TtlStatus::Missing.as_seconds(), -2);
        assert_eq!(TtlStatus::Expires(7).as_seconds(), 7);
    }

    #[test]
    fn test_build_strategy_follows_config() {
        let store: DynStore = Arc::new(meshcache_store::MemoryStore::new());
        let mut config = CacheConfig::default();
        assert_eq!(build_strategy(&config, store.clone()).name(), "ttl");
        config.strategy = StrategyKind::Lru;
        assert_eq!(build_strategy(&config, store).name(), "lru");
    }
}
