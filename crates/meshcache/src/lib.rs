//! # meshcache
//!
//! Cache coordination for horizontally scaled services sharing one Redis.
//!
//! Values live in the shared store under a namespace prefix. When any
//! instance invalidates data it deletes locally and publishes an event on a
//! shared channel; every other instance applies the same invalidation.
//!
//! ## Layers
//!
//! - [`strategy`]: TTL or bounded LRU eviction over a
//!   [`KeyValueStore`](meshcache_store::KeyValueStore)
//! - [`CacheManager`]: prefixes, tags, invalidation broadcast and receipt
//! - [`CacheService`]: key derivation and `remember`
//! - [`intercept`]: memoize, invalidate-around and write-through wrappers
//!
//! ## Example
//!
//! ```ignore
//! use meshcache::{SetOptions, config::loader, create_cache, create_store};
//!
//! let config = loader::load_config(None)?;
//! let store = create_store(&config.redis).await;
//! let cache = create_cache(&config, store).await?;
//!
//! let user: Result<User, AppError> = cache
//!     .remember("user:42", || fetch_user(42), &SetOptions::new().tag("user-list"))
//!     .await;
//! cache.invalidate_by_tags(&["user-list".into()]).await;
//! ```

pub mod config;
mod error;
pub mod events;
pub mod intercept;
pub mod manager;
pub mod metrics;
pub mod observability;
pub mod service;
pub mod strategy;
mod tags;

use std::sync::Arc;

use meshcache_store::{DynStore, MemoryStore, RedisStore};

pub use config::{AppConfig, CacheConfig, RedisConfig, StrategyKind, TagIndexMode};
pub use error::{CacheError, CacheResult};
pub use events::{InvalidationAction, InvalidationEvent};
pub use intercept::{CachedOutcome, InvalidateAround, InvalidateTiming, Memoize, WriteThrough};
pub use manager::{CacheManager, CacheManagerBuilder, InvalidationStats, SetOptions};
pub use service::{CacheArgs, CacheService};
pub use strategy::{CacheStrategy, LruStrategy, TtlStatus, TtlStrategy};

/// Create the store client based on configuration.
///
/// ## Store Modes
///
/// - **Redis disabled**: in-process [`MemoryStore`] (single instance only)
/// - **Redis enabled**: connects to Redis, falls back to memory on failure
///
/// ## Graceful Degradation
///
/// If the Redis connection fails the process keeps running against a
/// memory store; invalidations then stay local to this instance.
pub async fn create_store(config: &RedisConfig) -> DynStore {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-memory store");
        return Arc::new(MemoryStore::new());
    }

    match RedisStore::connect(config).await {
        Ok(store) => {
            tracing::info!(url = %config.redacted_url(), "✓ Connected to Redis successfully");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-memory store."
            );
            Arc::new(MemoryStore::new())
        }
    }
}

/// Builds strategy, manager and service from configuration and starts the
/// invalidation listener.
///
/// The listener stops by itself once every handle to the returned service
/// is dropped.
pub async fn create_cache(config: &AppConfig, store: DynStore) -> CacheResult<CacheService> {
    config.validate().map_err(CacheError::config)?;

    let manager = Arc::new(
        CacheManager::builder(store)
            .with_config(&config.cache)
            .build(),
    );
    manager.start_listener().await?;

    tracing::info!(
        strategy = manager.strategy().name(),
        prefix = %manager.prefix(),
        tag_index = ?manager.tag_index_mode(),
        instance_id = %manager.instance_id(),
        "Cache initialized"
    );
    Ok(CacheService::new(manager))
}
