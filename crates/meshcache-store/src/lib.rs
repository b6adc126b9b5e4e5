//! # meshcache-store
//!
//! Key-value store layer for the meshcache coordination layer.
//!
//! The [`KeyValueStore`] trait is the Redis command subset the cache needs:
//! strings with expiry, cursor scans, sorted sets and pub/sub. Two backends
//! implement it:
//!
//! - [`RedisStore`]: shared store for multi-instance deployments, with
//!   separate data, publisher and subscriber connections
//! - [`MemoryStore`]: in-process store with the same semantics, used for
//!   single-instance mode and tests
//!
//! ## Example
//!
//! ```ignore
//! use meshcache_store::{KeyValueStore, RedisConfig, RedisStore};
//!
//! let store = RedisStore::connect(&RedisConfig::default()).await?;
//! store.set_ex("app:user:42", r#"{"name":"Ada"}"#, 300).await?;
//! let keys = store.scan_all("app:user:*").await?;
//! ```

mod error;
pub mod glob;
pub mod memory;
pub mod redis_store;
mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::{RedisConfig, RedisStore};
pub use traits::{DEFAULT_SCAN_COUNT, KeyValueStore, MessageStream};

/// Type alias for a shareable store instance.
pub type DynStore = std::sync::Arc<dyn KeyValueStore>;
