//! The store protocol consumed by the cache layer.
//!
//! The command set is the Redis subset the cache needs: string values with
//! optional expiry, cursor-based key scans, sorted sets and pub/sub.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::StoreResult;

/// Stream of raw payloads received on a subscribed channel.
///
/// The stream ends when the subscriber connection is closed.
pub type MessageStream = BoxStream<'static, String>;

/// Number of keys requested per `SCAN` round-trip.
pub const DEFAULT_SCAN_COUNT: usize = 100;

/// Contract every key-value store backend must implement.
///
/// Implementations must be thread-safe (`Send + Sync`) and are shared
/// behind an `Arc` by every component of an instance.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    // ==================== Strings ====================

    /// `GET key`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// `SET key value` without expiry.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// `SETEX key seconds value`, an atomic set-with-expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;

    /// `DEL key [key ...]`, returns the number of keys removed.
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    /// `EXISTS key`
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// `EXPIRE key seconds`, returns `true` if the timeout was set.
    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool>;

    /// `TTL key`: seconds remaining, `-1` without expiry, `-2` if missing.
    async fn ttl(&self, key: &str) -> StoreResult<i64>;

    // ==================== Keyspace ====================

    /// One `SCAN cursor MATCH pattern COUNT count` step.
    ///
    /// Returns the next cursor and the keys of this step. A returned cursor
    /// of `0` means the iteration is complete.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
    -> StoreResult<(u64, Vec<String>)>;

    /// Iterates the cursor to completion and collects every matching key.
    ///
    /// Keys may be reported more than once by the underlying scan; the
    /// result is deduplicated.
    async fn scan_all(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, batch) = self.scan(cursor, pattern, DEFAULT_SCAN_COUNT).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    // ==================== Sorted sets ====================

    /// `ZADD key score member`
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// `ZREM key member [member ...]`, returns the number of members removed.
    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<u64>;

    /// `ZCARD key`
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// `ZSCORE key member`
    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// `ZRANGE key start stop`, ordered by ascending score.
    ///
    /// Negative indices count from the end (`-1` is the highest score).
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    /// `ZRANGE key start stop WITHSCORES`
    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> StoreResult<Vec<(String, f64)>>;

    /// `ZRANGEBYSCORE key min max`, both bounds inclusive.
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>>;

    // ==================== Pub/Sub ====================

    /// `PUBLISH channel payload`, returns the number of receivers.
    ///
    /// Goes through the dedicated publisher connection.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64>;

    /// `SUBSCRIBE channel` on the dedicated subscriber connection.
    ///
    /// The subscription is active once this returns: anything published to
    /// `channel` afterwards is delivered on the stream.
    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream>;

    // ==================== Health ====================

    /// `PING`
    async fn ping(&self) -> StoreResult<()>;

    /// Short backend name for logs ("redis", "memory").
    fn backend_name(&self) -> &'static str;
}
