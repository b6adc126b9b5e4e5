//! In-process store implementing the same protocol as Redis.
//!
//! Used for single-instance deployments (Redis disabled or unreachable) and
//! throughout the test suite. Clones of a [`MemoryStore`] share state, so
//! several cache instances built over clones of one store behave like
//! separate processes connected to the same server: they see the same
//! keyspace and the same pub/sub channels.
//!
//! Expiry is measured on the tokio clock, which lets tests pause and advance
//! time instead of sleeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::error::{StoreError, StoreResult};
use crate::glob::GlobPattern;
use crate::traits::{KeyValueStore, MessageStream};

const PUBSUB_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    ZSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// Returns the live entry for `key`, dropping it first if it has expired.
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, e| !e.is_expired(now));
    }

    fn zset(&mut self, key: &str, now: Instant) -> StoreResult<Option<&mut HashMap<String, f64>>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::ZSet(members),
                ..
            }) => Ok(Some(members)),
            Some(_) => Err(wrong_type()),
        }
    }

    fn sorted_members(&mut self, key: &str, now: Instant) -> StoreResult<Vec<(String, f64)>> {
        let Some(members) = self.zset(key, now)? else {
            return Ok(Vec::new());
        };
        let mut sorted: Vec<(String, f64)> =
            members.iter().map(|(m, s)| (m.clone(), *s)).collect();
        sorted.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(sorted)
    }
}

struct Inner {
    keyspace: Mutex<Keyspace>,
    pubsub: broadcast::Sender<(String, String)>,
    unavailable: AtomicBool,
}

/// In-memory key-value store with Redis semantics.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (pubsub, _) = broadcast::channel(PUBSUB_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                keyspace: Mutex::new(Keyspace::default()),
                pubsub,
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Simulates an outage: while set, every command fails with a
    /// connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live keys of any type.
    pub fn len(&self) -> usize {
        let mut keyspace = self.inner.keyspace.lock();
        keyspace.purge_expired(Instant::now());
        keyspace.entries.len()
    }

    /// Returns `true` if the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> StoreResult<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::connection("memory store unavailable"));
        }
        Ok(())
    }

    fn insert_string(&self, key: &str, value: &str, expires_at: Option<Instant>) {
        self.inner.keyspace.lock().entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at,
            },
        );
    }
}

fn wrong_type() -> StoreError {
    StoreError::command("WRONGTYPE Operation against a key holding the wrong kind of value")
}

/// Resolves Redis-style inclusive range indices against a length.
fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        let mut keyspace = self.inner.keyspace.lock();
        match keyspace.live(key, Instant::now()) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        self.insert_string(key, value, None);
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.check()?;
        if ttl_secs == 0 {
            return Err(StoreError::command("ERR invalid expire time in 'setex' command"));
        }
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
        self.insert_string(key, value, Some(expires_at));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.check()?;
        let now = Instant::now();
        let mut keyspace = self.inner.keyspace.lock();
        let mut removed = 0;
        for key in keys {
            if keyspace.live(key, now).is_some() {
                keyspace.entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self
            .inner
            .keyspace
            .lock()
            .live(key, Instant::now())
            .is_some())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool> {
        self.check()?;
        let now = Instant::now();
        let mut keyspace = self.inner.keyspace.lock();
        if keyspace.live(key, now).is_none() {
            return Ok(false);
        }
        if ttl_secs == 0 {
            keyspace.entries.remove(key);
        } else if let Some(entry) = keyspace.entries.get_mut(key) {
            entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
        }
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        self.check()?;
        let now = Instant::now();
        let mut keyspace = self.inner.keyspace.lock();
        Ok(match keyspace.live(key, now) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(now);
                ((remaining.as_millis() + 500) / 1000) as i64
            }
        })
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> StoreResult<(u64, Vec<String>)> {
        self.check()?;
        let glob = GlobPattern::new(pattern)
            .map_err(|e| StoreError::command(format!("invalid pattern {pattern}: {e}")))?;

        let mut keys: Vec<String> = {
            let mut keyspace = self.inner.keyspace.lock();
            keyspace.purge_expired(Instant::now());
            keyspace.entries.keys().cloned().collect()
        };
        keys.sort_unstable();

        let start = cursor as usize;
        let end = start.saturating_add(count.max(1)).min(keys.len());
        let batch = keys
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .filter(|k| glob.matches(k))
            .cloned()
            .collect();
        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, batch))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.check()?;
        let now = Instant::now();
        let mut keyspace = self.inner.keyspace.lock();
        match keyspace.zset(key, now)? {
            Some(members) => {
                members.insert(member.to_string(), score);
            }
            None => {
                keyspace.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::ZSet(HashMap::from([(member.to_string(), score)])),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> StoreResult<u64> {
        self.check()?;
        let now = Instant::now();
        let mut keyspace = self.inner.keyspace.lock();
        let Some(set) = keyspace.zset(key, now)? else {
            return Ok(0);
        };
        let removed = members.iter().filter(|m| set.remove(*m).is_some()).count() as u64;
        if set.is_empty() {
            keyspace.entries.remove(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.check()?;
        let mut keyspace = self.inner.keyspace.lock();
        Ok(keyspace
            .zset(key, Instant::now())?
            .map_or(0, |set| set.len() as u64))
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.check()?;
        let mut keyspace = self.inner.keyspace.lock();
        Ok(keyspace
            .zset(key, Instant::now())?
            .and_then(|set| set.get(member).copied()))
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        Ok(self
            .zrange_withscores(key, start, stop)
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect())
    }

    async fn zrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> StoreResult<Vec<(String, f64)>> {
        self.check()?;
        let sorted = self
            .inner
            .keyspace
            .lock()
            .sorted_members(key, Instant::now())?;
        Ok(match resolve_range(sorted.len(), start, stop) {
            Some((from, to)) => sorted[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        self.check()?;
        let sorted = self
            .inner
            .keyspace
            .lock()
            .sorted_members(key, Instant::now())?;
        Ok(sorted
            .into_iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .map(|(member, _)| member)
            .collect())
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64> {
        self.check()?;
        // A send error only means nobody is subscribed.
        let receivers = self
            .inner
            .pubsub
            .send((channel.to_string(), payload.to_string()))
            .unwrap_or(0);
        Ok(receivers as u64)
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        self.check()
            .map_err(|e| StoreError::subscribe(channel, e.to_string()))?;
        let wanted = channel.to_string();
        let stream = BroadcastStream::new(self.inner.pubsub.subscribe()).filter_map(move |item| {
            let wanted = wanted.clone();
            async move {
                match item {
                    Ok((channel, payload)) if channel == wanted => Some(payload),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %wanted, skipped, "memory subscriber lagged, messages dropped");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
