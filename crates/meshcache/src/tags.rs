//! Tag → keys index used for group invalidation.
//!
//! In local mode the index only knows keys this instance wrote itself; a key
//! tagged by another instance is removed only when that instance handles the
//! broadcast tag event against its own index. Shared mode keeps one sorted
//! set per tag in the store so every instance sees every membership.

use std::collections::HashSet;

use dashmap::DashMap;
use meshcache_store::DynStore;
use time::OffsetDateTime;

use crate::config::TagIndexMode;

pub(crate) enum TagIndex {
    Local(DashMap<String, HashSet<String>>),
    Shared { store: DynStore, prefix: String },
}

impl TagIndex {
    pub(crate) fn new(mode: TagIndexMode, store: DynStore, key_prefix: &str) -> Self {
        match mode {
            TagIndexMode::Local => Self::Local(DashMap::new()),
            TagIndexMode::Shared => Self::Shared {
                store,
                prefix: format!("{key_prefix}__tags:"),
            },
        }
    }

    pub(crate) fn mode(&self) -> TagIndexMode {
        match self {
            Self::Local(_) => TagIndexMode::Local,
            Self::Shared { .. } => TagIndexMode::Shared,
        }
    }

    /// Records `full_key` under every tag.
    pub(crate) async fn add(&self, full_key: &str, tags: &[String]) {
        match self {
            Self::Local(index) => {
                for tag in tags {
                    index
                        .entry(tag.clone())
                        .or_default()
                        .insert(full_key.to_string());
                }
            }
            Self::Shared { store, prefix } => {
                let score = OffsetDateTime::now_utc().unix_timestamp() as f64;
                for tag in tags {
                    let tag_key = format!("{prefix}{tag}");
                    if let Err(e) = store.zadd(&tag_key, full_key, score).await {
                        tracing::warn!(tag = %tag, key = %full_key, error = %e, "Failed to record tag membership");
                    }
                }
            }
        }
    }

    /// Removes the tag entry and returns the keys it held.
    pub(crate) async fn take(&self, tag: &str) -> Vec<String> {
        match self {
            Self::Local(index) => index
                .remove(tag)
                .map(|(_, keys)| keys.into_iter().collect())
                .unwrap_or_default(),
            Self::Shared { store, prefix } => {
                let tag_key = format!("{prefix}{tag}");
                let keys = match store.zrange(&tag_key, 0, -1).await {
                    Ok(keys) => keys,
                    Err(e) => {
                        tracing::warn!(tag = %tag, error = %e, "Failed to read shared tag index");
                        return Vec::new();
                    }
                };
                if let Err(e) = store.del(&[tag_key]).await {
                    tracing::warn!(tag = %tag, error = %e, "Failed to drop shared tag entry");
                }
                keys
            }
        }
    }

    /// Keys currently recorded under `tag`.
    pub(crate) async fn keys(&self, tag: &str) -> Vec<String> {
        let mut keys = match self {
            Self::Local(index) => index
                .get(tag)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default(),
            Self::Shared { store, prefix } => store
                .zrange(&format!("{prefix}{tag}"), 0, -1)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(tag = %tag, error = %e, "Failed to read shared tag index");
                    Vec::new()
                }),
        };
        keys.sort_unstable();
        keys
    }

    pub(crate) async fn clear(&self) {
        match self {
            Self::Local(index) => index.clear(),
            Self::Shared { store, prefix } => {
                let cleared = match store.scan_all(&format!("{prefix}*")).await {
                    Ok(tag_keys) => store.del(&tag_keys).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = cleared {
                    tracing::warn!(error = %e, "Failed to clear shared tag index");
                }
            }
        }
    }
}
