//! Invalidation events exchanged between instances over pub/sub.
//!
//! Wire format (UTF-8 JSON):
//!
//! ```text
//! {"type":"invalidate","key":"user:42","source":"web-1-4711"}
//! {"type":"invalidate-pattern","pattern":"user:*","source":"web-1-4711"}
//! {"type":"invalidate-tags","tags":["user-list"],"source":"web-1-4711"}
//! ```
//!
//! Keys and patterns are logical (without the namespace prefix); each
//! receiver applies its own prefix. Unknown fields are ignored.

use serde::{Deserialize, Serialize};

/// What to invalidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InvalidationAction {
    Invalidate { key: String },
    InvalidatePattern { pattern: String },
    InvalidateTags { tags: Vec<String> },
}

impl InvalidationAction {
    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invalidate { .. } => "invalidate",
            Self::InvalidatePattern { .. } => "invalidate-pattern",
            Self::InvalidateTags { .. } => "invalidate-tags",
        }
    }
}

/// An invalidation broadcast by one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    #[serde(flatten)]
    pub action: InvalidationAction,
    /// Identity of the emitting instance.
    pub source: String,
}

impl InvalidationEvent {
    pub fn new(action: InvalidationAction, source: impl Into<String>) -> Self {
        Self {
            action,
            source: source.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Identity of this process: `{hostname}-{pid}`.
///
/// The host part comes from `HOSTNAME`, then the OS host name, else `local`.
pub fn default_instance_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
        })
        .unwrap_or_else(|| "local".to_string());
    format!("{host}-{}", std::process::id())
}
