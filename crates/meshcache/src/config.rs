pub use meshcache_store::RedisConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Redis connection settings
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cache behaviour
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.redis.enabled {
            if self.redis.host.trim().is_empty() {
                return Err("redis.host must not be empty".into());
            }
            if self.redis.port == 0 {
                return Err("redis.port must be > 0".into());
            }
            if self.redis.db < 0 {
                return Err("redis.db must be >= 0".into());
            }
        }
        if self.cache.invalidation_channel.trim().is_empty() {
            return Err("cache.invalidation_channel must not be empty".into());
        }
        if self.cache.strategy == StrategyKind::Lru {
            if self.cache.lru.max_entries == 0 {
                return Err("cache.lru.max_entries must be > 0".into());
            }
            if self.cache.lru.index_key.trim().is_empty() {
                return Err("cache.lru.index_key must not be empty".into());
            }
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Eviction policy used by the cache manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Expiry-based, unbounded
    #[default]
    Ttl,
    /// Bounded entry count, least recently used evicted first
    Lru,
}

/// Where tag memberships are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TagIndexMode {
    /// Per-instance memory: a tag invalidation only reaches keys this
    /// instance tagged itself.
    #[default]
    Local,
    /// One sorted set per tag in the store, visible to every instance.
    Shared,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace prepended to every logical key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL applied when a write does not specify one (0 = no expiry)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default)]
    pub strategy: StrategyKind,

    #[serde(default)]
    pub tag_index: TagIndexMode,

    /// Pub/sub channel shared by every instance
    #[serde(default = "default_invalidation_channel")]
    pub invalidation_channel: String,

    #[serde(default)]
    pub lru: LruConfig,
}

fn default_key_prefix() -> String {
    "cache:".to_string()
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

fn default_invalidation_channel() -> String {
    "cache:invalidation".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            default_ttl_secs: default_ttl_secs(),
            strategy: StrategyKind::default(),
            tag_index: TagIndexMode::default(),
            invalidation_channel: default_invalidation_channel(),
            lru: LruConfig::default(),
        }
    }
}

/// LRU strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LruConfig {
    /// Soft bound on the number of indexed entries
    #[serde(default = "default_lru_max_entries")]
    pub max_entries: u64,

    /// TTL used when neither the caller nor `cache.default_ttl_secs` gives one
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,

    /// Sorted set holding the access-time index
    #[serde(default = "default_lru_index_key")]
    pub index_key: String,
}

fn default_lru_max_entries() -> u64 {
    10000
}

fn default_lru_index_key() -> String {
    "lru:access".to_string()
}

impl Default for LruConfig {
    fn default() -> Self {
        Self {
            max_entries: default_lru_max_entries(),
            default_ttl_secs: None,
            index_key: default_lru_index_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(format!("config file not found: {p}"));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from("meshcache.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., MESHCACHE__REDIS__PORT=6380
        builder = builder.add_source(
            Environment::with_prefix("MESHCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.key_prefix, "cache:");
        assert_eq!(config.cache.strategy, StrategyKind::Ttl);
        assert_eq!(config.cache.tag_index, TagIndexMode::Local);
        assert_eq!(config.cache.invalidation_channel, "cache:invalidation");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.cache.strategy = StrategyKind::Lru;
        config.cache.lru.max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.redis.port = 0;
        assert!(config.validate().is_err());
        config.redis.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[redis]
host = "cache.internal"
port = 6380
db = 2

[cache]
key_prefix = "shop:"
default_ttl_secs = 120
strategy = "lru"
tag_index = "shared"

[cache.lru]
max_entries = 500
"#
        )
        .unwrap();

        let config = loader::load_config(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.redis.host, "cache.internal");
        assert_eq!(config.redis.port, 6380);
        assert_eq!(config.redis.db, 2);
        assert_eq!(config.cache.key_prefix, "shop:");
        assert_eq!(config.cache.default_ttl_secs, 120);
        assert_eq!(config.cache.strategy, StrategyKind::Lru);
        assert_eq!(config.cache.tag_index, TagIndexMode::Shared);
        assert_eq!(config.cache.lru.max_entries, 500);
        assert_eq!(config.cache.lru.index_key, "lru:access");
    }

    #[test]
    fn test_load_config_missing_file_is_an_error() {
        assert!(loader::load_config(Some("/nonexistent/meshcache.toml")).is_err());
    }
}
