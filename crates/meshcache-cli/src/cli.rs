use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "meshcache")]
#[command(about = "meshcache CLI: inspect and invalidate a shared cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML config file (defaults to ./meshcache.toml if present)
    #[arg(short, long, global = true, env = "MESHCACHE_CONFIG")]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read a cached value by logical key
    Get(KeyArgs),
    /// Write a value (JSON, or a plain string if it does not parse)
    Set(SetArgs),
    /// Invalidate one key on every instance
    Del(KeyArgs),
    /// Invalidate every key matching a glob pattern on every instance
    InvalidatePattern(PatternArgs),
    /// Invalidate tagged keys on every instance
    InvalidateTags(TagsArgs),
    /// Show the remaining lifetime of a key
    Ttl(KeyArgs),
    /// Delete everything under the key prefix on every instance
    Flush(FlushArgs),
    /// Show LRU access index statistics
    LruStats,
    /// Print invalidation events as instances publish them
    Watch,
}

#[derive(clap::Args)]
pub struct KeyArgs {
    /// Logical key (without the configured prefix)
    pub key: String,
}

#[derive(clap::Args)]
pub struct SetArgs {
    /// Logical key (without the configured prefix)
    pub key: String,
    /// Value to store
    pub value: String,
    /// Expiry in seconds (defaults to cache.default_ttl_secs)
    #[arg(long)]
    pub ttl: Option<u64>,
    /// Tag to record the key under (repeatable; needs cache.tag_index = "shared")
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

#[derive(clap::Args)]
pub struct PatternArgs {
    /// Glob pattern over logical keys (e.g. user:*)
    pub pattern: String,
}

#[derive(clap::Args)]
pub struct TagsArgs {
    /// Tags to invalidate
    #[arg(required = true)]
    pub tags: Vec<String>,
}

#[derive(clap::Args)]
pub struct FlushArgs {
    /// Skip the confirmation check
    #[arg(long)]
    pub yes: bool,
}
