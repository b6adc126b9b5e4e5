mod cli;
mod commands;
mod output;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;

use cli::{Cli, Commands};
use meshcache::config::loader;
use meshcache::{AppConfig, CacheManager};
use meshcache_store::{DynStore, RedisStore};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    let config = loader::load_config(cli.config.as_deref()).map_err(anyhow::Error::msg)?;
    // Diagnostics go to stderr so command output stays pipeable.
    meshcache::observability::init_tracing_with_level(&config.logging.level);

    let store = connect(&config).await?;
    let cache = CacheManager::builder(store.clone())
        .with_config(&config.cache)
        .build();

    match &cli.command {
        Commands::Get(args) => commands::keys::get(&cache, args, format).await?,
        Commands::Set(args) => commands::keys::set(&cache, args).await?,
        Commands::Ttl(args) => commands::keys::ttl(&cache, args, format).await?,
        Commands::Del(args) => commands::invalidate::del(&cache, args).await?,
        Commands::InvalidatePattern(args) => commands::invalidate::pattern(&cache, args).await?,
        Commands::InvalidateTags(args) => commands::invalidate::tags(&cache, args).await?,
        Commands::Flush(args) => commands::invalidate::flush(&cache, args).await?,
        Commands::LruStats => commands::lru::stats(store, &config.cache, format).await?,
        Commands::Watch => {
            commands::watch::watch(store, &config.cache.invalidation_channel, format).await?
        }
    }

    Ok(())
}

/// The CLI only makes sense against the shared store, so there is no
/// in-memory fallback here.
async fn connect(config: &AppConfig) -> Result<DynStore> {
    if !config.redis.enabled {
        bail!("Redis is disabled in configuration (redis.enabled = false); nothing to inspect");
    }
    let store = RedisStore::connect(&config.redis)
        .await
        .with_context(|| format!("connecting to {}", config.redis.redacted_url()))?;
    Ok(Arc::new(store))
}
