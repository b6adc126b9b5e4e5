use anyhow::Result;
use meshcache::{CacheConfig, LruStrategy};
use meshcache_store::DynStore;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cli::OutputFormat;
use crate::output::print_fields;

pub async fn stats(store: DynStore, config: &CacheConfig, format: OutputFormat) -> Result<()> {
    let lru = LruStrategy::new(
        store,
        config.lru.max_entries,
        config.lru.default_ttl_secs,
        config.lru.index_key.clone(),
    );
    let stats = lru.stats().await;

    print_fields(
        &[
            ("index", lru.index_key().to_string()),
            ("size", stats.size.to_string()),
            ("max_size", stats.max_size.to_string()),
            (
                "utilization",
                format!("{:.1}%", stats.utilization_percent),
            ),
            ("oldest_access", format_time(stats.oldest_access)),
            ("newest_access", format_time(stats.newest_access)),
        ],
        format,
    );
    Ok(())
}

fn format_time(at: Option<OffsetDateTime>) -> String {
    at.and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| "-".to_string())
}
