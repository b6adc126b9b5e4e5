use anyhow::{Result, bail};
use meshcache::{CacheManager, TagIndexMode};

use crate::cli::{FlushArgs, KeyArgs, PatternArgs, TagsArgs};
use crate::output::{print_success, print_warning};

pub async fn del(cache: &CacheManager, args: &KeyArgs) -> Result<()> {
    if cache.invalidate(&args.key, true).await {
        print_success(&format!("Invalidated {}{}", cache.prefix(), args.key));
    } else {
        print_warning(&format!("{}{} not found", cache.prefix(), args.key));
    }
    Ok(())
}

pub async fn pattern(cache: &CacheManager, args: &PatternArgs) -> Result<()> {
    let count = cache.invalidate_pattern(&args.pattern, true).await;
    print_success(&format!(
        "Invalidated {count} key(s) matching {}{}",
        cache.prefix(),
        args.pattern
    ));
    Ok(())
}

pub async fn tags(cache: &CacheManager, args: &TagsArgs) -> Result<()> {
    let count = cache.invalidate_by_tags(&args.tags, true).await;
    match cache.tag_index_mode() {
        TagIndexMode::Shared => {
            print_success(&format!(
                "Invalidated {count} key(s) tagged {}",
                args.tags.join(", ")
            ));
        }
        // This process tagged nothing itself; running instances resolve the
        // tags against their own indexes when the event arrives.
        TagIndexMode::Local => {
            print_success(&format!(
                "Broadcast invalidation for tags {}",
                args.tags.join(", ")
            ));
        }
    }
    Ok(())
}

pub async fn flush(cache: &CacheManager, args: &FlushArgs) -> Result<()> {
    if !args.yes {
        bail!(
            "Refusing to flush {}* without --yes",
            cache.prefix()
        );
    }
    let count = cache.flush().await;
    print_success(&format!("Flushed {count} key(s) under {}", cache.prefix()));
    Ok(())
}
