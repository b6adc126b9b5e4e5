use anyhow::{Result, bail};
use colored::Colorize;
use meshcache::{CacheManager, SetOptions, TagIndexMode, TtlStatus};
use serde_json::Value;

use crate::cli::{KeyArgs, OutputFormat, SetArgs};
use crate::output::{print_fields, print_success, print_value};

pub async fn get(cache: &CacheManager, args: &KeyArgs, format: OutputFormat) -> Result<()> {
    match cache.get::<Value>(&args.key).await {
        Some(value) => print_value(&value, format),
        None => match format {
            OutputFormat::Json => println!("null"),
            OutputFormat::Text => println!("{}", "(miss)".dimmed()),
        },
    }
    Ok(())
}

pub async fn set(cache: &CacheManager, args: &SetArgs) -> Result<()> {
    check_tags(cache.tag_index_mode(), &args.tags)?;
    let value = parse_value(&args.value);
    let options = SetOptions {
        ttl_secs: args.ttl,
        tags: args.tags.clone(),
    };
    cache.set(&args.key, &value, &options).await?;
    print_success(&format!("Set {}{}", cache.prefix(), args.key));
    Ok(())
}

pub async fn ttl(cache: &CacheManager, args: &KeyArgs, format: OutputFormat) -> Result<()> {
    let status = cache.ttl(&args.key).await;
    let description = match status {
        TtlStatus::Expires(secs) => format!("expires in {secs}s"),
        TtlStatus::Persistent => "no expiry".to_string(),
        TtlStatus::Missing => "missing".to_string(),
    };
    print_fields(
        &[
            ("key", format!("{}{}", cache.prefix(), args.key)),
            ("ttl", status.as_seconds().to_string()),
            ("status", description),
        ],
        format,
    );
    Ok(())
}

/// A local tag index lives only as long as this process, so tags written
/// from the CLI would be lost on exit.
fn check_tags(mode: TagIndexMode, tags: &[String]) -> Result<()> {
    if !tags.is_empty() && mode == TagIndexMode::Local {
        bail!("--tag needs a shared tag index (cache.tag_index = \"shared\"); the local index is discarded when the command exits");
    }
    Ok(())
}

/// Command-line values are JSON when they parse as JSON, else plain strings.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(r#"{"id":1}"#), json!({"id": 1}));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value(r#""quoted""#), json!("quoted"));
        assert_eq!(parse_value("Ada Lovelace"), json!("Ada Lovelace"));
    }

    #[test]
    fn test_tags_require_shared_index() {
        let tags = vec!["users".to_string()];
        assert!(check_tags(TagIndexMode::Local, &tags).is_err());
        assert!(check_tags(TagIndexMode::Shared, &tags).is_ok());
        assert!(check_tags(TagIndexMode::Local, &[]).is_ok());
    }
}
