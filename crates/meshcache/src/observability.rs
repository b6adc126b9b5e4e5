//! Diagnostics setup for meshcache processes.
//!
//! Logs go to stderr so anything a command prints on stdout stays pipeable.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Filter for the configured level. A parseable `RUST_LOG` takes precedence.
fn filter_for(level: &str, rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Installs the global subscriber. Calls after the first are no-ops.
pub fn init_tracing_with_level(level: &str) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let _ = tracing_subscriber::registry()
        .with(filter_for(level, rust_log.as_deref()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_configured_level_applies() {
        let filter = filter_for("debug", None);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_rust_log_overrides_configured_level() {
        let filter = filter_for("debug", Some("warn"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing_with_level("info");
        init_tracing_with_level("trace");
    }
}
