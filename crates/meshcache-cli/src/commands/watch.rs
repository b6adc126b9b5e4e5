use anyhow::{Result, bail};
use colored::Colorize;
use futures_util::StreamExt;
use meshcache::{InvalidationAction, InvalidationEvent};
use meshcache_store::DynStore;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::cli::OutputFormat;

pub async fn watch(store: DynStore, channel: &str, format: OutputFormat) -> Result<()> {
    let mut events = store.subscribe(channel).await?;
    eprintln!(
        "{} {} (Ctrl-C to stop)",
        "Watching".cyan(),
        channel
    );

    loop {
        tokio::select! {
            payload = events.next() => {
                let Some(payload) = payload else {
                    bail!("Subscription to {channel} closed");
                };
                match format {
                    OutputFormat::Json => println!("{payload}"),
                    OutputFormat::Text => println!("{}", render(&payload)),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn render(payload: &str) -> String {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    match InvalidationEvent::from_json(payload) {
        Ok(event) => format!(
            "{} {} {} {}",
            now.dimmed(),
            event.source.cyan(),
            event.action.kind().yellow(),
            describe(&event.action)
        ),
        Err(e) => format!("{} {} {payload} ({e})", now.dimmed(), "malformed".red()),
    }
}

fn describe(action: &InvalidationAction) -> String {
    match action {
        InvalidationAction::Invalidate { key } => key.clone(),
        InvalidationAction::InvalidatePattern { pattern } => pattern.clone(),
        InvalidationAction::InvalidateTags { tags } => tags.join(", "),
    }
}
