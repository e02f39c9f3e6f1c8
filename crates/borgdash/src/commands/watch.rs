//! Change notification command handler.

use borgdash_store::{ConfigStore, WatchEvent};
use chrono::Local;
use std::path::Path;
use tracing::info;

/// Print external changes to the config file until interrupted.
pub async fn watch_config(store: &ConfigStore, path: &Path, json: bool) -> anyhow::Result<()> {
    let subscription = store
        .watch(path, move |event| print_event(&event, json))
        .await?;

    if !subscription.is_live() {
        eprintln!(
            "Warning: file notifications are unavailable for {}; no changes will be reported",
            path.display()
        );
    } else {
        eprintln!("Watching {} (Ctrl+C to stop)", path.display());
    }

    tokio::signal::ctrl_c().await?;
    info!(subscription = %subscription.id(), "Interrupted, stopping watch");
    store.unwatch(subscription);
    Ok(())
}

fn print_event(event: &WatchEvent, json: bool) {
    let now = Local::now();

    if json {
        let line = match event {
            WatchEvent::Changed(document) => serde_json::json!({
                "event": "changed",
                "at": now.to_rfc3339(),
                "document": document,
            }),
            WatchEvent::Error(error) => serde_json::json!({
                "event": "error",
                "at": now.to_rfc3339(),
                "error": error.to_string(),
            }),
        };
        println!("{line}");
        return;
    }

    let stamp = now.format("%H:%M:%S");
    match event {
        WatchEvent::Changed(document) => {
            let sections: Vec<&str> = document.keys().collect();
            println!("[{stamp}] changed: {}", sections.join(", "));
        }
        WatchEvent::Error(error) => {
            println!("[{stamp}] error: {error}");
        }
    }
}
