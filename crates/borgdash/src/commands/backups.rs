//! Backup snapshot command handlers.

use borgdash_store::ConfigStore;
use std::path::Path;

/// List the backup snapshots of the config file, newest first.
pub async fn list_backups(store: &ConfigStore, path: &Path, json: bool) -> anyhow::Result<()> {
    let backups = store.list_backups(path).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        println!("No backups found for {}.", path.display());
        return Ok(());
    }

    println!("{:<48} {:>10} {:<20}", "NAME", "SIZE", "CREATED");
    println!("{}", "-".repeat(80));
    for backup in backups {
        let created = backup.created_at.format("%Y-%m-%d %H:%M:%S");
        println!("{:<48} {:>10} {:<20}", backup.name, backup.size_bytes, created);
    }
    Ok(())
}

/// Restore the config file from a named snapshot.
pub async fn restore_backup(store: &ConfigStore, path: &Path, name: &str) -> anyhow::Result<()> {
    let snapshot = store.restore_backup(path, name).await?;
    println!(
        "Restored {} from {} (taken {})",
        path.display(),
        snapshot.name,
        snapshot.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}
