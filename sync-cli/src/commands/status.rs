//! Show saved settings and local files.

use anyhow::Result;
use boxsync_client::PreferenceStore;
use boxsync_types::transfer::collect_files;
use std::path::Path;

use crate::config::{load_client_config, FilePreferenceStore, CLIENT_CONFIG_FILE};

/// Run the status command.
pub async fn run(data_dir: &Path) -> Result<()> {
    let store = FilePreferenceStore::new(data_dir);
    if !store.exists() {
        println!("Not initialized.");
        println!();
        println!("Run 'boxsync init --name <name> --dir <directory>' to get started.");
        return Ok(());
    }

    let prefs = store.load()?;
    let config = load_client_config(data_dir)?;

    println!("boxsync status");
    println!("==============");
    println!();
    println!("Preferences:");
    println!("  Username:  {}", prefs.username);
    println!("  Directory: {}", prefs.local_dir.display());
    println!();
    println!("Client:");
    println!("  Relay:     {}", config.relay_address);
    let source = data_dir.join(CLIENT_CONFIG_FILE);
    if source.exists() {
        println!("  Config:    {}", source.display());
    } else {
        println!("  Config:    defaults");
    }
    println!();

    if prefs.local_dir.is_dir() {
        let root = prefs.local_dir.clone();
        let files = tokio::task::spawn_blocking(move || collect_files(&root, &root)).await??;
        let bytes: u64 = files.iter().map(|f| f.entry.len).sum();
        println!("Local files:");
        println!("  Count:     {}", files.len());
        println!("  Size:      {} bytes", bytes);
    } else {
        println!("Local files:");
        println!("  Directory does not exist yet");
    }

    Ok(())
}
