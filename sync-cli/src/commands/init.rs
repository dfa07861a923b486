//! Save username and local directory.

use anyhow::{Context, Result};
use boxsync_client::{PreferenceStore, Preferences};
use std::path::Path;

use crate::config::FilePreferenceStore;

/// Run the init command.
pub async fn run(data_dir: &Path, name: &str, dir: &Path, force: bool) -> Result<()> {
    let store = FilePreferenceStore::new(data_dir);
    if store.exists() && !force {
        anyhow::bail!(
            "Already initialized. Use --force or delete {} to reinitialize.",
            store.path().display()
        );
    }

    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Username must not be empty");
    }

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let local_dir = tokio::fs::canonicalize(dir)
        .await
        .unwrap_or_else(|_| dir.to_path_buf());

    let prefs = Preferences::new(name, local_dir);
    store.save(&prefs)?;

    println!("Preferences saved.");
    println!();
    println!("  Username:  {}", prefs.username);
    println!("  Directory: {}", prefs.local_dir.display());
    println!("  Data dir:  {}", data_dir.display());
    println!();
    println!("Next step:");
    println!("  boxsync run --relay <host:port>");

    Ok(())
}
