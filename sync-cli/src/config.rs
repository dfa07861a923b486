//! Local state for the boxsync CLI.
//!
//! The data directory holds:
//! - `preferences.json` - username and local directory ([`FilePreferenceStore`])
//! - `client.toml` - optional client tuning ([`load_client_config`])

use anyhow::{Context, Result};
use boxsync_client::{ClientConfig, ClientError, PreferenceStore, Preferences};
use std::path::{Path, PathBuf};

/// Preference file name inside the data directory.
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Client config file name inside the data directory.
pub const CLIENT_CONFIG_FILE: &str = "client.toml";

/// Preferences persisted as JSON in the data directory.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
}

impl FilePreferenceStore {
    /// Store backed by `<data_dir>/preferences.json`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(PREFERENCES_FILE),
        }
    }

    /// Path of the preference file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if preferences have been saved.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn load(&self) -> Result<Preferences, ClientError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Preferences::default())
            }
            Err(e) => {
                return Err(ClientError::Preferences(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        serde_json::from_str(&contents)
            .map_err(|e| ClientError::Preferences(format!("{}: {}", self.path.display(), e)))
    }

    fn save(&self, prefs: &Preferences) -> Result<(), ClientError> {
        let contents = serde_json::to_string_pretty(prefs)
            .map_err(|e| ClientError::Preferences(e.to_string()))?;
        std::fs::write(&self.path, contents)
            .map_err(|e| ClientError::Preferences(format!("{}: {}", self.path.display(), e)))?;
        set_file_permissions_0600(&self.path)
            .map_err(|e| ClientError::Preferences(format!("{}: {}", self.path.display(), e)))
    }
}

/// Load `<data_dir>/client.toml`, or defaults if it does not exist.
pub fn load_client_config(data_dir: &Path) -> Result<ClientConfig> {
    let path = data_dir.join(CLIENT_CONFIG_FILE);
    if !path.exists() {
        return Ok(ClientConfig::default());
    }
    ClientConfig::from_file(&path).with_context(|| format!("Invalid {}", path.display()))
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
fn set_file_permissions_0600(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn preferences_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FilePreferenceStore::new(dir.path());
        assert!(!store.exists());

        let prefs = Preferences::new("alice", "/home/alice/Box");
        store.save(&prefs).unwrap();
        assert!(store.exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.local_dir, PathBuf::from("/home/alice/Box"));
    }

    #[test]
    fn missing_preferences_load_defaults() {
        let dir = tempdir().unwrap();
        let loaded = FilePreferenceStore::new(dir.path()).load().unwrap();
        assert_eq!(loaded, Preferences::default());
    }

    #[test]
    fn corrupt_preferences_are_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(PREFERENCES_FILE), "{not json").unwrap();
        let err = FilePreferenceStore::new(dir.path()).load().unwrap_err();
        assert!(matches!(err, ClientError::Preferences(_)));
    }

    #[cfg(unix)]
    #[test]
    fn preference_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = FilePreferenceStore::new(dir.path());
        store.save(&Preferences::default()).unwrap();

        let perms = std::fs::metadata(store.path()).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600, "file should be 0600");
    }

    #[test]
    fn client_config_defaults_without_file() {
        let dir = tempdir().unwrap();
        let config = load_client_config(dir.path()).unwrap();
        assert_eq!(config.relay_address, "127.0.0.1:59090");
    }

    #[test]
    fn client_config_from_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CLIENT_CONFIG_FILE),
            "relay_address = \"10.1.1.1:7000\"\n",
        )
        .unwrap();
        let config = load_client_config(dir.path()).unwrap();
        assert_eq!(config.relay_address, "10.1.1.1:7000");
    }
}
