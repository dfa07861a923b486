//! User preferences.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::client::ClientError;

/// Username and local root of this participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Name announced to the relay.
    #[serde(default = "default_username")]
    pub username: String,
    /// Directory kept in sync.
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
}

fn default_username() -> String {
    "User".to_string()
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("MyBoxer_User")
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            username: default_username(),
            local_dir: default_local_dir(),
        }
    }
}

impl Preferences {
    /// Build preferences for `username` rooted at `local_dir`.
    pub fn new(username: impl Into<String>, local_dir: impl Into<PathBuf>) -> Self {
        Self {
            username: username.into(),
            local_dir: local_dir.into(),
        }
    }
}

/// Loads and persists [`Preferences`].
pub trait PreferenceStore: Send + Sync {
    /// Load the stored preferences (defaults if none were saved).
    fn load(&self) -> Result<Preferences, ClientError>;

    /// Persist `prefs`.
    fn save(&self, prefs: &Preferences) -> Result<(), ClientError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    prefs: Mutex<Preferences>,
    saves: AtomicUsize,
}

impl MemoryPreferenceStore {
    /// Start with `prefs`.
    pub fn new(prefs: Preferences) -> Self {
        Self {
            prefs: Mutex::new(prefs),
            saves: AtomicUsize::new(0),
        }
    }

    /// How many times `save` was called.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self) -> Result<Preferences, ClientError> {
        let prefs = self
            .prefs
            .lock()
            .map_err(|_| ClientError::Preferences("store poisoned".into()))?;
        Ok(prefs.clone())
    }

    fn save(&self, prefs: &Preferences) -> Result<(), ClientError> {
        let mut stored = self
            .prefs
            .lock()
            .map_err(|_| ClientError::Preferences("store poisoned".into()))?;
        *stored = prefs.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
