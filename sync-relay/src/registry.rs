//! User registry.
//!
//! Maps each connected username to its [`UserRecord`]: storage directory,
//! pending share queue and the cancellation token of its worker.
//!
//! Critical sections:
//! - name uniqueness is decided inside one `DashMap` entry lock, so two
//!   introduces of the same name cannot both succeed;
//! - a share queue is only touched under its record's own mutex; appends by
//!   sharers and the owner's drain-and-clear never interleave.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sync_core::join_roster;
use sync_types::transfer::collect_files;
use sync_types::FileEntry;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{ProtocolError, StorageError, StorageResult};

/// Capacity of the registry event channel.
const EVENT_CAPACITY: usize = 64;

/// A file one user registered for delivery to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFile {
    /// Who shared it.
    pub sharer: String,
    /// Location under the sharer's directory.
    pub source: PathBuf,
    /// Wire path on the recipient (`<sharer>/<relative path>`).
    pub wire_path: String,
}

/// A connected user.
#[derive(Debug)]
pub struct UserRecord {
    name: String,
    dir: PathBuf,
    shares: Mutex<Vec<SharedFile>>,
    cancel: CancellationToken,
}

impl UserRecord {
    /// Username.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage directory of this user.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Token cancelled when the user is removed or the relay shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Append to the share queue.
    pub async fn push_share(&self, share: SharedFile) {
        self.shares.lock().await.push(share);
    }

    /// Take every queued share, leaving the queue empty.
    pub async fn drain_shares(&self) -> Vec<SharedFile> {
        std::mem::take(&mut *self.shares.lock().await)
    }

    /// Number of queued shares.
    pub async fn pending_shares(&self) -> usize {
        self.shares.lock().await.len()
    }
}

/// One user's directory contents, as published to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTree {
    /// Username.
    pub name: String,
    /// Files under the user's directory, sorted.
    pub files: Vec<FileEntry>,
}

/// Registry change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A user joined or left, or a user's files changed.
    TreeChanged(Vec<UserTree>),
}

/// All connected users.
#[derive(Debug)]
pub struct UserRegistry {
    root: PathBuf,
    users: DashMap<String, Arc<UserRecord>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl UserRegistry {
    /// Create an empty registry storing user directories under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            root: root.into(),
            users: DashMap::new(),
            events,
        }
    }

    /// Storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register `name`, failing if it is empty, unusable as a directory or taken.
    ///
    /// The registry is untouched on failure.
    pub fn register(&self, name: &str) -> Result<Arc<UserRecord>, ProtocolError> {
        validate_username(name)?;

        match self.users.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ProtocolError::UsernameTaken(name.to_string())),
            Entry::Vacant(slot) => {
                let record = Arc::new(UserRecord {
                    name: name.to_string(),
                    dir: self.root.join(name),
                    shares: Mutex::new(Vec::new()),
                    cancel: CancellationToken::new(),
                });
                slot.insert(record.clone());
                tracing::debug!("Registered user {} (total: {})", name, self.users.len());
                Ok(record)
            }
        }
    }

    /// Remove exactly `record` and cancel its worker.
    ///
    /// A newer record under the same name is left alone. Returns whether
    /// anything was removed.
    pub fn remove(&self, record: &Arc<UserRecord>) -> bool {
        record.cancel.cancel();
        let removed = self
            .users
            .remove_if(&record.name, |_, current| Arc::ptr_eq(current, record))
            .is_some();
        if removed {
            tracing::debug!(
                "Unregistered user {} (remaining: {})",
                record.name,
                self.users.len()
            );
        }
        removed
    }

    /// Look up a connected user.
    pub fn get(&self, name: &str) -> Option<Arc<UserRecord>> {
        self.users.get(name).map(|r| r.value().clone())
    }

    /// Whether `name` is connected.
    pub fn contains(&self, name: &str) -> bool {
        self.users.contains_key(name)
    }

    /// Connected usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Roster as sent on the wire.
    pub fn roster(&self) -> String {
        join_roster(self.usernames())
    }

    /// Number of connected users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Queue `share` for `target`.
    pub async fn enqueue_share(&self, target: &str, share: SharedFile) -> StorageResult<()> {
        let record = self
            .get(target)
            .ok_or_else(|| StorageError::UnknownUser(target.to_string()))?;
        record.push_share(share).await;
        Ok(())
    }

    /// Cancel every worker. Records stay until their workers remove them.
    pub fn cancel_all(&self) {
        for record in self.users.iter() {
            record.cancel.cancel();
        }
    }

    /// Subscribe to registry events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Publish the current trees to subscribers, if there are any.
    pub async fn publish_tree(&self) {
        if self.events.receiver_count() == 0 {
            return;
        }

        let records: Vec<(String, PathBuf)> = self
            .users
            .iter()
            .map(|r| (r.name.clone(), r.dir.clone()))
            .collect();
        let trees = tokio::task::spawn_blocking(move || snapshot_trees(records)).await;

        match trees {
            Ok(trees) => {
                let _ = self.events.send(RegistryEvent::TreeChanged(trees));
            }
            Err(e) => tracing::warn!("Couldn't update file tree: {}", e),
        }
    }
}

fn snapshot_trees(mut records: Vec<(String, PathBuf)>) -> Vec<UserTree> {
    records.sort();
    records
        .into_iter()
        .map(|(name, dir)| {
            let files = match collect_files(&dir, &dir) {
                Ok(files) => files.into_iter().map(|f| f.entry).collect(),
                Err(e) => {
                    tracing::warn!("Couldn't list files of {}: {}", name, e);
                    Vec::new()
                }
            };
            UserTree { name, files }
        })
        .collect()
}

fn validate_username(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() {
        return Err(ProtocolError::EmptyUsername);
    }
    let reserved = name == "." || name == "..";
    let bad_char = name
        .chars()
        .any(|c| matches!(c, '/' | '\\' | ':' | ',' | '\0') || c.is_control());
    if reserved || bad_char || name.trim() != name {
        return Err(ProtocolError::InvalidUsername(name.to_string()));
    }
    Ok(())
}
