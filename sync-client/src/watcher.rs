//! Local directory watcher.
//!
//! Watches the local root recursively with `notify` and hands debounced
//! batches of changes to a callback. A batch closes once no event has arrived
//! for the debounce window. Each changed path is classified when the batch
//! closes: present on disk means created or modified, absent means removed.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientError;

/// Default quiet window closing a batch (200ms)
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// How a path changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Created or modified; exists now.
    Upsert,
    /// No longer exists.
    Removed,
}

/// One entry of a change batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChange {
    /// Path relative to the watched root.
    pub relative: PathBuf,
    /// What happened to it.
    pub kind: ChangeKind,
}

/// Why a watch loop returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    /// The cancellation token fired.
    Cancelled,
    /// The root itself disappeared; it has been recreated empty and needs a new watch.
    RootRecreated,
}

/// Watches one local root.
#[derive(Debug, Clone)]
pub struct DirectoryWatcher {
    root: PathBuf,
    debounce: Duration,
}

impl DirectoryWatcher {
    /// Watch `root`, closing batches after `debounce` of quiet.
    pub fn new(root: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            root: root.into(),
            debounce,
        }
    }

    /// The watched root as configured.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watch until cancelled or until the root is lost.
    ///
    /// `on_batch` runs inline, so no further batch is delivered until it
    /// returns. An error from it ends the watch with that error.
    pub async fn run<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut on_batch: F,
    ) -> Result<WatchEnd, ClientError>
    where
        F: FnMut(Vec<LocalChange>) -> Fut,
        Fut: Future<Output = Result<(), ClientError>>,
    {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| watch_error(&self.root, e))?;
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| watch_error(&self.root, e))?;

        let (notify_tx, mut notify_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.blocking_send(res);
            },
            Config::default(),
        )
        .map_err(|e| watch_error(&root, e))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| watch_error(&root, e))?;

        info!("Watching directory: {}", root.display());

        let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
        let mut debounce_timer: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Watch on {} cancelled", root.display());
                    return Ok(WatchEnd::Cancelled);
                }
                res = notify_rx.recv() => match res {
                    Some(Ok(event)) => {
                        if !is_content_change(&event.kind) {
                            continue;
                        }
                        for path in event.paths {
                            if let Ok(relative) = path.strip_prefix(&root) {
                                if !relative.as_os_str().is_empty() {
                                    pending.insert(relative.to_path_buf());
                                }
                            }
                        }
                        debounce_timer = Some(tokio::time::Instant::now() + self.debounce);
                    }
                    Some(Err(e)) => warn!("Directory watcher error: {}", e),
                    None => return Err(ClientError::Watch("notify channel closed".into())),
                },
                _ = async {
                    match debounce_timer {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    debounce_timer = None;
                    let batch = coalesce(&root, std::mem::take(&mut pending));
                    if !batch.is_empty() {
                        on_batch(batch).await?;
                    }

                    if !root.exists() {
                        warn!("Watched root {} disappeared, recreating", root.display());
                        tokio::fs::create_dir_all(&root)
                            .await
                            .map_err(|e| watch_error(&root, e))?;
                        return Ok(WatchEnd::RootRecreated);
                    }
                }
            }
        }
    }
}

fn watch_error(root: &Path, e: impl std::fmt::Display) -> ClientError {
    ClientError::Watch(format!("{}: {}", root.display(), e))
}

fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any => true,
        EventKind::Access(_) | EventKind::Other => false,
    }
}

/// Classify paths against the disk and drop entries already covered by an
/// ancestor of the same kind.
fn coalesce(root: &Path, paths: BTreeSet<PathBuf>) -> Vec<LocalChange> {
    let mut batch: Vec<LocalChange> = Vec::new();
    for relative in paths {
        let kind = if root.join(&relative).exists() {
            ChangeKind::Upsert
        } else {
            ChangeKind::Removed
        };
        let covered = batch
            .iter()
            .any(|c| c.kind == kind && relative.starts_with(&c.relative));
        if !covered {
            batch.push(LocalChange { relative, kind });
        }
    }
    batch
}
