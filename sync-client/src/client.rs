//! ClientSession - the main interface for boxsync.
//!
//! This module provides [`ClientSession`], which owns one connection to the
//! relay and everything that runs on it: the login sequence, the recurring
//! jobs and the one-shot operations a user triggers.
//!
//! # Architecture
//!
//! The session uses the pure state machine from sync-core for lifecycle
//! decisions and interprets its actions to perform the actual I/O. Every
//! exchange holds the [`Gate`] so the byte stream never interleaves.
//!
//! ```text
//! JobScheduler ─┐
//! one-shots ────┼─→ Gate → ClientSession → Connector stream → relay
//! watcher ──────┘                ↓
//!                      sync-core (pure state machine)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use sync_client::{ClientSession, ClientConfig, TcpConnector, Preferences};
//!
//! let session = ClientSession::new(
//!     TcpConnector::new("127.0.0.1:59090"),
//!     ClientConfig::default(),
//!     Preferences::new("alice", "/home/alice/Box"),
//!     store,
//!     sink,
//! );
//! if session.connect().await {
//!     // login runs in the background; jobs start once it completes
//! }
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use boxsync_core::{
    parse_roster, Action, DisconnectReason, Event, JobKind, SessionState, Severity,
};
use boxsync_types::frame::{
    expect_reply, read_introduce_reply, read_string, write_request, write_string,
};
use boxsync_types::path::to_wire_path;
use boxsync_types::transfer::{collect_files, receive_files, send_files};
use boxsync_types::{FileEntry, Reply, Request, WireError};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ClientConfig;
use crate::events::EventSink;
use crate::gate::Gate;
use crate::jobs::{JobOutcome, JobScheduler};
use crate::prefs::{PreferenceStore, Preferences};
use crate::transport::{BoxedStream, Connector};
use crate::watcher::{ChangeKind, DirectoryWatcher, LocalChange, WatchEnd};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The relay refused or garbled the introduce.
    #[error("introduce failed: {0}")]
    Introduce(String),

    /// Roster request failed.
    #[error("user list failed: {0}")]
    List(String),

    /// Full sync failed.
    #[error("sync failed: {0}")]
    Sync(String),

    /// Share poll or share registration failed.
    #[error("share failed: {0}")]
    Share(String),

    /// Pushing local changes failed.
    #[error("push failed: {0}")]
    Push(String),

    /// Remote delete failed.
    #[error("delete failed: {0}")]
    Delete(String),

    /// The local watch could not be established or broke.
    #[error("watch failed: {0}")]
    Watch(String),

    /// Not connected to relay.
    #[error("not connected")]
    NotConnected,

    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Preference store failed.
    #[error("preferences error: {0}")]
    Preferences(String),
}

impl ClientError {
    /// The user-facing message shown when this error ends a session.
    pub fn fault_message(&self) -> String {
        match self {
            Self::Introduce(reason) => format!("Error, {}!", reason),
            Self::List(_) => "Couldn't get list of users!".into(),
            Self::Sync(_) => "Couldn't sync files with server!".into(),
            Self::Share(_) => "Couldn't establish a connection with server!".into(),
            Self::Push(_) | Self::Delete(_) | Self::Watch(_) => {
                JobKind::DirectoryWatcher.failure_message().into()
            }
            Self::NotConnected | Self::ConnectionFailed(_) => {
                "Couldn't establish a connection with server!".into()
            }
            Self::Preferences(e) => format!("Couldn't use preferences: {}", e),
        }
    }
}

/// One session with a relay.
///
/// Always used behind an [`Arc`]; operations that spawn work take `self: &Arc<Self>`.
pub struct ClientSession<C: Connector> {
    connector: C,
    config: ClientConfig,
    profile: RwLock<Preferences>,
    store: Arc<dyn PreferenceStore>,
    sink: Arc<dyn EventSink>,
    state: watch::Sender<SessionState>,
    connection: Mutex<Option<BoxedStream>>,
    gate: Gate,
    jobs: JobScheduler,
    tasks: TaskTracker,
    oneshot_cancel: CancellationToken,
}

impl<C: Connector> ClientSession<C> {
    /// Create a disconnected session.
    pub fn new(
        connector: C,
        config: ClientConfig,
        prefs: Preferences,
        store: Arc<dyn PreferenceStore>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Arc::new(Self {
            connector,
            config,
            profile: RwLock::new(prefs),
            store,
            sink,
            state,
            connection: Mutex::new(None),
            gate: Gate::new(),
            jobs: JobScheduler::new(),
            tasks: TaskTracker::new(),
            oneshot_cancel: CancellationToken::new(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The gate serializing this session's exchanges.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// The recurring jobs of this session.
    pub fn jobs(&self) -> &JobScheduler {
        &self.jobs
    }

    /// Current preferences.
    pub async fn preferences(&self) -> Preferences {
        self.profile.read().await.clone()
    }

    /// Replace preferences. Takes effect on the next connect.
    pub async fn set_preferences(&self, prefs: Preferences) {
        *self.profile.write().await = prefs;
    }

    // ===== Lifecycle =====

    /// Open the transport and start logging in.
    ///
    /// Returns `true` once the transport is open; the login sequence then
    /// runs in the background. Returns `false` if already connected or the
    /// relay is unreachable.
    pub async fn connect(self: &Arc<Self>) -> bool {
        if self.state().is_connected() {
            tracing::warn!("Connect requested while already connected");
            return false;
        }

        match self.connector.connect().await {
            Ok(stream) => {
                *self.connection.lock().await = Some(stream);
                tracing::info!("Connected to {}", self.connector.describe());
                let actions = self.transition(Event::TransportOpened);
                self.perform(actions).await;
                true
            }
            Err(e) => {
                tracing::error!(
                    "Couldn't establish a connection with {}: {}",
                    self.connector.describe(),
                    e
                );
                let actions = self.transition(Event::TransportFailed {
                    error: e.to_string(),
                });
                self.perform(actions).await;
                false
            }
        }
    }

    /// Tear the session down: cancel jobs, close the transport, clear the
    /// environment and notify (unless exiting).
    pub async fn disconnect(self: &Arc<Self>, reason: DisconnectReason) {
        if let DisconnectReason::Fault { message } = &reason {
            tracing::error!("Session fault: {}", message);
        }
        let actions = self.transition(Event::Disconnect { reason });
        if actions.is_empty() {
            return;
        }
        tracing::info!("Disconnecting...");
        self.perform(actions).await;
        tracing::info!("User disconnected.");
    }

    /// Stop one-shot work (waiting up to the grace period), then disconnect silently.
    pub async fn shutdown(self: &Arc<Self>) {
        self.tasks.close();
        if tokio::time::timeout(self.config.shutdown_grace(), self.tasks.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                "One-shot work still running after {:?}, cancelling",
                self.config.shutdown_grace()
            );
            self.oneshot_cancel.cancel();
        }
        self.jobs.cancel_all();
        self.disconnect(DisconnectReason::OnExit).await;
    }

    fn transition(&self, event: Event) -> Vec<Action> {
        let mut actions = Vec::new();
        self.state.send_if_modified(|state| {
            let (next, produced) = state.on_event(event);
            actions = produced;
            let changed = *state != next;
            if changed {
                tracing::debug!("Session {:?} -> {:?}", state, next);
            }
            *state = next;
            changed
        });
        actions
    }

    async fn perform(self: &Arc<Self>, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::SavePreferences => {
                    let prefs = self.preferences().await;
                    if let Err(e) = self.store.save(&prefs) {
                        tracing::warn!("Couldn't save preferences: {}", e);
                    }
                }
                Action::SpawnBoot => self.spawn_boot(),
                Action::ArmJobs => self.arm_jobs(),
                Action::CancelJobs => self.jobs.cancel_all(),
                Action::CloseTransport => {
                    if let Some(mut stream) = self.connection.lock().await.take() {
                        let _ = stream.shutdown().await;
                    }
                }
                Action::ClearEnvironment => self.sink.clear_environment(),
                Action::Notify { severity, message } => {
                    match severity {
                        Severity::Info => tracing::info!("{}", message),
                        Severity::Warning => tracing::warn!("{}", message),
                        Severity::Error => tracing::error!("{}", message),
                    }
                    self.sink.notify(severity, &message);
                }
            }
        }
    }

    fn spawn_boot(self: &Arc<Self>) {
        let session = Arc::clone(self);
        self.spawn_oneshot(async move { session.boot().await });
    }

    fn spawn_oneshot<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.oneshot_cancel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => tracing::debug!("One-shot work cancelled"),
                _ = work => {}
            }
        });
    }

    /// Introduce, fetch the roster and pull the full snapshot, all under one gate pass.
    async fn boot(self: Arc<Self>) {
        let result: Result<(), ClientError> = async {
            let _pass = self.gate.enter().await.map_err(|_| ClientError::NotConnected)?;
            let profile = self.preferences().await;
            tokio::fs::create_dir_all(&profile.local_dir)
                .await
                .map_err(|e| ClientError::Sync(format!("{}: {}", profile.local_dir.display(), e)))?;

            self.introduce(&profile.username).await?;
            self.fetch_user_list_locked(&profile).await?;
            tracing::info!("Successfully obtained user list from server.");
            self.poll_files_locked(&profile.local_dir, ClientError::Sync)
                .await?;
            tracing::info!("File sync with server completed successfully.");
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                let actions = self.transition(Event::LoggedIn);
                self.perform(actions).await;
            }
            Err(ClientError::Introduce(reason)) => {
                tracing::error!("Introduce failed: {}", reason);
                let actions = self.transition(Event::Rejected { error: reason });
                self.perform(actions).await;
            }
            Err(ClientError::NotConnected) => {}
            Err(e) => {
                tracing::error!("Login failed: {}", e);
                self.disconnect(DisconnectReason::Fault {
                    message: e.fault_message(),
                })
                .await;
            }
        }
    }

    // ===== Exchanges =====

    /// Run one exchange bounded by the exchange timeout and by the session
    /// staying connected.
    ///
    /// A failed or timed-out exchange leaves the stream out of step, so it
    /// ends the session here; callers only see the error.
    async fn bounded<T, F>(
        self: &Arc<Self>,
        exchange: F,
        wrap: fn(String) -> ClientError,
    ) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, WireError>>,
    {
        let mut state = self.state.subscribe();
        if !state.borrow().is_connected() {
            return Err(ClientError::NotConnected);
        }
        let result = tokio::select! {
            res = tokio::time::timeout(self.config.exchange_timeout(), exchange) => match res {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(wrap(e.to_string())),
                Err(_) => Err(wrap(format!(
                    "no answer within {:?}",
                    self.config.exchange_timeout()
                ))),
            },
            _ = state.wait_for(|s| !s.is_connected()) => Err(ClientError::NotConnected),
        };
        if let Err(e) = &result {
            if !matches!(e, ClientError::NotConnected) {
                self.fail_session(e);
            }
        }
        result
    }

    /// Tear the session down after a broken exchange.
    ///
    /// The state flips before returning. Teardown runs on the one-shot
    /// tracker, since the caller may be a job that the teardown cancels and
    /// may still hold the connection.
    fn fail_session(self: &Arc<Self>, error: &ClientError) {
        let message = error.fault_message();
        let actions = self.transition(Event::Disconnect {
            reason: DisconnectReason::Fault {
                message: message.clone(),
            },
        });
        if actions.is_empty() {
            return;
        }
        tracing::error!("Session fault: {} ({})", message, error);
        let session = Arc::clone(self);
        self.tasks.spawn(async move {
            session.perform(actions).await;
            tracing::info!("User disconnected.");
        });
    }

    async fn introduce(self: &Arc<Self>, username: &str) -> Result<(), ClientError> {
        let mut conn = self.connection.lock().await;
        let stream = conn.as_mut().ok_or(ClientError::NotConnected)?;

        let reply = self
            .bounded(
                async {
                    write_string(stream, username).await?;
                    stream.flush().await?;
                    read_introduce_reply(stream).await
                },
                ClientError::Introduce,
            )
            .await?;

        match reply {
            Ok(Reply::Welcome) => {
                self.transition(Event::Welcomed);
                tracing::info!("Introduced as {}", username);
                Ok(())
            }
            Ok(Reply::NameTaken) => Err(ClientError::Introduce("username already in use".into())),
            Ok(other) => Err(ClientError::Introduce(format!(
                "error in connection: unexpected reply {}",
                other.code()
            ))),
            Err(code) => Err(ClientError::Introduce(format!(
                "error in connection: unexpected reply {}",
                code
            ))),
        }
    }

    /// Fetch the roster and hand it to the event sink.
    pub async fn fetch_user_list(self: &Arc<Self>) -> Result<Vec<String>, ClientError> {
        let _pass = self.gate.enter().await.map_err(|_| ClientError::NotConnected)?;
        let profile = self.preferences().await;
        self.fetch_user_list_locked(&profile).await
    }

    async fn fetch_user_list_locked(self: &Arc<Self>, profile: &Preferences) -> Result<Vec<String>, ClientError> {
        let mut conn = self.connection.lock().await;
        let stream = conn.as_mut().ok_or(ClientError::NotConnected)?;

        let raw = self
            .bounded(
                async {
                    write_request(stream, Request::ListUsers).await?;
                    stream.flush().await?;
                    read_string(stream).await
                },
                ClientError::List,
            )
            .await?;

        let users = parse_roster(&raw, &profile.username);
        self.sink.update_user_list(&users);
        Ok(users)
    }

    /// Pull every file the relay holds for us.
    pub async fn full_sync(self: &Arc<Self>) -> Result<Vec<FileEntry>, ClientError> {
        let _pass = self.gate.enter().await.map_err(|_| ClientError::NotConnected)?;
        let profile = self.preferences().await;
        self.poll_files_locked(&profile.local_dir, ClientError::Sync)
            .await
    }

    /// Pull files other participants shared with us since the last poll.
    pub async fn poll_shares(self: &Arc<Self>) -> Result<Vec<FileEntry>, ClientError> {
        let _pass = self.gate.enter().await.map_err(|_| ClientError::NotConnected)?;
        let profile = self.preferences().await;
        self.poll_files_locked(&profile.local_dir, ClientError::Share)
            .await
    }

    async fn poll_files_locked(
        self: &Arc<Self>,
        root: &Path,
        wrap: fn(String) -> ClientError,
    ) -> Result<Vec<FileEntry>, ClientError> {
        let mut conn = self.connection.lock().await;
        let stream = conn.as_mut().ok_or(ClientError::NotConnected)?;

        let received = self
            .bounded(
                async {
                    write_request(stream, Request::PollFiles).await?;
                    stream.flush().await?;
                    match expect_reply(stream, Request::PollFiles).await? {
                        Reply::FilesFollow => receive_files(stream, root).await.map(Some),
                        _ => Ok(None),
                    }
                },
                wrap,
            )
            .await?;

        match received {
            Some(entries) => {
                tracing::info!("Synced {} files with server", entries.len());
                self.sink.refresh_file_tree();
                Ok(entries)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Push the file or directory at `path` (absolute, or relative to the local root).
    ///
    /// Returns the number of files sent; nothing is sent when `path` holds no files.
    pub async fn push_change(self: &Arc<Self>, path: &Path) -> Result<usize, ClientError> {
        let profile = self.preferences().await;
        let root = profile.local_dir.clone();
        let target = resolve_local(&root, path);

        let files = tokio::task::spawn_blocking(move || collect_files(&root, &target))
            .await
            .map_err(|e| ClientError::Push(e.to_string()))?
            .map_err(|e| ClientError::Push(e.to_string()))?;
        if files.is_empty() {
            tracing::debug!("Nothing to push under {}", path.display());
            return Ok(0);
        }

        let _pass = self.gate.enter().await.map_err(|_| ClientError::NotConnected)?;
        let mut conn = self.connection.lock().await;
        let stream = conn.as_mut().ok_or(ClientError::NotConnected)?;

        let bytes = self
            .bounded(
                async {
                    write_request(stream, Request::PushFiles).await?;
                    stream.flush().await?;
                    expect_reply(stream, Request::PushFiles).await?;
                    send_files(stream, &files).await
                },
                ClientError::Push,
            )
            .await?;

        tracing::info!(
            "Successfully synced local changes of {} with your box ({} files, {} bytes)",
            path.display(),
            files.len(),
            bytes
        );
        Ok(files.len())
    }

    /// Remove the file or directory at `path` on the relay.
    pub async fn delete_remote(self: &Arc<Self>, path: &Path) -> Result<(), ClientError> {
        let profile = self.preferences().await;
        let target = resolve_local(&profile.local_dir, path);
        let wire = to_wire_path(&profile.local_dir, &target)
            .map_err(|e| ClientError::Delete(e.to_string()))?;

        let _pass = self.gate.enter().await.map_err(|_| ClientError::NotConnected)?;
        let mut conn = self.connection.lock().await;
        let stream = conn.as_mut().ok_or(ClientError::NotConnected)?;

        self.bounded(
            async {
                write_request(stream, Request::DeleteFile).await?;
                stream.flush().await?;
                expect_reply(stream, Request::DeleteFile).await?;
                write_string(stream, &wire).await?;
                stream.flush().await?;
                Ok(())
            },
            ClientError::Delete,
        )
        .await?;

        tracing::info!("Successfully removed {} from your box", wire);
        Ok(())
    }

    /// Ask the relay to deliver `file` to `target`. Runs in the background;
    /// the outcome is reported through the event sink.
    pub fn request_share(self: &Arc<Self>, file: String, target: String) {
        let session = Arc::clone(self);
        self.spawn_oneshot(async move {
            tracing::info!("Sharing file {} with user {}...", file, target);
            match session.register_share(&file, &target).await {
                Ok(()) => {
                    let message =
                        format!("Successfully shared file {} with user {}.", file, target);
                    tracing::info!("{}", message);
                    session.sink.notify(Severity::Info, &message);
                }
                Err(e) => {
                    // A broken exchange has already ended the session
                    tracing::error!("Share of {} with {} failed: {}", file, target, e);
                    session.sink.notify(
                        Severity::Error,
                        &format!("There was a problem sharing file with user {}!", target),
                    );
                }
            }
        });
    }

    async fn register_share(self: &Arc<Self>, file: &str, target: &str) -> Result<(), ClientError> {
        let _pass = self.gate.enter().await.map_err(|_| ClientError::NotConnected)?;
        let mut conn = self.connection.lock().await;
        let stream = conn.as_mut().ok_or(ClientError::NotConnected)?;

        self.bounded(
            async {
                write_request(stream, Request::RegisterShare).await?;
                stream.flush().await?;
                expect_reply(stream, Request::RegisterShare).await?;
                write_string(stream, file).await?;
                write_string(stream, target).await?;
                stream.flush().await?;
                Ok(())
            },
            ClientError::Share,
        )
        .await
    }

    // ===== Jobs =====

    fn arm_jobs(self: &Arc<Self>) {
        for kind in JobKind::ALL {
            let schedule = self.config.jobs.schedule(kind);
            let session: Weak<Self> = Arc::downgrade(self);
            self.jobs.arm(kind, schedule, move |token| {
                let session = session.clone();
                async move {
                    match session.upgrade() {
                        Some(session) => session.fire(kind, token).await,
                        None => JobOutcome::Stop,
                    }
                }
            });
        }
    }

    async fn fire(self: &Arc<Self>, kind: JobKind, token: CancellationToken) -> JobOutcome {
        let result = if kind.skips_when_busy() {
            let period = self.config.jobs.schedule(kind).period();
            let pass = match self.gate.try_enter_within(period).await {
                Ok(Some(pass)) => pass,
                Ok(None) => {
                    tracing::debug!("Job {} skipped, gate busy for {:?}", kind, period);
                    return JobOutcome::Continue;
                }
                Err(_) => return JobOutcome::Stop,
            };
            let profile = self.preferences().await;
            let result = match kind {
                JobKind::UserListPoll => self.fetch_user_list_locked(&profile).await.map(drop),
                _ => self
                    .poll_files_locked(&profile.local_dir, ClientError::Share)
                    .await
                    .map(drop),
            };
            drop(pass);
            result
        } else {
            self.watch_once(&token).await
        };

        match result {
            Ok(()) => JobOutcome::Continue,
            Err(ClientError::NotConnected) => JobOutcome::Stop,
            Err(e) => {
                tracing::error!("Job {} failed: {}", kind, e);
                self.jobs.cancel(kind);
                // Disconnect outside this job's task: it cancels the job
                let session = Arc::clone(self);
                let message = e.fault_message();
                self.tasks.spawn(async move {
                    session
                        .disconnect(DisconnectReason::Fault { message })
                        .await;
                });
                JobOutcome::Stop
            }
        }
    }

    async fn watch_once(self: &Arc<Self>, token: &CancellationToken) -> Result<(), ClientError> {
        let profile = self.preferences().await;
        let watcher = DirectoryWatcher::new(&profile.local_dir, self.config.watch_debounce());
        let end = watcher
            .run(token, |batch| self.apply_local_changes(&profile.local_dir, batch))
            .await?;
        if end == WatchEnd::RootRecreated {
            tracing::info!("Local directory recreated, watch restarts next period");
        }
        Ok(())
    }

    async fn apply_local_changes(
        self: &Arc<Self>,
        root: &Path,
        batch: Vec<LocalChange>,
    ) -> Result<(), ClientError> {
        self.sink.refresh_file_tree();
        for change in batch {
            let path = root.join(&change.relative);
            match change.kind {
                ChangeKind::Upsert => {
                    self.push_change(&path).await?;
                }
                ChangeKind::Removed => self.delete_remote(&path).await?,
            }
        }
        Ok(())
    }
}

fn resolve_local(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || path.starts_with(root) {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::prefs::MemoryPreferenceStore;
    use crate::transport::MockConnector;
    use boxsync_core::state::{DISCONNECTED_MESSAGE, LOGGED_IN_MESSAGE};
    use boxsync_core::JobSchedule;
    use boxsync_types::frame::{read_request, write_count, write_len, write_reply};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream};

    struct Harness {
        session: Arc<ClientSession<MockConnector>>,
        connector: MockConnector,
        sink: Arc<RecordingSink>,
        store: Arc<MemoryPreferenceStore>,
        root: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn idle_jobs() -> JobSchedule {
        JobSchedule {
            start_delay_ms: 3_600_000,
            period_ms: 3_600_000,
        }
    }

    fn harness_with(config: ClientConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("alice");
        let connector = MockConnector::new();
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(MemoryPreferenceStore::default());
        let session = ClientSession::new(
            connector.clone(),
            config,
            Preferences::new("alice", &root),
            store.clone(),
            sink.clone(),
        );
        Harness {
            session,
            connector,
            sink,
            store,
            root,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        let mut config = ClientConfig::default();
        config.jobs.watcher = idle_jobs();
        config.jobs.user_list = idle_jobs();
        config.jobs.share_poll = idle_jobs();
        harness_with(config)
    }

    async fn wait_for_state(session: &ClientSession<MockConnector>, want: SessionState) {
        let mut rx = session.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .unwrap();
    }

    async fn write_file_stream(relay: &mut DuplexStream, files: &[(&str, &[u8])]) {
        write_count(relay, files.len()).await.unwrap();
        for (name, body) in files {
            write_len(relay, body.len() as u64).await.unwrap();
            write_string(relay, name).await.unwrap();
            relay.write_all(body).await.unwrap();
        }
    }

    /// Play the relay side of a successful login.
    async fn accept_login(relay: &mut DuplexStream, roster: &str, files: &[(&str, &[u8])]) -> String {
        let name = read_string(relay).await.unwrap();
        write_reply(relay, Reply::Welcome).await.unwrap();
        assert_eq!(read_request(relay).await.unwrap(), Request::ListUsers);
        write_string(relay, roster).await.unwrap();
        assert_eq!(read_request(relay).await.unwrap(), Request::PollFiles);
        write_reply(relay, Reply::FilesFollow).await.unwrap();
        write_file_stream(relay, files).await;
        name
    }

    async fn logged_in(h: &Harness) -> DuplexStream {
        assert!(h.session.connect().await);
        let mut relay = h.connector.wait_for_peer().await;
        accept_login(&mut relay, "alice,bob", &[]).await;
        wait_for_state(&h.session, SessionState::Active).await;
        // Let the login task finish arming jobs
        tokio::time::sleep(Duration::from_millis(10)).await;
        relay
    }

    // ===== Connect Tests =====

    #[tokio::test]
    async fn connect_failure_returns_false() {
        let h = harness();
        h.connector.fail_next_connect("refused");

        assert!(!h.session.connect().await);
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.store.save_count(), 0);
        assert_eq!(h.sink.notifications()[0].0, Severity::Error);
    }

    #[tokio::test]
    async fn login_sequence_syncs_and_arms_jobs() {
        let h = harness();
        assert!(h.session.connect().await);
        assert_eq!(h.store.save_count(), 1);

        let mut relay = h.connector.wait_for_peer().await;
        let name = accept_login(
            &mut relay,
            "alice,bob,carol",
            &[("notes.txt", b"hello"), ("docs/plan.md", b"# plan")],
        )
        .await;
        wait_for_state(&h.session, SessionState::Active).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(name, "alice");
        assert_eq!(
            h.sink.last_user_list().unwrap(),
            vec!["Me".to_string(), "bob".into(), "carol".into()]
        );
        assert_eq!(std::fs::read(h.root.join("notes.txt")).unwrap(), b"hello");
        assert_eq!(std::fs::read(h.root.join("docs/plan.md")).unwrap(), b"# plan");
        assert!(h.sink.saw(LOGGED_IN_MESSAGE));
        assert!(h.sink.refresh_count() >= 1);
        assert_eq!(h.session.jobs().live_count(), 3);
    }

    #[tokio::test]
    async fn second_connect_is_refused() {
        let h = harness();
        let _relay = logged_in(&h).await;
        assert!(!h.session.connect().await);
        assert_eq!(h.connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn taken_name_tears_down() {
        let h = harness();
        assert!(h.session.connect().await);
        let mut relay = h.connector.wait_for_peer().await;
        read_string(&mut relay).await.unwrap();
        write_reply(&mut relay, Reply::NameTaken).await.unwrap();

        wait_for_state(&h.session, SessionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.sink.saw("Error, username already in use!"));
        assert!(!h.sink.saw(DISCONNECTED_MESSAGE));
        assert_eq!(h.sink.clear_count(), 1);
        assert_eq!(h.session.jobs().live_count(), 0);
    }

    #[tokio::test]
    async fn unexpected_poll_reply_is_fatal() {
        let h = harness();
        assert!(h.session.connect().await);
        let mut relay = h.connector.wait_for_peer().await;
        read_string(&mut relay).await.unwrap();
        write_reply(&mut relay, Reply::Welcome).await.unwrap();
        read_request(&mut relay).await.unwrap();
        write_string(&mut relay, "alice").await.unwrap();
        read_request(&mut relay).await.unwrap();
        write_reply(&mut relay, Reply::PushAck).await.unwrap();

        wait_for_state(&h.session, SessionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.sink.saw("Couldn't sync files with server!"));
        assert!(h.sink.saw(DISCONNECTED_MESSAGE));

        // Socket closed from our side
        let mut buf = [0u8; 1];
        assert_eq!(relay.read(&mut buf).await.unwrap(), 0);
    }

    // ===== Exchange Tests =====

    #[tokio::test]
    async fn push_change_streams_files() {
        let h = harness();
        let mut relay = logged_in(&h).await;
        std::fs::create_dir_all(h.root.join("photos")).unwrap();
        std::fs::write(h.root.join("photos/a.jpg"), b"jpeg-a").unwrap();
        std::fs::write(h.root.join("photos/b.jpg"), b"jpeg-bb").unwrap();

        let session = h.session.clone();
        let target = h.root.join("photos");
        let push = tokio::spawn(async move { session.push_change(&target).await });

        assert_eq!(read_request(&mut relay).await.unwrap(), Request::PushFiles);
        write_reply(&mut relay, Reply::PushAck).await.unwrap();
        let landing = tempfile::tempdir().unwrap();
        let entries = receive_files(&mut relay, landing.path()).await.unwrap();

        assert_eq!(push.await.unwrap().unwrap(), 2);
        assert_eq!(entries[0].path, "photos/a.jpg");
        assert_eq!(
            std::fs::read(landing.path().join("photos/b.jpg")).unwrap(),
            b"jpeg-bb"
        );
    }

    #[tokio::test]
    async fn push_of_nothing_sends_nothing() {
        let h = harness();
        let mut relay = logged_in(&h).await;

        let sent = h.session.push_change(Path::new("missing")).await.unwrap();
        assert_eq!(sent, 0);

        let mut buf = [0u8; 4];
        let idle = tokio::time::timeout(Duration::from_millis(50), relay.read_exact(&mut buf)).await;
        assert!(idle.is_err());
    }

    #[tokio::test]
    async fn push_rejects_wrong_ack() {
        let h = harness();
        let mut relay = logged_in(&h).await;
        std::fs::write(h.root.join("a.txt"), b"a").unwrap();

        let session = h.session.clone();
        let push = tokio::spawn(async move { session.push_change(Path::new("a.txt")).await });
        read_request(&mut relay).await.unwrap();
        write_reply(&mut relay, Reply::DeleteAck).await.unwrap();

        let err = push.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::Push(msg) if msg.contains("protocol violation")));

        // The stream is out of step; the session must not stay up on it
        wait_for_state(&h.session, SessionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.sink.saw(JobKind::DirectoryWatcher.failure_message()));
        assert_eq!(h.session.jobs().live_count(), 0);
        let mut buf = [0u8; 1];
        assert_eq!(relay.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_remote_sends_relative_path() {
        let h = harness();
        let mut relay = logged_in(&h).await;

        let session = h.session.clone();
        let target = h.root.join("docs").join("old.txt");
        let delete = tokio::spawn(async move { session.delete_remote(&target).await });

        assert_eq!(read_request(&mut relay).await.unwrap(), Request::DeleteFile);
        write_reply(&mut relay, Reply::DeleteAck).await.unwrap();
        assert_eq!(read_string(&mut relay).await.unwrap(), "docs/old.txt");
        delete.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn poll_with_nothing_pending() {
        let h = harness();
        let mut relay = logged_in(&h).await;
        let refreshes = h.sink.refresh_count();

        let session = h.session.clone();
        let poll = tokio::spawn(async move { session.poll_shares().await });
        assert_eq!(read_request(&mut relay).await.unwrap(), Request::PollFiles);
        write_reply(&mut relay, Reply::NothingPending).await.unwrap();

        assert!(poll.await.unwrap().unwrap().is_empty());
        assert_eq!(h.sink.refresh_count(), refreshes);
    }

    #[tokio::test]
    async fn poll_delivers_shared_files_under_sharer() {
        let h = harness();
        let mut relay = logged_in(&h).await;

        let session = h.session.clone();
        let poll = tokio::spawn(async move { session.poll_shares().await });
        read_request(&mut relay).await.unwrap();
        write_reply(&mut relay, Reply::FilesFollow).await.unwrap();
        write_file_stream(&mut relay, &[("bob/report.pdf", b"%PDF")]).await;

        let entries = poll.await.unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read(h.root.join("bob/report.pdf")).unwrap(), b"%PDF");
    }

    #[tokio::test]
    async fn share_request_reports_success() {
        let h = harness();
        let mut relay = logged_in(&h).await;

        h.session
            .request_share("report.pdf".to_string(), "bob".to_string());
        assert_eq!(
            read_request(&mut relay).await.unwrap(),
            Request::RegisterShare
        );
        write_reply(&mut relay, Reply::ShareAck).await.unwrap();
        assert_eq!(read_string(&mut relay).await.unwrap(), "report.pdf");
        assert_eq!(read_string(&mut relay).await.unwrap(), "bob");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h
            .sink
            .saw("Successfully shared file report.pdf with user bob."));
    }

    #[tokio::test]
    async fn exchange_timeout_fails_exchange() {
        let mut config = ClientConfig::default();
        config.exchange_timeout_secs = 1;
        config.jobs.watcher = idle_jobs();
        config.jobs.user_list = idle_jobs();
        config.jobs.share_poll = idle_jobs();
        let h = harness_with(config);
        let mut relay = logged_in(&h).await;

        let session = h.session.clone();
        let list = tokio::spawn(async move { session.fetch_user_list().await });
        assert_eq!(read_request(&mut relay).await.unwrap(), Request::ListUsers);
        // Never answer

        let err = tokio::time::timeout(Duration::from_secs(3), list)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ClientError::List(_)));
        wait_for_state(&h.session, SessionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.sink.saw("Couldn't get list of users!"));
        assert!(h.sink.saw(DISCONNECTED_MESSAGE));
    }

    #[tokio::test]
    async fn late_answer_after_timeout_is_never_read() {
        let mut config = ClientConfig::default();
        config.exchange_timeout_secs = 1;
        config.jobs.watcher = idle_jobs();
        config.jobs.user_list = idle_jobs();
        config.jobs.share_poll = idle_jobs();
        let h = harness_with(config);
        let mut relay = logged_in(&h).await;

        let session = h.session.clone();
        let list = tokio::spawn(async move { session.fetch_user_list().await });
        read_request(&mut relay).await.unwrap();
        list.await.unwrap().unwrap_err();

        // The relay answers too late; nothing may pick those bytes up
        let _ = write_string(&mut relay, "alice,bob").await;
        let err = h.session.poll_shares().await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
        assert_eq!(h.session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn manual_delete_with_wrong_ack_ends_session() {
        let h = harness();
        let mut relay = logged_in(&h).await;

        let session = h.session.clone();
        let delete = tokio::spawn(async move { session.delete_remote(Path::new("old.txt")).await });
        assert_eq!(read_request(&mut relay).await.unwrap(), Request::DeleteFile);
        write_reply(&mut relay, Reply::ShareAck).await.unwrap();

        assert!(matches!(
            delete.await.unwrap().unwrap_err(),
            ClientError::Delete(_)
        ));
        wait_for_state(&h.session, SessionState::Disconnected).await;
        assert!(h.session.fetch_user_list().await.is_err());
    }

    // ===== Teardown Tests =====

    #[tokio::test]
    async fn requested_disconnect_closes_everything() {
        let h = harness();
        let mut relay = logged_in(&h).await;

        h.session.disconnect(DisconnectReason::Requested).await;

        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert_eq!(h.session.jobs().live_count(), 0);
        assert!(h.sink.saw(DISCONNECTED_MESSAGE));
        assert_eq!(h.sink.clear_count(), 1);
        let mut buf = [0u8; 1];
        assert_eq!(relay.read(&mut buf).await.unwrap(), 0);

        // Second disconnect is a no-op
        h.session.disconnect(DisconnectReason::Requested).await;
        assert_eq!(h.sink.clear_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_interrupts_blocked_exchange() {
        let h = harness();
        let mut relay = logged_in(&h).await;

        let session = h.session.clone();
        let list = tokio::spawn(async move { session.fetch_user_list().await });
        read_request(&mut relay).await.unwrap();

        h.session.disconnect(DisconnectReason::Requested).await;
        let err = list.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn shutdown_is_silent() {
        let h = harness();
        let _relay = logged_in(&h).await;

        h.session.shutdown().await;
        assert_eq!(h.session.state(), SessionState::Disconnected);
        assert!(!h.sink.saw(DISCONNECTED_MESSAGE));
    }

    // ===== Job Tests =====

    #[tokio::test]
    async fn busy_gate_skips_poll_firing() {
        let mut config = ClientConfig::default();
        config.jobs.watcher = idle_jobs();
        config.jobs.user_list = idle_jobs();
        config.jobs.share_poll = JobSchedule {
            start_delay_ms: 50,
            period_ms: 40,
        };
        let h = harness_with(config);
        let mut relay = logged_in(&h).await;

        let pass = h.session.gate().enter().await.unwrap();
        let mut code = [0u8; 4];
        let quiet =
            tokio::time::timeout(Duration::from_millis(150), relay.read_exact(&mut code)).await;
        assert!(quiet.is_err(), "poll ran while the gate was held");
        drop(pass);

        assert_eq!(read_request(&mut relay).await.unwrap(), Request::PollFiles);
        write_reply(&mut relay, Reply::NothingPending).await.unwrap();
        assert!(h.session.jobs().is_live(JobKind::SharePoll));
    }

    #[tokio::test]
    async fn failing_poll_disconnects() {
        let mut config = ClientConfig::default();
        config.jobs.watcher = idle_jobs();
        config.jobs.share_poll = idle_jobs();
        config.jobs.user_list = JobSchedule {
            start_delay_ms: 10,
            period_ms: 1000,
        };
        let h = harness_with(config);
        let relay = logged_in(&h).await;

        drop(relay);
        wait_for_state(&h.session, SessionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.sink.saw("Couldn't get list of users!"));
        assert_eq!(h.session.jobs().live_count(), 0);
    }

    #[test]
    fn error_fault_messages() {
        assert_eq!(
            ClientError::Sync("x".into()).fault_message(),
            "Couldn't sync files with server!"
        );
        assert_eq!(
            ClientError::Introduce("username already in use".into()).fault_message(),
            "Error, username already in use!"
        );
    }

    #[test]
    fn resolve_local_paths() {
        let root = Path::new("/box/alice");
        assert_eq!(resolve_local(root, Path::new("a.txt")), root.join("a.txt"));
        assert_eq!(
            resolve_local(root, &root.join("b.txt")),
            PathBuf::from("/box/alice/b.txt")
        );
    }
}
