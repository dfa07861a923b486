//! Main SyncRelay server coordination.
//!
//! SyncRelay owns the user registry, the accept loop and the per-user
//! workers. The introduce sequence runs inline on the accept loop; each
//! admitted user then gets a dedicated worker task.

use crate::config::Config;
use crate::error::Result;
use crate::registry::UserRegistry;
use crate::session::{self, RelayStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Thread-safe via `AtomicU64`, no locks needed for incrementing.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted (before the introduce sequence).
    pub connections_total: AtomicU64,
    /// Introduces refused (taken or invalid name, timeout, broken sequence).
    pub handshakes_rejected: AtomicU64,
    /// Files received from pushes.
    pub files_received: AtomicU64,
    /// File bytes received from pushes.
    pub bytes_received: AtomicU64,
    /// Files sent (initial sync and share delivery).
    pub files_sent: AtomicU64,
    /// File bytes sent.
    pub bytes_sent: AtomicU64,
    /// Shares queued for a recipient.
    pub shares_registered: AtomicU64,
    /// Sessions ended by a protocol or I/O error.
    pub errors_total: AtomicU64,
}

impl RelayMetrics {
    /// Add a completed transfer to the sent counters.
    pub fn record_sent(&self, files: usize, bytes: u64) {
        self.files_sent.fetch_add(files as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add a completed transfer to the received counters.
    pub fn record_received(&self, files: usize, bytes: u64) {
        self.files_received.fetch_add(files as u64, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Log all counters at info level.
    pub fn log_summary(&self) {
        tracing::info!(
            "Relay metrics: connections={} rejected={} files_in={} bytes_in={} files_out={} bytes_out={} shares={} errors={}",
            self.connections_total.load(Ordering::Relaxed),
            self.handshakes_rejected.load(Ordering::Relaxed),
            self.files_received.load(Ordering::Relaxed),
            self.bytes_received.load(Ordering::Relaxed),
            self.files_sent.load(Ordering::Relaxed),
            self.bytes_sent.load(Ordering::Relaxed),
            self.shares_registered.load(Ordering::Relaxed),
            self.errors_total.load(Ordering::Relaxed),
        );
    }
}

/// Main relay server.
#[derive(Debug)]
pub struct SyncRelay {
    config: Config,
    registry: UserRegistry,
    metrics: RelayMetrics,
    workers: TaskTracker,
    shutdown: CancellationToken,
}

impl SyncRelay {
    /// Create a new SyncRelay with the given config.
    pub fn new(config: Config) -> Arc<Self> {
        let registry = UserRegistry::new(config.storage.root.clone());
        Arc::new(Self {
            config,
            registry,
            metrics: RelayMetrics::default(),
            workers: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the user registry.
    pub fn registry(&self) -> &UserRegistry {
        &self.registry
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.server.bind_address).await?;
        Ok(listener)
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called.
    ///
    /// Each accept waits at most `accept_poll_ms`, so shutdown is noticed promptly.
    pub async fn run(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        tokio::fs::create_dir_all(self.registry.root()).await?;
        tracing::info!(
            "Serving user directories under {}",
            self.registry.root().display()
        );

        let poll = self.config.server.accept_poll();
        while !self.shutdown.is_cancelled() {
            let (stream, peer) = match tokio::time::timeout(poll, listener.accept()).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    tracing::warn!("Couldn't handle new client connection request: {}", e);
                    continue;
                }
                Ok(Ok(accepted)) => accepted,
            };

            self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!("Couldn't set TCP_NODELAY for {}: {}", peer, e);
            }
            self.admit(stream, peer.to_string()).await;
        }

        tracing::info!("Accept loop stopped");
        Ok(())
    }

    /// Run the introduce sequence on `stream` and, on success, spawn the
    /// user's worker.
    pub async fn admit<S: RelayStream>(self: &Arc<Self>, mut stream: S, peer: String) {
        tracing::debug!("New connection from {}", peer);
        match session::handshake(self, &mut stream).await {
            Ok(user) => {
                let relay = Arc::clone(self);
                self.workers
                    .spawn(async move { session::serve_user(relay, stream, user).await });
            }
            Err(e) => {
                self.metrics.handshakes_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Couldn't add new user from {}: {}", peer, e);
            }
        }
    }

    /// Stop accepting, cancel every worker and wait for them up to the grace period.
    pub async fn shutdown(&self) {
        tracing::info!("Disconnecting server...");
        self.shutdown.cancel();
        self.registry.cancel_all();
        self.workers.close();

        let grace = self.config.server.shutdown_grace();
        if tokio::time::timeout(grace, self.workers.wait()).await.is_err() {
            tracing::warn!("User workers still running after {:?}", grace);
        }

        self.metrics.log_summary();
        tracing::info!("Server disconnected successfully.");
    }
}
