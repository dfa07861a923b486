//! # sync-client
//!
//! Client library for boxsync.
//!
//! A [`ClientSession`] keeps one local directory mirrored with the relay:
//! it logs in, pulls the full snapshot, then runs three recurring jobs
//! (directory watcher, roster refresh, share poll) until disconnected.
//!
//! ## Features
//!
//! - **Concurrency Gate**: one protocol exchange in flight per session
//! - **Recurring Jobs**: cancellable, fixed-delay, at most one task per kind
//! - **Transport Abstraction**: Pluggable connector (TCP, mock)
//! - **Pure State Machine**: Uses sync-core for side-effect-free lifecycle logic
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{ClientConfig, ClientSession, Preferences, TcpConnector};
//!
//! let config = ClientConfig::default();
//! let connector = TcpConnector::new(config.relay_address.clone());
//! let session = ClientSession::new(connector, config, prefs, store, sink);
//!
//! session.connect().await;
//! session.request_share("report.pdf".into(), "bob".into());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod events;
pub mod gate;
pub mod jobs;
pub mod prefs;
pub mod transport;
pub mod watcher;

pub use boxsync_core::{DisconnectReason, JobKind, SessionState, Severity};
pub use client::{ClientError, ClientSession};
pub use config::{ClientConfig, ConfigError, JobsConfig};
pub use events::{EventSink, RecordingSink};
pub use gate::{Gate, GateClosed, GatePass};
pub use jobs::{JobOutcome, JobScheduler};
pub use prefs::{MemoryPreferenceStore, PreferenceStore, Preferences};
pub use transport::{BoxedStream, Connector, MockConnector, TcpConnector, TransportError};
pub use watcher::{ChangeKind, DirectoryWatcher, LocalChange, WatchEnd};
