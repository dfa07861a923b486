//! # sync-relay
//!
//! Relay server for boxsync.
//!
//! This crate implements the central node that:
//! - Accepts TCP connections and admits each participant by username
//! - Keeps one directory per participant and streams it on login
//! - Applies pushed creates, modifications and deletes
//! - Queues one-off shares and delivers them on the target's next poll
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │       TCP          │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │        sync-relay          │
//!        │  ┌─────────────────────┐   │
//!        │  │ UserRegistry        │   │
//!        │  │  <root>/<username>  │   │
//!        │  └─────────────────────┘   │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! After the introduce sequence (username → Welcome, ListUsers, PollFiles),
//! each user's worker answers:
//! - ListUsers → roster
//! - PushFiles → PushAck + file stream
//! - DeleteFile → DeleteAck + path
//! - PollFiles → FilesFollow + shared files, or NothingPending
//! - RegisterShare → ShareAck + file name and target

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError};
pub use error::{ProtocolError, RelayError, StorageError};
pub use registry::{RegistryEvent, SharedFile, UserRecord, UserRegistry, UserTree};
pub use server::{RelayMetrics, SyncRelay};
