//! # sync-core
//!
//! Pure logic for boxsync (no I/O, instant tests).
//!
//! This crate holds the client session state machine, the roster encoding and
//! the recurring job definitions without any network or disk I/O.
//!
//! The actual I/O (network, disk, timers) is performed by `sync-client`,
//! which interprets the actions produced by these modules.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod jobs;
pub mod roster;
pub mod state;

pub use jobs::{JobKind, JobSchedule};
pub use roster::{join_roster, parse_roster, SELF_MARKER};
pub use state::{Action, DisconnectReason, Event, SessionState, Severity};
