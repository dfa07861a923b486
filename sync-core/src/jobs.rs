//! Recurring job definitions.
//!
//! The client runs three jobs once logged in. This module only describes
//! them; sync-client owns the timers and tasks.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// The recurring jobs a client session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Watches the local root and pushes or deletes changes.
    DirectoryWatcher,
    /// Refreshes the roster.
    UserListPoll,
    /// Pulls files other participants shared with us.
    SharePoll,
}

impl JobKind {
    /// All job kinds, in arming order.
    pub const ALL: [JobKind; 3] = [
        JobKind::SharePoll,
        JobKind::UserListPoll,
        JobKind::DirectoryWatcher,
    ];

    /// Default start delay and period for this job.
    pub fn default_schedule(self) -> JobSchedule {
        match self {
            Self::DirectoryWatcher => JobSchedule::from_secs(3, 4),
            Self::UserListPoll => JobSchedule::from_secs(1, 4),
            Self::SharePoll => JobSchedule::from_secs(2, 4),
        }
    }

    /// Whether a firing should be skipped when the gate stays busy for a whole period.
    ///
    /// Polls are idempotent and will run again next period; the watcher
    /// carries local changes and must not drop them.
    pub fn skips_when_busy(self) -> bool {
        !matches!(self, Self::DirectoryWatcher)
    }

    /// Message shown when this job fails and the session is torn down.
    pub fn failure_message(self) -> &'static str {
        match self {
            Self::DirectoryWatcher => "You are going to be logged out now!",
            Self::UserListPoll => "Couldn't get list of users!",
            Self::SharePoll => "Couldn't establish a connection with server!",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DirectoryWatcher => "dir-watcher",
            Self::UserListPoll => "user-list",
            Self::SharePoll => "share-poll",
        };
        f.write_str(name)
    }
}

/// Fixed-delay schedule: first run after `start_delay_ms`, then every `period_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct JobSchedule {
    /// Delay before the first firing.
    pub start_delay_ms: u64,
    /// Delay between the end of one firing and the start of the next.
    pub period_ms: u64,
}

impl JobSchedule {
    /// Build from whole seconds.
    pub const fn from_secs(start_delay: u64, period: u64) -> Self {
        Self {
            start_delay_ms: start_delay * 1000,
            period_ms: period * 1000,
        }
    }

    /// Start delay as a [`Duration`].
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    /// Period as a [`Duration`]. Never zero.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(1))
    }
}
