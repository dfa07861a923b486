//! Client session state machine for boxsync.
//!
//! This module provides a pure, side-effect-free state machine for the client
//! session lifecycle. The state machine takes events as input and produces a
//! new state plus a list of actions to execute.
//!
//! The actual I/O (opening sockets, exchanging files, arming jobs) is
//! performed by sync-client, not by this module.

/// Message shown once the login sequence completes.
pub const LOGGED_IN_MESSAGE: &str = "Successfully logged-in.";

/// Message shown after any disconnect that is not part of process exit.
pub const DISCONNECTED_MESSAGE: &str = "You have been disconnected!";

/// Client session state - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No connection to the relay.
    #[default]
    Disconnected,
    /// Transport open, username not yet accepted.
    Connected,
    /// Username accepted, initial sync in progress.
    Introduced,
    /// Logged in; recurring jobs are running.
    Active,
}

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Informational.
    Info,
    /// Something went wrong but the session continues.
    Warning,
    /// The operation (and usually the session) failed.
    Error,
}

/// Why the session is being torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The user asked to disconnect.
    Requested,
    /// An exchange or job failed.
    Fault {
        /// User-facing description of the failure.
        message: String,
    },
    /// The process is exiting; nobody is left to notify.
    OnExit,
}

impl SessionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Disconnected
            (Self::Disconnected, Event::TransportOpened) => (
                Self::Connected,
                vec![Action::SavePreferences, Action::SpawnBoot],
            ),
            (Self::Disconnected, Event::TransportFailed { error }) => (
                Self::Disconnected,
                vec![Action::Notify {
                    severity: Severity::Error,
                    message: format!("Couldn't connect to server: {}", error),
                }],
            ),

            // From Connected
            (Self::Connected, Event::Welcomed) => (Self::Introduced, vec![]),
            (Self::Connected, Event::Rejected { error }) => (
                Self::Disconnected,
                vec![
                    Action::CancelJobs,
                    Action::CloseTransport,
                    Action::ClearEnvironment,
                    Action::Notify {
                        severity: Severity::Error,
                        message: format!("Error, {}!", error),
                    },
                ],
            ),

            // From Introduced
            (Self::Introduced, Event::LoggedIn) => (
                Self::Active,
                vec![
                    Action::Notify {
                        severity: Severity::Info,
                        message: LOGGED_IN_MESSAGE.into(),
                    },
                    Action::ArmJobs,
                ],
            ),

            // Any connected state
            (state, Event::Disconnect { reason }) if state.is_connected() => {
                let mut actions = vec![
                    Action::CancelJobs,
                    Action::CloseTransport,
                    Action::ClearEnvironment,
                ];
                match reason {
                    DisconnectReason::OnExit => {}
                    DisconnectReason::Requested => actions.push(Action::Notify {
                        severity: Severity::Info,
                        message: DISCONNECTED_MESSAGE.into(),
                    }),
                    DisconnectReason::Fault { message } => {
                        actions.push(Action::Notify {
                            severity: Severity::Error,
                            message,
                        });
                        actions.push(Action::Notify {
                            severity: Severity::Info,
                            message: DISCONNECTED_MESSAGE.into(),
                        });
                    }
                }
                (Self::Disconnected, actions)
            }

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Whether a transport is currently held.
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    /// Whether the login sequence has completed.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Events that can occur in the session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Transport connection succeeded.
    TransportOpened,
    /// Transport connection failed.
    TransportFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The relay accepted our username.
    Welcomed,
    /// The relay refused our username, or answered the introduce with garbage.
    Rejected {
        /// Error message describing the refusal.
        error: String,
    },
    /// Roster fetched and initial sync completed.
    LoggedIn,
    /// Tear the session down.
    Disconnect {
        /// Why.
        reason: DisconnectReason,
    },
}

/// Actions to be executed by the sync-client.
///
/// These are instructions, not side effects. The sync-client interprets
/// these and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Persist the current preferences.
    SavePreferences,
    /// Start the login sequence on the one-shot pool.
    SpawnBoot,
    /// Arm the recurring jobs.
    ArmJobs,
    /// Cancel every recurring job.
    CancelJobs,
    /// Drop the transport.
    CloseTransport,
    /// Reset the presentation layer.
    ClearEnvironment,
    /// Show a notification to the user.
    Notify {
        /// How serious.
        severity: Severity,
        /// What to show.
        message: String,
    },
}
