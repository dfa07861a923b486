//! Presentation callbacks.
//!
//! The session reports progress through an [`EventSink`]. Callbacks may arrive
//! from any task; implementations marshal onto their own context.

use std::sync::Mutex;

pub use boxsync_core::Severity;

/// Receives user-facing events from a client session.
pub trait EventSink: Send + Sync {
    /// Show a notification.
    fn notify(&self, severity: Severity, message: &str);

    /// The local root changed; redraw any view of it.
    fn refresh_file_tree(&self);

    /// New roster, own entry first as the self marker.
    fn update_user_list(&self, users: &[String]);

    /// The session ended; reset views.
    fn clear_environment(&self);
}

/// Sink that records every callback, for tests and headless runs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    inner: Mutex<Recorded>,
}

#[derive(Debug, Default, Clone)]
struct Recorded {
    notifications: Vec<(Severity, String)>,
    user_lists: Vec<Vec<String>>,
    refreshes: usize,
    clears: usize,
}

impl RecordingSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notification so far, oldest first.
    pub fn notifications(&self) -> Vec<(Severity, String)> {
        self.inner.lock().unwrap().notifications.clone()
    }

    /// Whether a notification with this exact message was seen.
    pub fn saw(&self, message: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .notifications
            .iter()
            .any(|(_, m)| m == message)
    }

    /// The most recent roster.
    pub fn last_user_list(&self) -> Option<Vec<String>> {
        self.inner.lock().unwrap().user_lists.last().cloned()
    }

    /// How many times the file tree was refreshed.
    pub fn refresh_count(&self) -> usize {
        self.inner.lock().unwrap().refreshes
    }

    /// How many times the environment was cleared.
    pub fn clear_count(&self) -> usize {
        self.inner.lock().unwrap().clears
    }
}

impl EventSink for RecordingSink {
    fn notify(&self, severity: Severity, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.notifications.push((severity, message.to_string()));
    }

    fn refresh_file_tree(&self) {
        self.inner.lock().unwrap().refreshes += 1;
    }

    fn update_user_list(&self, users: &[String]) {
        self.inner.lock().unwrap().user_lists.push(users.to_vec());
    }

    fn clear_environment(&self) {
        self.inner.lock().unwrap().clears += 1;
    }
}
