//! Terminal front end: event sink and interactive commands.

use boxsync_client::{EventSink, Severity};
use std::path::PathBuf;
use std::sync::Mutex;

/// Prints session events to stdout.
///
/// The roster is printed only when it changes, since the user-list job
/// refreshes it every few seconds.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    roster: Mutex<Vec<String>>,
}

impl ConsoleSink {
    /// Create a sink with an empty roster.
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for ConsoleSink {
    fn notify(&self, severity: Severity, message: &str) {
        let tag = match severity {
            Severity::Info => "info",
            Severity::Warning => "warn",
            Severity::Error => "error",
        };
        println!("[{}] {}", tag, message);
    }

    fn refresh_file_tree(&self) {
        tracing::debug!("Local file tree changed");
    }

    fn update_user_list(&self, users: &[String]) {
        let Ok(mut roster) = self.roster.lock() else {
            return;
        };
        if roster.as_slice() != users {
            *roster = users.to_vec();
            println!("Users online: {}", users.join(", "));
        }
    }

    fn clear_environment(&self) {
        if let Ok(mut roster) = self.roster.lock() {
            roster.clear();
        }
        println!("Session closed.");
    }
}

/// A line typed at the `run` prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `share <file> <user>`
    Share {
        /// File relative to the local directory.
        file: String,
        /// Recipient username.
        user: String,
    },
    /// `push <path>`
    Push(PathBuf),
    /// `delete <path>`
    Delete(PathBuf),
    /// `users`
    Users,
    /// `connect`
    Connect,
    /// `disconnect`
    Disconnect,
    /// `status`
    Status,
    /// `help`
    Help,
    /// `quit` or `exit`
    Quit,
    /// Blank line.
    Empty,
}

impl ConsoleCommand {
    /// Parse one input line.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(Self::Empty);
        };
        let rest: Vec<&str> = words.collect();

        match (verb, rest.as_slice()) {
            ("share", [file, user]) => Ok(Self::Share {
                file: file.to_string(),
                user: user.to_string(),
            }),
            ("share", _) => Err("usage: share <file> <user>".to_string()),
            ("push", [path]) => Ok(Self::Push(PathBuf::from(path))),
            ("push", _) => Err("usage: push <path>".to_string()),
            ("delete", [path]) => Ok(Self::Delete(PathBuf::from(path))),
            ("delete", _) => Err("usage: delete <path>".to_string()),
            ("users", []) => Ok(Self::Users),
            ("connect", []) => Ok(Self::Connect),
            ("disconnect", []) => Ok(Self::Disconnect),
            ("status", []) => Ok(Self::Status),
            ("help" | "?", []) => Ok(Self::Help),
            ("quit" | "exit", []) => Ok(Self::Quit),
            (other, _) => Err(format!("unknown command '{}' (try 'help')", other)),
        }
    }
}

/// Text printed for `help`.
pub const HELP: &str = "\
Commands:
  share <file> <user>  send a file from your box to another user
  push <path>          upload a file or directory now
  delete <path>        remove a path from your box on the relay
  users                refresh the list of connected users
  connect              reconnect after a disconnect
  disconnect           leave the relay, keep the program running
  status               show the session state
  quit                 disconnect and exit";
