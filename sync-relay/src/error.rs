//! Error types for sync-relay.

use sync_types::{Request, WireError};

/// Main error type for sync-relay operations.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A shared file could not be found under the sharer's directory.
    #[error("file not found for {username}: {path}")]
    NotFound {
        /// The user whose directory was searched.
        username: String,
        /// The requested file.
        path: String,
    },

    /// Share target is not connected.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Filesystem failure under the storage root.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol layer errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Framing or transfer failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Another session already uses this name.
    #[error("username already in use: {0}")]
    UsernameTaken(String),

    /// Introduce carried no name.
    #[error("empty username")]
    EmptyUsername,

    /// Name cannot be used as a directory name.
    #[error("invalid username: {0}")]
    InvalidUsername(String),

    /// The peer sent a request other than the one the sequence expects.
    #[error("unexpected request: expected {expected:?}, got {actual:?}")]
    UnexpectedRequest {
        /// Request the sequence required.
        expected: Request,
        /// Request actually received.
        actual: Request,
    },

    /// The introduce sequence did not finish in time.
    #[error("handshake timed out after {0}s")]
    HandshakeTimeout(u64),

    /// Storage failure while serving a request.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ProtocolError {
    /// Whether the peer simply went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Wire(WireError::Io(e)) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        Self::Wire(WireError::Io(e))
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
