//! Transport abstraction for boxsync.
//!
//! The protocol runs over a single ordered byte stream per session. A
//! [`Connector`] opens that stream; everything above it only sees
//! [`AsyncRead`] + [`AsyncWrite`].
//!
//! # Example
//!
//! ```ignore
//! let connector = TcpConnector::new("127.0.0.1:59090");
//! let stream = connector.connect().await?;
//! ```

mod mock;

pub use mock::MockConnector;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// A bidirectional byte stream carrying one session.
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SessionStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed session stream, as held by the client.
pub type BoxedStream = Box<dyn SessionStream>;

/// Opens session streams to a relay.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new stream.
    async fn connect(&self) -> Result<BoxedStream, TransportError>;

    /// Human-readable description of the remote end, for logs.
    fn describe(&self) -> String;
}

/// Plain TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    timeout: std::time::Duration,
}

impl TcpConnector {
    /// Connect to `address` (`host:port`) with a 10 second connect timeout.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: std::time::Duration::from_secs(10),
        }
    }

    /// Override the connect timeout.
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<BoxedStream, TransportError> {
        let stream = tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.address))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.address, e)))?;
        stream
            .set_nodelay(true)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String {
        self.address.clone()
    }
}
