//! Mock connector for testing.
//!
//! Each successful `connect()` creates an in-memory duplex pipe. The client
//! gets one end; the test takes the other with [`MockConnector::take_peer`]
//! and plays the relay.

use super::{BoxedStream, Connector, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Mock connector for testing.
#[derive(Debug, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<MockConnectorInner>>,
}

#[derive(Debug, Default)]
struct MockConnectorInner {
    connects: usize,
    peers: VecDeque<DuplexStream>,
    fail_next_connect: Option<String>,
}

impl MockConnector {
    /// Create a new mock connector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the relay end of the oldest pipe not yet claimed.
    pub fn take_peer(&self) -> Option<DuplexStream> {
        let mut inner = self.inner.lock().unwrap();
        inner.peers.pop_front()
    }

    /// Wait until a pipe is available and take its relay end.
    pub async fn wait_for_peer(&self) -> DuplexStream {
        loop {
            if let Some(peer) = self.take_peer() {
                return peer;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.connects
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_connect = Some(error.to_string());
    }
}

impl Clone for MockConnector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<BoxedStream, TransportError> {
        let mut inner = self.inner.lock().unwrap();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        let (client, relay) = tokio::io::duplex(PIPE_CAPACITY);
        inner.connects += 1;
        inner.peers.push_back(relay);
        Ok(Box::new(client))
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
