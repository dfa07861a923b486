//! Concurrency gate.
//!
//! All exchanges on a session share one byte stream, so at most one may be in
//! flight. The gate is a single-permit semaphore; waiters are served FIFO.
//! It also records how many holders it has seen at once, which must never
//! exceed one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};

/// The gate was closed while waiting.
#[derive(Debug, Error)]
#[error("concurrency gate closed")]
pub struct GateClosed;

/// Single-permit gate serializing protocol exchanges.
#[derive(Debug)]
pub struct Gate {
    permit: Semaphore,
    in_flight: AtomicUsize,
    max_observed: AtomicUsize,
}

/// Proof of holding the gate. Dropping it lets the next waiter in.
#[derive(Debug)]
pub struct GatePass<'a> {
    gate: &'a Gate,
    _permit: SemaphorePermit<'a>,
}

impl Gate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
            in_flight: AtomicUsize::new(0),
            max_observed: AtomicUsize::new(0),
        }
    }

    /// Wait for the gate.
    pub async fn enter(&self) -> Result<GatePass<'_>, GateClosed> {
        let permit = self.permit.acquire().await.map_err(|_| GateClosed)?;
        Ok(self.admit(permit))
    }

    /// Wait for the gate at most `timeout`. `Ok(None)` means it stayed busy.
    pub async fn try_enter_within(
        &self,
        timeout: Duration,
    ) -> Result<Option<GatePass<'_>>, GateClosed> {
        match tokio::time::timeout(timeout, self.permit.acquire()).await {
            Ok(Ok(permit)) => Ok(Some(self.admit(permit))),
            Ok(Err(_)) => Err(GateClosed),
            Err(_) => Ok(None),
        }
    }

    /// Refuse all current and future waiters.
    pub fn close(&self) {
        self.permit.close();
    }

    /// Exchanges currently holding the gate (0 or 1).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous holders ever seen.
    pub fn max_observed(&self) -> usize {
        self.max_observed.load(Ordering::SeqCst)
    }

    fn admit<'a>(&'a self, permit: SemaphorePermit<'a>) -> GatePass<'a> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed.fetch_max(now, Ordering::SeqCst);
        GatePass {
            gate: self,
            _permit: permit,
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
