//! Recurring job scheduler.
//!
//! One task per [`JobKind`]. A job waits its start delay, runs its body, then
//! sleeps one period after each firing completes (fixed delay). Each job has
//! its own cancellation token; cancelling interrupts the sleep or the body at
//! its next await point.

use std::future::Future;

use boxsync_core::{JobKind, JobSchedule};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a job wants after a firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Run again after the period.
    Continue,
    /// Stop this job. The body is responsible for any escalation.
    Stop,
}

struct JobSlot {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl JobSlot {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

/// Holds the running jobs of one client session.
#[derive(Default)]
pub struct JobScheduler {
    slots: DashMap<JobKind, JobSlot>,
}

impl JobScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` unless it is already live. Returns whether a task was spawned.
    ///
    /// `body` is called once per firing with the job's cancellation token.
    pub fn arm<F, Fut>(&self, kind: JobKind, schedule: JobSchedule, body: F) -> bool
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        match self.slots.entry(kind) {
            Entry::Occupied(slot) if slot.get().is_live() => {
                tracing::debug!("Job {} already running", kind);
                false
            }
            Entry::Occupied(mut slot) => {
                slot.insert(spawn_job(kind, schedule, body));
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(spawn_job(kind, schedule, body));
                true
            }
        }
    }

    /// Cancel one job. Returns whether it was live.
    pub fn cancel(&self, kind: JobKind) -> bool {
        match self.slots.get(&kind) {
            Some(slot) => {
                let was_live = slot.is_live();
                slot.cancel.cancel();
                was_live
            }
            None => false,
        }
    }

    /// Cancel every job. Does not wait for them to finish.
    pub fn cancel_all(&self) {
        for slot in self.slots.iter() {
            slot.cancel.cancel();
        }
    }

    /// Whether `kind` is armed and still running.
    pub fn is_live(&self, kind: JobKind) -> bool {
        self.slots.get(&kind).map(|s| s.is_live()).unwrap_or(false)
    }

    /// Number of live jobs.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_live()).count()
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn spawn_job<F, Fut>(kind: JobKind, schedule: JobSchedule, mut body: F) -> JobSlot
where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let handle = tokio::spawn(async move {
        tracing::info!("Job {} armed", kind);
        let mut delay = schedule.start_delay();
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let outcome = tokio::select! {
                _ = token.cancelled() => break,
                outcome = body(token.clone()) => outcome,
            };
            if outcome == JobOutcome::Stop {
                break;
            }
            delay = schedule.period();
        }
        tracing::info!("Job {} stopped", kind);
    });

    JobSlot { cancel, handle }
}
