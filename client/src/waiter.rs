//! Document-ready waiter.
//!
//! Blocks until a document is present locally, or until a hard timeout. Two
//! cancellable tasks race: a poller reading the store at a fixed cadence, and
//! an event listener that re-checks whenever the sync status reports new data
//! or leaves the connecting phase. The first to see the document wins. Both
//! tasks are torn down by one guard, whichever way the wait ends.

use crate::config::ReadyConfig;
use crate::local::LocalStore;
use crate::status::{SyncPhase, SyncStatus, SyncStatusPublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Which channel confirmed the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyVia {
    AlreadyPresent,
    Poll,
    Event,
}

/// How a wait ended. Never an error: a timed-out wait lets the caller's own
/// load report the missing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    Ready { elapsed: Duration, via: ReadyVia },
    TimedOut { elapsed: Duration },
}

impl ReadyOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadyOutcome::Ready { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            ReadyOutcome::Ready { elapsed, .. } | ReadyOutcome::TimedOut { elapsed } => *elapsed,
        }
    }
}

/// Waits for documents to land locally.
#[derive(Clone)]
pub struct ReadyWaiter {
    local: LocalStore,
    status: Arc<SyncStatusPublisher>,
    config: ReadyConfig,
}

impl ReadyWaiter {
    pub fn new(local: LocalStore, status: Arc<SyncStatusPublisher>, config: ReadyConfig) -> Self {
        Self {
            local,
            status,
            config,
        }
    }

    /// Resolve once `id` is present locally, or after the hard timeout.
    ///
    /// Dropping the returned future cancels both detection tasks.
    pub async fn wait_until_ready(&self, id: &str) -> ReadyOutcome {
        let started = Instant::now();
        let deadline = started + self.config.timeout;

        // Subscribe before the first read so no transition is missed.
        let events = self.status.subscribe();
        let seen = self.status.current().last_sync;
        if self.local.contains(id).await {
            return ReadyOutcome::Ready {
                elapsed: started.elapsed(),
                via: ReadyVia::AlreadyPresent,
            };
        }

        let (found_tx, mut found_rx) = mpsc::channel(2);
        let mut guard = WaitGuard::default();
        guard.track(tokio::spawn(poll_channel(
            self.local.clone(),
            id.to_string(),
            self.config.poll_interval,
            found_tx.clone(),
        )));
        guard.track(tokio::spawn(event_channel(
            self.local.clone(),
            id.to_string(),
            events,
            seen,
            found_tx,
        )));

        let outcome = tokio::select! {
            Some(via) = found_rx.recv() => ReadyOutcome::Ready {
                elapsed: started.elapsed(),
                via,
            },
            _ = tokio::time::sleep_until(deadline) => ReadyOutcome::TimedOut {
                elapsed: started.elapsed(),
            },
        };
        guard.cleanup();

        match outcome {
            ReadyOutcome::Ready { elapsed, via } => {
                tracing::debug!(doc_id = %id, ?via, elapsed_ms = elapsed.as_millis() as u64, "Document ready");
            }
            ReadyOutcome::TimedOut { elapsed } => {
                tracing::warn!(doc_id = %id, elapsed_ms = elapsed.as_millis() as u64, "Gave up waiting for document");
            }
        }
        outcome
    }
}

/// Owns the detection tasks of one wait.
#[derive(Default)]
struct WaitGuard {
    tasks: Vec<JoinHandle<()>>,
}

impl WaitGuard {
    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Abort every task. Safe to call more than once.
    fn cleanup(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn poll_channel(
    local: LocalStore,
    id: String,
    every: Duration,
    found: mpsc::Sender<ReadyVia>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if local.contains(&id).await {
            let _ = found.send(ReadyVia::Poll).await;
            return;
        }
    }
}

async fn event_channel(
    local: LocalStore,
    id: String,
    mut events: broadcast::Receiver<SyncStatus>,
    mut seen: Option<chrono::DateTime<chrono::Utc>>,
    found: mpsc::Sender<ReadyVia>,
) {
    loop {
        let check = match events.recv().await {
            Ok(status) => {
                let landed = status.landed_after(seen);
                if landed {
                    seen = status.last_sync;
                }
                landed || status.phase != SyncPhase::Connecting
            }
            // Missed transitions may have carried the document.
            Err(RecvError::Lagged(_)) => true,
            Err(RecvError::Closed) => return,
        };
        if check && local.contains(&id).await {
            let _ = found.send(ReadyVia::Event).await;
            return;
        }
    }
}
