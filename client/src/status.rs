//! Sync status publisher.
//!
//! A single state machine per process. The coordinator feeds it replication
//! lifecycle events; every resulting transition is broadcast in order to all
//! subscribers.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Replication phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Disconnected,
    Connecting,
    Syncing,
    Idle,
}

/// Progress counters of the current round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub docs_processed: u64,
    pub pending_docs: u64,
}

/// Snapshot of the publisher state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub phase: SyncPhase,
    /// End of the last round that moved documents
    pub last_sync: Option<DateTime<Utc>>,
    pub progress: SyncProgress,
}

impl SyncStatus {
    pub fn is_sync(&self) -> bool {
        self.phase == SyncPhase::Syncing
    }

    pub fn is_connecting(&self) -> bool {
        self.phase == SyncPhase::Connecting
    }

    /// Whether this status reports data that landed after `seen`.
    pub fn landed_after(&self, seen: Option<DateTime<Utc>>) -> bool {
        self.last_sync > seen
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_online: true,
            phase: SyncPhase::Disconnected,
            last_sync: None,
            progress: SyncProgress::default(),
        }
    }
}

/// Lifecycle events of the replication channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationEvent {
    Connecting,
    /// Documents started moving
    Active,
    Change {
        docs_processed: u64,
        pending_docs: u64,
    },
    /// Caught up; waiting for more changes
    Paused,
    Denied,
    Error,
    Stopped,
}

struct PublisherState {
    status: SyncStatus,
    round_active: bool,
}

/// Process-wide sync status state machine.
pub struct SyncStatusPublisher {
    state: RwLock<PublisherState>,
    tx: broadcast::Sender<SyncStatus>,
}

impl SyncStatusPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(PublisherState {
                status: SyncStatus::default(),
                round_active: false,
            }),
            tx,
        }
    }

    /// Current status.
    pub fn current(&self) -> SyncStatus {
        self.state.read().status.clone()
    }

    /// Receive every transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Update the connectivity flag reported by the network monitor.
    pub fn set_online(&self, online: bool) {
        let mut state = self.state.write();
        if state.status.is_online == online {
            return;
        }
        state.status.is_online = online;
        tracing::info!(online, "Connectivity changed");
        self.broadcast(&state.status);
    }

    /// Feed one replication event through the state machine.
    ///
    /// Returns the resulting status. Events that do not change the status are
    /// not broadcast.
    pub fn publish(&self, event: ReplicationEvent) -> SyncStatus {
        let mut state = self.state.write();
        let previous = state.status.clone();

        match event {
            ReplicationEvent::Connecting => {
                state.status.phase = SyncPhase::Connecting;
                state.round_active = false;
            }
            ReplicationEvent::Active => {
                state.status.phase = SyncPhase::Syncing;
                state.status.progress = SyncProgress::default();
                state.round_active = true;
            }
            ReplicationEvent::Change {
                docs_processed,
                pending_docs,
            } => {
                state.status.phase = SyncPhase::Syncing;
                state.status.progress = SyncProgress {
                    docs_processed,
                    pending_docs,
                };
                state.round_active = true;
            }
            ReplicationEvent::Paused => {
                state.status.phase = SyncPhase::Idle;
                if std::mem::take(&mut state.round_active) {
                    state.status.last_sync = Some(next_sync_time(previous.last_sync));
                }
            }
            ReplicationEvent::Error => {
                // Transient; the live stream retries.
                state.status.phase = SyncPhase::Connecting;
                state.round_active = false;
            }
            ReplicationEvent::Denied | ReplicationEvent::Stopped => {
                state.status.phase = SyncPhase::Disconnected;
                state.round_active = false;
            }
        }

        if state.status != previous {
            tracing::debug!(?event, phase = ?state.status.phase, "Sync status transition");
            self.broadcast(&state.status);
        }
        state.status.clone()
    }

    // Sent while the state lock is held so subscribers see transitions in order.
    fn broadcast(&self, status: &SyncStatus) {
        // No subscribers is fine.
        let _ = self.tx.send(status.clone());
    }
}

impl Default for SyncStatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// `lastSync` is strictly increasing even if the wall clock is not.
fn next_sync_time(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + ChronoDuration::milliseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected_and_online() {
        let publisher = SyncStatusPublisher::new();
        let status = publisher.current();
        assert_eq!(status.phase, SyncPhase::Disconnected);
        assert!(status.is_online);
        assert!(status.last_sync.is_none());
    }

    #[test]
    fn last_sync_only_moves_after_an_active_round() {
        let publisher = SyncStatusPublisher::new();
        publisher.publish(ReplicationEvent::Connecting);
        publisher.publish(ReplicationEvent::Paused);
        assert!(publisher.current().last_sync.is_none());

        publisher.publish(ReplicationEvent::Active);
        publisher.publish(ReplicationEvent::Change {
            docs_processed: 3,
            pending_docs: 0,
        });
        assert!(publisher.current().last_sync.is_none());
        let first = publisher.publish(ReplicationEvent::Paused).last_sync;
        assert!(first.is_some());

        // An idle round does not touch lastSync.
        publisher.publish(ReplicationEvent::Paused);
        assert_eq!(publisher.current().last_sync, first);

        publisher.publish(ReplicationEvent::Active);
        let second = publisher.publish(ReplicationEvent::Paused).last_sync;
        assert!(second > first);
    }

    #[test]
    fn error_returns_to_connecting_and_denied_disconnects() {
        let publisher = SyncStatusPublisher::new();
        publisher.publish(ReplicationEvent::Active);
        assert_eq!(
            publisher.publish(ReplicationEvent::Error).phase,
            SyncPhase::Connecting
        );
        assert_eq!(
            publisher.publish(ReplicationEvent::Denied).phase,
            SyncPhase::Disconnected
        );
        // The interrupted round never completed.
        assert_eq!(
            publisher.publish(ReplicationEvent::Paused).last_sync,
            None
        );
    }

    #[tokio::test]
    async fn subscribers_receive_transitions_in_order() {
        let publisher = SyncStatusPublisher::new();
        let mut rx = publisher.subscribe();

        publisher.publish(ReplicationEvent::Connecting);
        publisher.publish(ReplicationEvent::Connecting);
        publisher.publish(ReplicationEvent::Active);
        publisher.publish(ReplicationEvent::Paused);
        publisher.set_online(false);

        let phases: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|s| (s.phase, s.is_online))
            .collect();
        assert_eq!(
            phases,
            vec![
                (SyncPhase::Connecting, true),
                (SyncPhase::Syncing, true),
                (SyncPhase::Idle, true),
                (SyncPhase::Idle, false),
            ]
        );
    }

    #[test]
    fn sync_time_is_strictly_increasing() {
        let future = Utc::now() + ChronoDuration::hours(1);
        assert!(next_sync_time(Some(future)) > future);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_event() -> impl Strategy<Value = ReplicationEvent> {
            prop_oneof![
                Just(ReplicationEvent::Connecting),
                Just(ReplicationEvent::Active),
                (0u64..50, 0u64..5).prop_map(|(docs_processed, pending_docs)| {
                    ReplicationEvent::Change {
                        docs_processed,
                        pending_docs,
                    }
                }),
                Just(ReplicationEvent::Paused),
                Just(ReplicationEvent::Denied),
                Just(ReplicationEvent::Error),
                Just(ReplicationEvent::Stopped),
            ]
        }

        proptest! {
            #[test]
            fn prop_broadcasts_are_distinct_and_last_sync_increases(
                events in prop::collection::vec(arb_event(), 1..60),
            ) {
                let publisher = SyncStatusPublisher::new();
                let mut rx = publisher.subscribe();
                for event in events {
                    publisher.publish(event);
                }

                let received: Vec<SyncStatus> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
                for pair in received.windows(2) {
                    prop_assert_ne!(&pair[0], &pair[1]);
                    prop_assert!(pair[1].last_sync >= pair[0].last_sync);
                }
                if let Some(last) = received.last() {
                    prop_assert_eq!(last, &publisher.current());
                }
            }
        }
    }
}
