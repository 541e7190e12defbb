//! Integration tests for the document-ready waiter.

mod common;

use std::sync::Arc;
use std::time::Duration;
use storyloom_client::{
    LocalStore, MemoryRemote, ReadyConfig, ReadyOutcome, ReadyVia, ReadyWaiter, ReplicationEvent,
    SyncStatusPublisher,
};
use storyloom_engine::{DocKind, Story};
use tokio::time::{sleep, Instant};

fn waiter() -> (ReadyWaiter, LocalStore, Arc<SyncStatusPublisher>) {
    let local = LocalStore::in_memory("local");
    let status = Arc::new(SyncStatusPublisher::new());
    let waiter = ReadyWaiter::new(local.clone(), Arc::clone(&status), ReadyConfig::default());
    (waiter, local, status)
}

async fn land(local: &LocalStore, id: &str) {
    let body = serde_json::to_value(Story::new(id, "Landed", 1000)).unwrap();
    local
        .write(|s| s.put(id, DocKind::Story, body, None, 1000))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn poller_finds_a_document_on_the_next_tick() {
    let (waiter, local, _) = waiter();
    let writer = local.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(900)).await;
        land(&writer, "story_a").await;
    });

    let outcome = waiter.wait_until_ready("story_a").await;
    assert_eq!(
        outcome,
        ReadyOutcome::Ready {
            elapsed: Duration::from_millis(1000),
            via: ReadyVia::Poll,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn sync_event_beats_the_poller() {
    let (waiter, local, status) = waiter();
    let writer = local.clone();
    let publisher = Arc::clone(&status);
    tokio::spawn(async move {
        sleep(Duration::from_millis(600)).await;
        publisher.publish(ReplicationEvent::Active);
        land(&writer, "story_a").await;
        publisher.publish(ReplicationEvent::Paused);
    });

    let outcome = waiter.wait_until_ready("story_a").await;
    assert_eq!(
        outcome,
        ReadyOutcome::Ready {
            elapsed: Duration::from_millis(600),
            via: ReadyVia::Event,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn connecting_transitions_do_not_trigger_a_check() {
    let (waiter, local, status) = waiter();
    let writer = local.clone();
    let publisher = Arc::clone(&status);
    tokio::spawn(async move {
        sleep(Duration::from_millis(300)).await;
        land(&writer, "story_a").await;
        publisher.publish(ReplicationEvent::Connecting);
    });

    let outcome = waiter.wait_until_ready("story_a").await;
    assert_eq!(
        outcome,
        ReadyOutcome::Ready {
            elapsed: Duration::from_millis(500),
            via: ReadyVia::Poll,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn missing_document_times_out_at_the_deadline() {
    let (waiter, _, status) = waiter();

    let outcome = waiter.wait_until_ready("story_never").await;
    assert_eq!(
        outcome,
        ReadyOutcome::TimedOut {
            elapsed: Duration::from_secs(60),
        }
    );
    assert!(!outcome.is_ready());
    sleep(Duration::from_millis(1)).await;
    assert_eq!(status.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_wait_releases_its_subscription() {
    let (waiter, _, status) = waiter();
    assert_eq!(status.subscriber_count(), 0);

    let task = tokio::spawn(async move { waiter.wait_until_ready("story_a").await });
    sleep(Duration::from_millis(100)).await;
    assert_eq!(status.subscriber_count(), 1);

    task.abort();
    sleep(Duration::from_millis(1)).await;
    assert_eq!(status.subscriber_count(), 0);

    // The aborted poller no longer runs.
    sleep(Duration::from_secs(2)).await;
    assert_eq!(status.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn open_story_waits_for_a_late_document() {
    let core = common::open(MemoryRemote::new()).await;
    let local = core.local().clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(900)).await;
        land(&local, "story_late").await;
    });

    let started = Instant::now();
    let session = core.open_story("story_late").await.unwrap();
    assert_eq!(started.elapsed(), Duration::from_millis(1000));
    assert_eq!(session.story().title, "Landed");
    assert_eq!(core.coordinator().active_document().as_deref(), Some("story_late"));
}

#[tokio::test(start_paused = true)]
async fn open_story_surfaces_a_missing_story_after_the_timeout() {
    let core = common::open(MemoryRemote::new()).await;

    let started = Instant::now();
    let result = core.open_story("story_gone").await;
    assert!(result.is_err());
    assert_eq!(started.elapsed(), Duration::from_secs(60));
}
