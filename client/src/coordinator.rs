//! Sync coordinator.
//!
//! Owns replication policy: the active document, the replication filter
//! derived from it, the live replication stream, and the repair operations
//! (force-replicate, missing check, bootstrap, force pull). It is the only
//! writer of the filter and of the sync status.

use crate::config::SyncConfig;
use crate::error::{ClientError, Result};
use crate::local::LocalStore;
use crate::remote::Remote;
use crate::status::{ReplicationEvent, SyncStatusPublisher};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storyloom_engine::{
    ChangeBatch, DocId, DocKind, Document, MetadataIndex, ReplicationFilter, Revision, Seq, Store,
    METADATA_INDEX_ID,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Read-only handle on the active document id.
pub type ActiveDocument = watch::Receiver<Option<DocId>>;

/// Result of a one-shot document pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceReplicateOutcome {
    Pulled,
    /// The remote has never seen the document. Not an error.
    NotFoundRemotely,
}

/// Local vs remote story counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingReport {
    pub local_count: u64,
    pub remote_count: u64,
    pub has_missing: bool,
}

/// Outcome of a full pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    pub docs_processed: u64,
}

struct Inner<R> {
    local: LocalStore,
    remote: Arc<R>,
    status: Arc<SyncStatusPublisher>,
    config: SyncConfig,
    active: watch::Sender<Option<DocId>>,
    filter: RwLock<ReplicationFilter>,
    checkpoints: Mutex<HashMap<String, Seq>>,
    live: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    pull_lock: tokio::sync::Mutex<()>,
    bootstrap_lock: tokio::sync::Mutex<()>,
}

/// Coordinates replication between the local store and the remote.
pub struct SyncCoordinator<R: Remote> {
    inner: Arc<Inner<R>>,
}

impl<R: Remote> Clone for SyncCoordinator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Remote> SyncCoordinator<R> {
    pub fn new(
        local: LocalStore,
        remote: Arc<R>,
        status: Arc<SyncStatusPublisher>,
        config: SyncConfig,
    ) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                local,
                remote,
                status,
                config,
                active,
                filter: RwLock::new(ReplicationFilter::default()),
                checkpoints: Mutex::new(HashMap::new()),
                live: Mutex::new(None),
                running: AtomicBool::new(false),
                pull_lock: tokio::sync::Mutex::new(()),
                bootstrap_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Focus a story.
    ///
    /// The filter is recomputed and the live stream restarted before this
    /// returns, so a following force-replicate or wait already runs under
    /// the new filter.
    pub fn set_active_document(&self, id: impl Into<DocId>) {
        let id = id.into();
        tracing::info!(story_id = %id, "Active document set");
        self.focus(Some(id));
    }

    /// Leave the editor; only index-level documents keep syncing.
    pub fn clear_active_document(&self) {
        tracing::info!("Active document cleared");
        self.focus(None);
    }

    fn focus(&self, active: Option<DocId>) {
        {
            let mut filter = self.inner.filter.write();
            // A running bootstrap reverts to the new focus when it ends.
            if !filter.is_bootstrap() {
                *filter = ReplicationFilter::selective(active.as_deref());
            }
        }
        self.inner.active.send_replace(active);
        self.restart_live();
    }

    pub fn active_document(&self) -> Option<DocId> {
        self.inner.active.borrow().clone()
    }

    /// Handle for components that need to follow the active document.
    pub fn active_handle(&self) -> ActiveDocument {
        self.inner.active.subscribe()
    }

    /// The filter currently in effect.
    pub fn filter(&self) -> ReplicationFilter {
        self.inner.filter.read().clone()
    }

    /// Last pulled sequence for a filter.
    pub fn checkpoint(&self, filter: &ReplicationFilter) -> Option<Seq> {
        self.inner
            .checkpoints
            .lock()
            .get(&filter.checkpoint_key())
            .copied()
    }

    /// Start live replication.
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        self.restart_live();
    }

    /// Stop live replication.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.abort_live();
        self.inner.status.publish(ReplicationEvent::Stopped);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn abort_live(&self) {
        if let Some(handle) = self.inner.live.lock().take() {
            handle.abort();
        }
    }

    fn restart_live(&self) {
        let mut live = self.inner.live.lock();
        if let Some(handle) = live.take() {
            handle.abort();
        }
        if !self.is_running() || self.inner.filter.read().is_bootstrap() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime; live replication not restarted");
            return;
        };
        let inner = Arc::clone(&self.inner);
        *live = Some(runtime.spawn(async move { inner.live_loop().await }));
    }

    /// Pull one document now, bypassing the live stream.
    pub async fn force_replicate_document(&self, id: &str) -> Result<ForceReplicateOutcome> {
        match self.inner.remote.fetch(id).await? {
            Some(doc) => {
                let applied = self.inner.local.write(|store| store.apply_remote(doc)).await?;
                tracing::debug!(doc_id = %id, ?applied, "Force-replicated document");
                Ok(ForceReplicateOutcome::Pulled)
            }
            None => {
                tracing::debug!(doc_id = %id, "Document not on remote");
                Ok(ForceReplicateOutcome::NotFoundRemotely)
            }
        }
    }

    /// Compare the stories known locally with the remote story count.
    ///
    /// Under selective sync only focused stories are stored locally; the
    /// replicated metadata index names the rest. A story counts as known if
    /// either holds it.
    pub async fn check_for_missing_stories(&self) -> Result<MissingReport> {
        let local_count = self.inner.local.read(known_story_count).await as u64;
        let remote_count = self.inner.remote.count(DocKind::Story).await?;
        let report = MissingReport {
            local_count,
            remote_count,
            has_missing: remote_count > local_count,
        };
        if report.has_missing {
            tracing::warn!(
                local = local_count,
                remote = remote_count,
                "Remote has stories missing locally"
            );
        }
        Ok(report)
    }

    /// Pull every document once, then return to selective mode.
    ///
    /// Calls are serialized: a second call waits for the running bootstrap
    /// to revert before starting its own.
    pub async fn enable_bootstrap_sync(&self) -> Result<PullReport> {
        let _exclusive = self.inner.bootstrap_lock.lock().await;
        tracing::info!("Starting bootstrap sync");
        *self.inner.filter.write() = ReplicationFilter::Bootstrap;
        self.abort_live();

        // Reverts even if this future is dropped mid-scan, and before the
        // next bootstrap may start.
        let _revert = BootstrapRevert { coordinator: self };
        let docs_processed = self.inner.full_scan().await?;
        tracing::info!(docs = docs_processed, "Bootstrap sync complete");
        Ok(PullReport { docs_processed })
    }

    /// Pull everything the local store is missing or holds an older
    /// version of. The filter is left alone.
    pub async fn force_pull(&self) -> Result<PullReport> {
        tracing::info!("Force pull requested");
        let docs_processed = self.inner.full_scan().await?;
        tracing::info!(docs = docs_processed, "Force pull complete");
        Ok(PullReport { docs_processed })
    }
}

struct BootstrapRevert<'a, R: Remote> {
    coordinator: &'a SyncCoordinator<R>,
}

impl<R: Remote> Drop for BootstrapRevert<'_, R> {
    fn drop(&mut self) {
        let active = self.coordinator.active_document();
        *self.coordinator.inner.filter.write() = ReplicationFilter::selective(active.as_deref());
        self.coordinator.restart_live();
    }
}

impl<R: Remote> Inner<R> {
    async fn live_loop(self: Arc<Self>) {
        loop {
            self.wait_until_online().await;
            self.status.publish(ReplicationEvent::Connecting);

            while self.status.current().is_online {
                match self.replicate_round().await {
                    Ok(docs) => {
                        if docs > 0 {
                            tracing::debug!(docs, "Replication round complete");
                        }
                        self.status.publish(ReplicationEvent::Paused);
                        tokio::time::sleep(self.config.interval).await;
                    }
                    Err(e) => {
                        let pause = if e.is_transient() {
                            self.config.retry
                        } else {
                            self.config.failure_backoff
                        };
                        tracing::warn!(error = %e, retry_in = ?pause, "Replication round failed");
                        self.status.publish(failure_event(&e));
                        tokio::time::sleep(pause).await;
                        break;
                    }
                }
            }
        }
    }

    async fn wait_until_online(&self) {
        let mut rx = self.status.subscribe();
        while !self.status.current().is_online {
            match rx.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            }
        }
    }

    /// One live round: pull what the filter admits, then push local writes.
    async fn replicate_round(&self) -> Result<u64> {
        let _pull = self.pull_lock.lock().await;
        let filter = self.filter.read().clone();
        let key = filter.checkpoint_key();
        let mut since = self.checkpoints.lock().get(&key).copied().unwrap_or(0);

        let mut processed = 0u64;
        let mut active = false;
        loop {
            let ChangeBatch {
                documents,
                last_seq,
                has_more,
            } = self
                .remote
                .changes_since(since, self.config.batch_size, &filter)
                .await?;

            if !documents.is_empty() {
                if !std::mem::replace(&mut active, true) {
                    self.status.publish(ReplicationEvent::Active);
                }
                processed += documents.len() as u64;
                let pending_docs = self
                    .local
                    .write(|store| {
                        for doc in documents {
                            store.apply_remote(doc);
                        }
                        store.pending_count() as u64
                    })
                    .await?;
                self.status.publish(ReplicationEvent::Change {
                    docs_processed: processed,
                    pending_docs,
                });
            }

            since = last_seq;
            self.checkpoints.lock().insert(key.clone(), since);
            if !has_more {
                break;
            }
        }

        // Local writes go up regardless of the filter.
        let pending = self.local.pending_documents().await;
        if !pending.is_empty() {
            if !active {
                self.status.publish(ReplicationEvent::Active);
            }
            processed += self.push_pending(pending).await?;
            self.status.publish(ReplicationEvent::Change {
                docs_processed: processed,
                pending_docs: self.local.pending_count().await as u64,
            });
        }

        Ok(processed)
    }

    async fn push_pending(&self, documents: Vec<Document>) -> Result<u64> {
        let node_id = self.local.node_id().await;
        let pushed = documents.len() as u64;
        let response = self.remote.push(&node_id, documents).await?;

        for rejected in &response.rejected {
            tracing::warn!(
                doc_id = %rejected.id,
                rev = %rejected.rev,
                winner = %rejected.winner,
                "Push rejected; taking remote version"
            );
        }
        let winners = futures::future::try_join_all(
            response
                .rejected
                .iter()
                .map(|rejected| self.remote.fetch(&rejected.id)),
        )
        .await?;

        let acked: Vec<(DocId, Revision)> = response
            .accepted
            .into_iter()
            .map(|doc| (doc.id, doc.rev))
            .collect();
        self.local
            .write(|store| {
                store.acknowledge(&acked);
                for doc in winners.into_iter().flatten() {
                    store.apply_remote(doc);
                }
            })
            .await?;
        Ok(pushed)
    }

    /// Scan the whole feed from the start, ignoring the current filter.
    async fn full_scan(&self) -> Result<u64> {
        let _pull = self.pull_lock.lock().await;
        self.status.publish(ReplicationEvent::Active);

        let result = self.scan_all().await;
        match &result {
            Ok(_) => self.status.publish(ReplicationEvent::Paused),
            Err(e) => {
                tracing::warn!(error = %e, "Full scan failed");
                self.status.publish(failure_event(e))
            }
        };
        result
    }

    async fn scan_all(&self) -> Result<u64> {
        let mut since: Seq = 0;
        let mut received = 0u64;
        let mut applied = 0u64;
        loop {
            let ChangeBatch {
                documents,
                last_seq,
                has_more,
            } = self
                .remote
                .changes_since(since, self.config.batch_size, &ReplicationFilter::Bootstrap)
                .await?;

            received += documents.len() as u64;
            let (changed, pending_docs) = self
                .local
                .write(|store| {
                    let changed = documents
                        .into_iter()
                        .map(|doc| store.apply_remote(doc))
                        .filter(|outcome| outcome.changed())
                        .count() as u64;
                    (changed, store.pending_count() as u64)
                })
                .await?;
            applied += changed;
            self.status.publish(ReplicationEvent::Change {
                docs_processed: received,
                pending_docs,
            });

            since = last_seq;
            if !has_more {
                return Ok(applied);
            }
        }
    }
}

/// Transient failures keep the stream connecting; anything else disconnects.
fn failure_event(error: &ClientError) -> ReplicationEvent {
    if error.is_transient() {
        ReplicationEvent::Error
    } else {
        ReplicationEvent::Denied
    }
}

fn known_story_count(store: &Store) -> usize {
    let mut known: HashSet<DocId> = store
        .documents_of_kind(DocKind::Story)
        .map(|doc| doc.id.clone())
        .collect();
    let listed = store
        .get(METADATA_INDEX_ID)
        .and_then(|doc| doc.decode_as::<MetadataIndex>(DocKind::MetadataIndex).ok());
    if let Some(index) = listed {
        known.extend(
            index
                .stories
                .into_iter()
                .map(|entry| entry.id)
                // A local tombstone wins over a stale index entry.
                .filter(|id| store.get_including_deleted(id).map_or(true, |d| d.is_active())),
        );
    }
    known.len()
}
