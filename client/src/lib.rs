//! # Storyloom Client
//!
//! The local-first sync and persistence core of Storyloom.
//!
//! A [`Storyloom`] instance owns one local document store and replicates it
//! with a [`Remote`]. Only the story in focus (plus its codex and the
//! metadata index) takes part in the live sync stream; bootstrap, force-pull
//! and the missing-stories check repair the gaps that selectivity can leave.
//!
//! ## Components
//!
//! - [`SyncCoordinator`]: replication policy and the live stream
//! - [`SyncStatusPublisher`]: connectivity and progress state machine
//! - [`ReadyWaiter`]: bounded wait for a document to land locally
//! - [`SaveQueue`]: single-flight, debounced persistence of edits
//! - [`IndexService`]: the paginated metadata index
//!
//! ## Opening a story
//!
//! ```no_run
//! use storyloom_client::{ClientConfig, MemoryRemote, Storyloom};
//!
//! # async fn run() -> storyloom_client::Result<()> {
//! let core = Storyloom::open(ClientConfig::default(), MemoryRemote::new()).await?;
//! core.start();
//!
//! let story = core.create_story("The Lighthouse").await?;
//! let editor = core.open_story(&story.id).await?;
//! let scene_id = story.chapters[0].scenes[0].id.clone();
//! editor.content_changed(&scene_id, "<p>The lamp went out.</p>".to_string());
//! editor.persist_now().await?;
//! core.close_editor();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod editor;
pub mod error;
pub mod index;
pub mod local;
pub mod remote;
pub mod save_queue;
pub mod status;
pub mod stories;
pub mod timing;
pub mod waiter;

pub use config::{ClientConfig, ConfigError, ReadyConfig, SaveConfig, SyncConfig};
pub use coordinator::{
    ActiveDocument, ForceReplicateOutcome, MissingReport, PullReport, SyncCoordinator,
};
pub use editor::{EditorEvent, EditorSession};
pub use error::{ClientError, RemoteError, Result};
pub use index::IndexService;
pub use local::LocalStore;
pub use remote::{HttpRemote, MemoryRemote, Remote};
pub use save_queue::{SaveEvent, SaveOutcome, SavePhase, SaveQueue, SaveTarget};
pub use status::{ReplicationEvent, SyncPhase, SyncProgress, SyncStatus, SyncStatusPublisher};
pub use stories::StoryService;
pub use waiter::{ReadyOutcome, ReadyVia, ReadyWaiter};

use parking_lot::Mutex;
use std::sync::Arc;
use storyloom_engine::{codex_id, Page, PageRequest, Story, StoryMetadata, Timestamp};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Wall-clock milliseconds for document metadata.
pub(crate) fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Outcome of the sync-health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncHealth {
    Healthy(MissingReport),
    /// Local store was empty; a bootstrap pull repaired it.
    Bootstrapped { docs_processed: u64 },
    /// Stories are missing; show the recovery banner.
    Missing(MissingReport),
}

/// The client core.
pub struct Storyloom<R: Remote> {
    config: ClientConfig,
    local: LocalStore,
    remote: Arc<R>,
    status: Arc<SyncStatusPublisher>,
    coordinator: SyncCoordinator<R>,
    waiter: ReadyWaiter,
    stories: StoryService,
    index: IndexService,
    dismissed_missing: Mutex<Option<u64>>,
    index_listener: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Remote> Storyloom<R> {
    /// Open the local store and wire the components. Replication starts with
    /// [`Storyloom::start`].
    pub async fn open(config: ClientConfig, remote: R) -> Result<Self> {
        let local = LocalStore::open(config.node_id.clone(), config.data_dir.as_deref()).await?;
        let remote = Arc::new(remote);
        let status = Arc::new(SyncStatusPublisher::new());
        let coordinator = SyncCoordinator::new(
            local.clone(),
            Arc::clone(&remote),
            Arc::clone(&status),
            config.sync.clone(),
        );
        let index = IndexService::new(local.clone());
        let stories = StoryService::new(local.clone(), index.clone());
        let waiter = ReadyWaiter::new(local.clone(), Arc::clone(&status), config.ready.clone());

        tracing::info!(node_id = %local.node_id().await, "Storyloom core opened");
        Ok(Self {
            config,
            local,
            remote,
            status,
            coordinator,
            waiter,
            stories,
            index,
            dismissed_missing: Mutex::new(None),
            index_listener: Mutex::new(None),
        })
    }

    /// Start live replication and index maintenance.
    pub fn start(&self) {
        self.coordinator.start();
        let mut listener = self.index_listener.lock();
        if listener.is_none() {
            *listener = Some(self.index.spawn_rebuild_listener(&self.status));
        }
    }

    /// Stop replication and flush the local store.
    pub async fn shutdown(&self) -> Result<()> {
        self.coordinator.stop();
        if let Some(listener) = self.index_listener.lock().take() {
            listener.abort();
        }
        self.local.flush().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    pub fn coordinator(&self) -> &SyncCoordinator<R> {
        &self.coordinator
    }

    pub fn stories(&self) -> &StoryService {
        &self.stories
    }

    pub fn index(&self) -> &IndexService {
        &self.index
    }

    pub fn status(&self) -> SyncStatus {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Report connectivity from the host's network monitor.
    pub fn set_online(&self, online: bool) {
        self.status.set_online(online);
    }

    /// One page of the story list.
    pub async fn get_metadata_index(&self, page: usize) -> Page<StoryMetadata> {
        self.index
            .get_metadata_index(PageRequest::new(page, self.config.index_page_size))
            .await
    }

    pub async fn get_story(&self, id: &str) -> Result<Story> {
        self.stories.get_story(id).await
    }

    pub async fn create_story(&self, title: impl Into<String>) -> Result<Story> {
        self.stories.create_story(title).await
    }

    pub async fn delete_story(&self, id: &str) -> Result<()> {
        self.stories.delete_story(id).await
    }

    pub fn set_active_document(&self, id: &str) {
        self.coordinator.set_active_document(id);
    }

    pub async fn wait_until_ready(&self, id: &str) -> ReadyOutcome {
        self.waiter.wait_until_ready(id).await
    }

    /// Focus a story, pull it, wait for it, and open an editor on it.
    ///
    /// Replication problems only delay the open. The story failing to load
    /// after the wait is the one error surfaced.
    pub async fn open_story(&self, id: &str) -> Result<EditorSession> {
        self.coordinator.set_active_document(id);

        for doc_id in [id.to_string(), codex_id(id)] {
            if let Err(e) = self.coordinator.force_replicate_document(&doc_id).await {
                tracing::warn!(doc_id = %doc_id, error = %e, "Force replicate failed");
            }
        }

        let outcome = self.waiter.wait_until_ready(id).await;
        if !outcome.is_ready() {
            tracing::warn!(story_id = %id, "Opening story before it was confirmed local");
        }

        let story = self.stories.get_story(id).await?;
        Ok(EditorSession::new(
            story,
            Arc::new(self.stories.clone()),
            self.config.save.clone(),
        ))
    }

    /// Leave the editor; selective sync drops back to index-level documents.
    pub fn close_editor(&self) {
        self.coordinator.clear_active_document();
    }

    /// Detect and, where safe, repair missing stories.
    pub async fn check_sync_health(&self) -> Result<SyncHealth> {
        let report = self.coordinator.check_for_missing_stories().await?;

        if report.local_count == 0 && report.remote_count > 0 {
            tracing::info!(remote = report.remote_count, "Local store empty; bootstrapping");
            let pulled = self.coordinator.enable_bootstrap_sync().await?;
            self.index.rebuild_index(true).await?;
            return Ok(SyncHealth::Bootstrapped {
                docs_processed: pulled.docs_processed,
            });
        }

        if report.has_missing && *self.dismissed_missing.lock() != Some(report.remote_count) {
            return Ok(SyncHealth::Missing(report));
        }
        Ok(SyncHealth::Healthy(report))
    }

    /// Hide the missing-stories banner until the remote count changes.
    pub fn dismiss_missing_banner(&self, report: &MissingReport) {
        *self.dismissed_missing.lock() = Some(report.remote_count);
    }

    /// User-triggered recovery: pull everything missing and refresh the index.
    pub async fn force_pull(&self) -> Result<PullReport> {
        let report = self.coordinator.force_pull().await?;
        if report.docs_processed > 0 {
            self.index.rebuild_index(true).await?;
        }
        Ok(report)
    }
}
