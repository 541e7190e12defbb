//! Local document store with optional durable snapshot.
//!
//! The in-memory [`Store`] is the only shared mutable resource of the core.
//! When a data directory is configured, a write batch returns once its state
//! is on disk in `storyloom-local.json` (temp file + rename). Concurrent
//! batches share one rewrite: a flush that finds its state already written
//! by another flush returns at once.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use storyloom_engine::{DocKind, Document, Store, StoreSnapshot};
use tokio::sync::{Mutex, RwLock};

/// Name of the snapshot file inside the data directory.
pub const SNAPSHOT_FILE: &str = "storyloom-local.json";

/// Shared handle to the local store.
#[derive(Clone)]
pub struct LocalStore {
    store: Arc<RwLock<Store>>,
    snapshot_path: Option<Arc<PathBuf>>,
    /// Bumped by every write batch, under the store lock.
    generation: Arc<AtomicU64>,
    flush_state: Arc<Mutex<FlushState>>,
}

#[derive(Debug, Default)]
struct FlushState {
    /// Generation of the state last written to disk.
    persisted: u64,
    rewrites: u64,
}

impl LocalStore {
    /// A store that lives only in memory.
    pub fn in_memory(node_id: impl Into<String>) -> Self {
        Self::from_store(Store::new(node_id), None)
    }

    /// Open a store, reloading the snapshot in `data_dir` if one exists.
    ///
    /// A snapshot written by another node id keeps that id: revisions
    /// already pushed under it must stay comparable.
    pub async fn open(node_id: impl Into<String>, data_dir: Option<&Path>) -> Result<Self> {
        let node_id = node_id.into();
        let Some(dir) = data_dir else {
            return Ok(Self::in_memory(node_id));
        };

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(SNAPSHOT_FILE);

        let store = match tokio::fs::read_to_string(&path).await {
            Ok(json) => {
                let snapshot = StoreSnapshot::from_json(&json)?;
                snapshot.validate()?;
                if snapshot.node_id != node_id {
                    tracing::info!(
                        configured = %node_id,
                        stored = %snapshot.node_id,
                        "Keeping node id from existing snapshot"
                    );
                }
                let mut store = Store::new(snapshot.node_id.clone());
                store.import_state(snapshot)?;
                tracing::info!(
                    path = %path.display(),
                    documents = store.len(),
                    pending = store.pending_count(),
                    "Loaded local snapshot"
                );
                store
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Store::new(node_id),
            Err(e) => return Err(e.into()),
        };

        Ok(Self::from_store(store, Some(path)))
    }

    fn from_store(store: Store, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            snapshot_path: snapshot_path.map(Arc::new),
            generation: Arc::new(AtomicU64::new(0)),
            flush_state: Arc::new(Mutex::new(FlushState::default())),
        }
    }

    /// Run a read-only closure against the store.
    pub async fn read<T>(&self, f: impl FnOnce(&Store) -> T) -> T {
        let store = self.store.read().await;
        f(&store)
    }

    /// Run a write batch, then persist the snapshot.
    pub async fn write<T>(&self, f: impl FnOnce(&mut Store) -> T) -> Result<T> {
        let (result, generation) = {
            let mut store = self.store.write().await;
            let result = f(&mut store);
            (result, self.generation.fetch_add(1, Ordering::SeqCst) + 1)
        };
        self.flush_through(generation).await?;
        Ok(result)
    }

    /// Persist the current state to disk. A no-op for in-memory stores.
    pub async fn flush(&self) -> Result<()> {
        self.flush_through(self.generation.load(Ordering::SeqCst)).await
    }

    /// Make sure the state as of `generation` is on disk.
    async fn flush_through(&self, generation: u64) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let mut flush = self.flush_state.lock().await;
        if flush.persisted >= generation && flush.rewrites > 0 {
            return Ok(());
        }

        let (json, captured) = self
            .read(|store| {
                let captured = self.generation.load(Ordering::SeqCst);
                store.export_state().to_json().map(|json| (json, captured))
            })
            .await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path.as_path()).await?;

        flush.persisted = captured;
        flush.rewrites += 1;
        tracing::trace!(generation = captured, rewrites = flush.rewrites, "Snapshot written");
        Ok(())
    }

    pub async fn node_id(&self) -> String {
        self.read(|store| store.node_id().clone()).await
    }

    /// Active document by id.
    pub async fn get(&self, id: &str) -> Option<Document> {
        self.read(|store| store.get(id).cloned()).await
    }

    /// Whether an active document with this id exists.
    pub async fn contains(&self, id: &str) -> bool {
        self.read(|store| store.contains(id)).await
    }

    pub async fn count(&self, kind: DocKind) -> usize {
        self.read(|store| store.count_of_kind(kind)).await
    }

    pub async fn pending_documents(&self) -> Vec<Document> {
        self.read(|store| store.pending_documents()).await
    }

    pub async fn pending_count(&self) -> usize {
        self.read(|store| store.pending_count()).await
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref().map(PathBuf::as_path)
    }
}
