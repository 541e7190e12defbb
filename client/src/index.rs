//! Metadata index service.
//!
//! The index is a replicated singleton document (`story-metadata-index`)
//! holding one [`StoryMetadata`] per story. It is a cache: reads tolerate a
//! missing or corrupt document, and a rebuild regenerates it from the story
//! documents present locally. Entries for stories this replica has never
//! pulled are kept, since selective sync means most stories live only
//! remotely.

use crate::error::Result;
use crate::local::LocalStore;
use crate::status::SyncStatusPublisher;
use std::collections::HashMap;
use storyloom_engine::{
    DocId, DocKind, Error as EngineError, MetadataIndex, Page, PageRequest, Revision, Store,
    Story, StoryMetadata, Timestamp, METADATA_INDEX_ID,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Reads and maintains the metadata index.
#[derive(Clone)]
pub struct IndexService {
    local: LocalStore,
}

impl IndexService {
    pub fn new(local: LocalStore) -> Self {
        Self { local }
    }

    /// One page of the sorted projection. Never fails: a missing or corrupt
    /// index reads as empty.
    pub async fn get_metadata_index(&self, request: PageRequest) -> Page<StoryMetadata> {
        self.load().await.page(request)
    }

    /// The whole index document, or an empty one.
    pub async fn load(&self) -> MetadataIndex {
        self.local
            .read(|store| match load_index(store) {
                Ok(index) => index.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(error = %e, "Metadata index unreadable; treating as empty");
                    MetadataIndex::default()
                }
            })
            .await
    }

    /// Regenerate the index from local story documents.
    ///
    /// Without `force` this only writes when the index is stale. Returns
    /// whether a new index was written.
    pub async fn rebuild_index(&self, force: bool) -> Result<bool> {
        let now = crate::now_millis();
        let rebuilt = self
            .local
            .write(|store| rebuild(store, force, now))
            .await??;
        if rebuilt {
            tracing::info!(force, "Metadata index rebuilt");
        }
        Ok(rebuilt)
    }

    /// Replace the entry of one persisted story.
    pub async fn refresh_entry(&self, story: &Story, rev: &Revision) -> Result<()> {
        let entry = StoryMetadata::project(story, rev);
        let now = crate::now_millis();
        self.local
            .write(|store| {
                let mut index = load_index(store).ok().flatten().unwrap_or_default();
                index.upsert(entry);
                save_index(store, &index, now)
            })
            .await??;
        Ok(())
    }

    /// Drop the entry of a deleted story.
    pub async fn remove_entry(&self, id: &str) -> Result<()> {
        let now = crate::now_millis();
        self.local
            .write(|store| {
                let mut index = load_index(store).ok().flatten().unwrap_or_default();
                if index.remove(id) {
                    save_index(store, &index, now)?;
                }
                Ok::<_, EngineError>(())
            })
            .await??;
        Ok(())
    }

    /// Rebuild (if stale) whenever a sync round lands new data.
    pub fn spawn_rebuild_listener(&self, status: &SyncStatusPublisher) -> JoinHandle<()> {
        let mut events = status.subscribe();
        let mut seen = status.current().last_sync;
        let index = self.clone();
        tokio::spawn(async move {
            loop {
                let landed = match events.recv().await {
                    Ok(status) => {
                        let landed = status.landed_after(seen);
                        if landed {
                            seen = status.last_sync;
                        }
                        landed
                    }
                    Err(RecvError::Lagged(_)) => true,
                    Err(RecvError::Closed) => return,
                };
                if landed {
                    if let Err(e) = index.rebuild_index(false).await {
                        tracing::warn!(error = %e, "Metadata index rebuild failed");
                    }
                }
            }
        })
    }
}

fn load_index(store: &Store) -> storyloom_engine::Result<Option<MetadataIndex>> {
    store
        .get(METADATA_INDEX_ID)
        .map(|doc| doc.decode_as(DocKind::MetadataIndex))
        .transpose()
}

fn save_index(store: &mut Store, index: &MetadataIndex, now: Timestamp) -> storyloom_engine::Result<()> {
    let base = store
        .get_including_deleted(METADATA_INDEX_ID)
        .map(|doc| doc.rev.clone());
    let body = serde_json::to_value(index).map_err(|e| EngineError::InvalidBody {
        id: METADATA_INDEX_ID.to_string(),
        reason: e.to_string(),
    })?;
    store.put(METADATA_INDEX_ID, DocKind::MetadataIndex, body, base.as_ref(), now)?;
    Ok(())
}

fn rebuild(store: &mut Store, force: bool, now: Timestamp) -> storyloom_engine::Result<bool> {
    let (existing, corrupt) = match load_index(store) {
        Ok(index) => (index.unwrap_or_default(), false),
        Err(e) => {
            tracing::warn!(error = %e, "Replacing unreadable metadata index");
            (MetadataIndex::default(), true)
        }
    };

    let stories: Vec<(Story, Revision)> = store
        .documents_of_kind(DocKind::Story)
        .filter_map(|doc| match doc.decode_as::<Story>(DocKind::Story) {
            Ok(story) => Some((story, doc.rev.clone())),
            Err(e) => {
                tracing::warn!(doc_id = %doc.id, error = %e, "Skipping undecodable story");
                None
            }
        })
        .collect();
    let current: HashMap<DocId, Revision> = stories
        .iter()
        .map(|(story, rev)| (story.id.clone(), rev.clone()))
        .collect();
    let lists_deleted = existing.stories.iter().any(|entry| {
        store
            .get_including_deleted(&entry.id)
            .is_some_and(|doc| !doc.is_active())
    });

    if !force && !corrupt && !lists_deleted && !existing.is_stale(&current) {
        return Ok(false);
    }

    let mut rebuilt = MetadataIndex::build(stories.iter().map(|(story, rev)| (story, rev)), now);
    for entry in existing.stories.iter() {
        if store.get_including_deleted(&entry.id).is_none() {
            rebuilt.upsert(entry.clone());
        }
    }

    if !corrupt && rebuilt.stories == existing.stories {
        return Ok(false);
    }
    save_index(store, &rebuilt, now)?;
    Ok(true)
}
