//! Story lifecycle and persistence.

use crate::error::{ClientError, Result};
use crate::index::IndexService;
use crate::local::LocalStore;
use crate::save_queue::SaveTarget;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use storyloom_engine::{
    codex_id, research_id, story_id, Codex, DocKind, Error as EngineError, ResearchSet,
    Revision, Story, StoryChanges, Timestamp,
};

/// Reads and writes story, codex and research documents.
#[derive(Clone)]
pub struct StoryService {
    local: LocalStore,
    index: IndexService,
}

impl StoryService {
    pub fn new(local: LocalStore, index: IndexService) -> Self {
        Self { local, index }
    }

    /// Load a story from the local store.
    pub async fn get_story(&self, id: &str) -> Result<Story> {
        let doc = self
            .local
            .get(id)
            .await
            .ok_or_else(|| ClientError::StoryNotFound(id.to_string()))?;
        Ok(doc.decode_as(DocKind::Story)?)
    }

    /// Create a story with one empty scene.
    pub async fn create_story(&self, title: impl Into<String>) -> Result<Story> {
        let id = story_id(&uuid::Uuid::new_v4().to_string());
        let now = crate::now_millis();
        let story = Story::new(&id, title, now);
        let body = to_body(&id, &story)?;
        let written = self
            .local
            .write(|store| store.put(&id, DocKind::Story, body, None, now))
            .await??;
        self.index.refresh_entry(&story, &written.rev).await?;
        tracing::info!(story_id = %id, "Story created");
        Ok(story)
    }

    /// Tombstone a story together with its codex and research documents.
    pub async fn delete_story(&self, id: &str) -> Result<()> {
        let now = crate::now_millis();
        self.local
            .write(|store| -> Result<()> {
                let rev = store
                    .get(id)
                    .map(|doc| doc.rev.clone())
                    .ok_or_else(|| ClientError::StoryNotFound(id.to_string()))?;
                store.delete(id, &rev, now)?;
                for companion in [codex_id(id), research_id(id)] {
                    if let Some(rev) = store.get(&companion).map(|doc| doc.rev.clone()) {
                        store.delete(&companion, &rev, now)?;
                    }
                }
                Ok(())
            })
            .await??;
        self.index.remove_entry(id).await?;
        tracing::info!(story_id = %id, "Story deleted");
        Ok(())
    }

    /// Move a story in list views. `None` falls back to recency order.
    pub async fn set_story_order(&self, id: &str, order: Option<i64>) -> Result<()> {
        self.update_story(id, |story, _| {
            story.order = order;
            Ok(())
        })
        .await
        .map(|_| ())
    }

    pub async fn get_codex(&self, story_id: &str) -> Result<Option<Codex>> {
        self.get_optional(&codex_id(story_id), DocKind::Codex).await
    }

    pub async fn save_codex(&self, codex: &Codex) -> Result<Revision> {
        self.upsert(&codex_id(&codex.story_id), DocKind::Codex, codex)
            .await
    }

    pub async fn get_research(&self, story_id: &str) -> Result<Option<ResearchSet>> {
        self.get_optional(&research_id(story_id), DocKind::Research)
            .await
    }

    pub async fn save_research(&self, research: &ResearchSet) -> Result<Revision> {
        self.upsert(&research_id(&research.story_id), DocKind::Research, research)
            .await
    }

    async fn get_optional<T: DeserializeOwned>(&self, id: &str, kind: DocKind) -> Result<Option<T>> {
        match self.local.get(id).await {
            Some(doc) => Ok(Some(doc.decode_as(kind)?)),
            None => Ok(None),
        }
    }

    async fn upsert<T: Serialize>(&self, id: &str, kind: DocKind, value: &T) -> Result<Revision> {
        let body = to_body(id, value)?;
        let now = crate::now_millis();
        let written = self
            .local
            .write(|store| {
                let base = store.get_including_deleted(id).map(|doc| doc.rev.clone());
                store.put(id, kind, body, base.as_ref(), now)
            })
            .await??;
        Ok(written.rev)
    }

    /// Read the latest story, change it, and write it back in one batch.
    ///
    /// The change is applied to the freshly read document, so fields it does
    /// not touch keep whatever replication last brought in.
    async fn update_story<F>(&self, id: &str, change: F) -> Result<(Story, Revision)>
    where
        F: FnOnce(&mut Story, Timestamp) -> storyloom_engine::Result<()>,
    {
        let now = crate::now_millis();
        let (story, rev) = self
            .local
            .write(|store| -> Result<(Story, Revision)> {
                let doc = store
                    .get(id)
                    .ok_or_else(|| ClientError::StoryNotFound(id.to_string()))?;
                let base = doc.rev.clone();
                let mut story: Story = doc.decode_as(DocKind::Story)?;
                change(&mut story, now)?;
                let body = to_body(id, &story)?;
                let written = store.put(id, DocKind::Story, body, Some(&base), now)?;
                Ok((story, written.rev))
            })
            .await??;
        self.index.refresh_entry(&story, &rev).await?;
        Ok((story, rev))
    }
}

#[async_trait]
impl SaveTarget for StoryService {
    async fn persist(&self, story_id: &str, changes: &StoryChanges) -> Result<()> {
        let mut skipped = Vec::new();
        let (_, rev) = self
            .update_story(story_id, |story, now| {
                skipped = changes.apply_to(story, now);
                Ok(())
            })
            .await?;
        for scene_id in &skipped {
            tracing::warn!(story_id, scene_id = %scene_id, "Dropped edits to a removed scene");
        }
        tracing::debug!(story_id, rev = %rev, "Story persisted");
        Ok(())
    }
}

fn to_body<T: Serialize>(id: &str, value: &T) -> storyloom_engine::Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| EngineError::InvalidBody {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_engine::{CodexEntry, PageRequest};

    fn service() -> StoryService {
        let local = LocalStore::in_memory("n");
        StoryService::new(local.clone(), IndexService::new(local))
    }

    #[tokio::test]
    async fn create_lists_and_delete_unlists() {
        let stories = service();
        let story = stories.create_story("First").await.unwrap();
        assert!(story.id.starts_with("story_"));

        let page = stories
            .index
            .get_metadata_index(PageRequest::new(0, 20))
            .await;
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].title, "First");

        stories.delete_story(&story.id).await.unwrap();
        assert!(matches!(
            stories.get_story(&story.id).await,
            Err(ClientError::StoryNotFound(_))
        ));
        assert_eq!(
            stories
                .index
                .get_metadata_index(PageRequest::new(0, 20))
                .await
                .total,
            0
        );
    }

    #[tokio::test]
    async fn persist_applies_only_named_fields() {
        let stories = service();
        let story = stories.create_story("Draft").await.unwrap();
        let scene_id = story.chapters[0].scenes[0].id.clone();

        let mut changes = StoryChanges::default();
        changes.set_scene_content(&scene_id, "<p>It was a dark night.</p>".into());
        stories.persist(&story.id, &changes).await.unwrap();

        let loaded = stories.get_story(&story.id).await.unwrap();
        assert_eq!(loaded.title, "Draft");
        assert_eq!(
            loaded.scene(&scene_id).unwrap().content,
            "<p>It was a dark night.</p>"
        );
        let entry = stories.index.load().await.get(&story.id).cloned().unwrap();
        assert_eq!(entry.word_count, 5);
    }

    #[tokio::test]
    async fn persist_skips_removed_scenes_and_keeps_the_rest() {
        let stories = service();
        let story = stories.create_story("Draft").await.unwrap();
        let scene_id = story.chapters[0].scenes[0].id.clone();

        let mut changes = StoryChanges::default();
        changes.set_scene_title("removed-elsewhere", "x".into());
        changes.set_scene_content(&scene_id, "<p>kept</p>".into());
        changes.title = Some("Renamed".into());
        stories.persist(&story.id, &changes).await.unwrap();

        let loaded = stories.get_story(&story.id).await.unwrap();
        assert_eq!(loaded.title, "Renamed");
        assert_eq!(loaded.scene(&scene_id).unwrap().content, "<p>kept</p>");
        assert!(loaded.scene("removed-elsewhere").is_none());
    }

    #[tokio::test]
    async fn persist_to_deleted_story_reports_not_found() {
        let stories = service();
        let story = stories.create_story("Draft").await.unwrap();
        stories.delete_story(&story.id).await.unwrap();

        let mut changes = StoryChanges::default();
        changes.title = Some("Too late".into());
        assert!(matches!(
            stories.persist(&story.id, &changes).await,
            Err(ClientError::StoryNotFound(_))
        ));
    }

    #[tokio::test]
    async fn codex_round_trip() {
        let stories = service();
        assert!(stories.get_codex("story_x").await.unwrap().is_none());

        let codex = Codex {
            story_id: "story_x".into(),
            entries: vec![CodexEntry {
                id: "c1".into(),
                title: "Mara".into(),
                category: "character".into(),
                content: "A cartographer.".into(),
            }],
        };
        stories.save_codex(&codex).await.unwrap();
        stories.save_codex(&codex).await.unwrap();
        assert_eq!(stories.get_codex("story_x").await.unwrap(), Some(codex));
    }
}
