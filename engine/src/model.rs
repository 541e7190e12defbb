//! Story model: the typed bodies of story, codex and research documents.

use crate::{text, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-story writing settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySettings {
    /// Language the story is written in (BCP 47 tag)
    pub language: String,
    /// Narrative point of view, e.g. "first", "third-limited"
    pub point_of_view: String,
}

/// A scene: the leaf unit of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub title: String,
    /// Rich-text content blob
    pub content: String,
    pub order: u32,
}

/// A chapter with its ordered scenes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub title: String,
    pub order: u32,
    pub scenes: Vec<Scene>,
}

/// A story document body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    pub chapters: Vec<Chapter>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub settings: StorySettings,
    /// Manual position in list views; unset stories sort by recency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

impl Story {
    /// A new story with one chapter holding one empty scene.
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: Timestamp) -> Self {
        let id = id.into();
        Self {
            chapters: vec![Chapter {
                id: format!("{id}-ch1"),
                title: "Chapter 1".to_string(),
                order: 0,
                scenes: vec![Scene {
                    id: format!("{id}-ch1-sc1"),
                    title: "Scene 1".to_string(),
                    content: String::new(),
                    order: 0,
                }],
            }],
            id,
            title: title.into(),
            created_at: now,
            updated_at: now,
            cover_image: None,
            settings: StorySettings::default(),
            order: None,
        }
    }

    /// Iterate scenes in reading order.
    pub fn scenes(&self) -> impl Iterator<Item = &Scene> {
        self.chapters.iter().flat_map(|c| c.scenes.iter())
    }

    /// Find a scene by id.
    pub fn scene(&self, scene_id: &str) -> Option<&Scene> {
        self.scenes().find(|s| s.id == scene_id)
    }

    /// Find a scene by id, mutably.
    pub fn scene_mut(&mut self, scene_id: &str) -> Option<&mut Scene> {
        self.chapters
            .iter_mut()
            .flat_map(|c| c.scenes.iter_mut())
            .find(|s| s.id == scene_id)
    }

    /// Total number of scenes.
    pub fn scene_count(&self) -> usize {
        self.chapters.iter().map(|c| c.scenes.len()).sum()
    }

    /// Total word count across all scenes.
    pub fn word_count(&self) -> usize {
        self.scenes().map(|s| text::word_count(&s.content)).sum()
    }
}

/// Pending edits to one scene.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl SceneChange {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

/// The fields of a story that changed since the last confirmed save.
///
/// Applying a change set only touches the named fields, so sibling scenes
/// that were updated by replication in the meantime are left alone.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub scenes: BTreeMap<String, SceneChange>,
}

impl StoryChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.scenes.values().all(SceneChange::is_empty)
    }

    /// Record a new scene content.
    pub fn set_scene_content(&mut self, scene_id: &str, content: String) {
        self.scenes.entry(scene_id.to_string()).or_default().content = Some(content);
    }

    /// Record a new scene title.
    pub fn set_scene_title(&mut self, scene_id: &str, title: String) {
        self.scenes.entry(scene_id.to_string()).or_default().title = Some(title);
    }

    /// Fold an older change set underneath this one; fields set here win.
    pub fn absorb_older(&mut self, older: StoryChanges) {
        if self.title.is_none() {
            self.title = older.title;
        }
        for (scene_id, change) in older.scenes {
            let entry = self.scenes.entry(scene_id).or_default();
            if entry.title.is_none() {
                entry.title = change.title;
            }
            if entry.content.is_none() {
                entry.content = change.content;
            }
        }
        self.scenes.retain(|_, c| !c.is_empty());
    }

    /// Apply the changed fields to `story`.
    ///
    /// Changes to scenes the story no longer has are skipped; their ids are
    /// returned.
    pub fn apply_to(&self, story: &mut Story, now: Timestamp) -> Vec<String> {
        if let Some(title) = &self.title {
            story.title = title.clone();
        }
        let mut skipped = Vec::new();
        for (scene_id, change) in &self.scenes {
            let Some(scene) = story.scene_mut(scene_id) else {
                skipped.push(scene_id.clone());
                continue;
            };
            if let Some(title) = &change.title {
                scene.title = title.clone();
            }
            if let Some(content) = &change.content {
                scene.content = content.clone();
            }
        }
        story.updated_at = now;
        skipped
    }
}

/// One entry of a story codex (character, place, item...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodexEntry {
    pub id: String,
    pub title: String,
    pub category: String,
    pub content: String,
}

/// The codex document body of a story.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Codex {
    pub story_id: String,
    pub entries: Vec<CodexEntry>,
}

/// A research note attached to a story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchNote {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// The research document set of a story.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchSet {
    pub story_id: String,
    pub notes: Vec<ResearchNote>,
}
