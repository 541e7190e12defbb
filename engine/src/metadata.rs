//! Metadata index: a denormalized, paginated projection of stories.
//!
//! List views read this instead of loading full story bodies. The index is
//! never authoritative; it can always be regenerated from story documents.

use crate::model::Story;
use crate::{text, DocId, Revision, Timestamp};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Maximum preview length in characters.
pub const PREVIEW_CHARS: usize = 200;

/// Summary of one story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryMetadata {
    pub id: DocId,
    pub title: String,
    pub chapter_count: usize,
    pub scene_count: usize,
    pub word_count: usize,
    /// Plain-text start of the first scene with content
    pub preview: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Manual position; stories without one follow, newest first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    /// Revision of the story document this entry was projected from
    pub source_rev: Revision,
}

impl StoryMetadata {
    /// Project a story document body into its summary.
    pub fn project(story: &Story, source_rev: &Revision) -> Self {
        let preview = story
            .scenes()
            .map(|s| text::preview(&s.content, PREVIEW_CHARS))
            .find(|p| !p.is_empty())
            .unwrap_or_default();

        Self {
            id: story.id.clone(),
            title: story.title.clone(),
            chapter_count: story.chapters.len(),
            scene_count: story.scene_count(),
            word_count: story.word_count(),
            preview,
            created_at: story.created_at,
            updated_at: story.updated_at,
            order: story.order,
            cover_image: story.cover_image.clone(),
            source_rev: source_rev.clone(),
        }
    }
}

/// List ordering: manual order first (ascending), then most recently
/// updated, then id so the order is total.
pub fn list_order(a: &StoryMetadata, b: &StoryMetadata) -> Ordering {
    match (a.order, b.order) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.updated_at.cmp(&a.updated_at),
    }
    .then_with(|| a.id.cmp(&b.id))
}

/// Which page of the index to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Zero-based page number
    pub page: usize,
    /// Entries per page (at least one)
    pub per_page: usize,
}

impl PageRequest {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page,
            per_page: per_page.max(1),
        }
    }
}

/// One page of the sorted projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub has_more: bool,
}

/// The index document body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataIndex {
    /// Entries, kept in list order
    pub stories: Vec<StoryMetadata>,
    /// When the index was last regenerated
    pub rebuilt_at: Timestamp,
}

impl MetadataIndex {
    /// Build an index from every story body with its revision.
    pub fn build<'a>(stories: impl IntoIterator<Item = (&'a Story, &'a Revision)>, now: Timestamp) -> Self {
        let mut index = Self {
            stories: stories
                .into_iter()
                .map(|(story, rev)| StoryMetadata::project(story, rev))
                .collect(),
            rebuilt_at: now,
        };
        index.sort();
        index
    }

    /// Re-establish list order.
    pub fn sort(&mut self) {
        self.stories.sort_by(list_order);
    }

    /// Insert or replace one entry.
    pub fn upsert(&mut self, entry: StoryMetadata) {
        match self.stories.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => self.stories.push(entry),
        }
        self.sort();
    }

    /// Drop one entry. Returns whether it was present.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.stories.len();
        self.stories.retain(|e| e.id != id);
        self.stories.len() != before
    }

    /// Look up an entry.
    pub fn get(&self, id: &str) -> Option<&StoryMetadata> {
        self.stories.iter().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    /// Whether the index disagrees with the given story revisions.
    ///
    /// Entries for stories not listed in `current` are not considered stale:
    /// they describe stories this replica has not pulled.
    pub fn is_stale(&self, current: &HashMap<DocId, Revision>) -> bool {
        current
            .iter()
            .any(|(id, rev)| self.get(id).map(|e| &e.source_rev) != Some(rev))
    }

    /// Slice a page out of the sorted projection.
    ///
    /// Sorting happens before slicing, so pages are stable even if entries
    /// were appended out of order.
    pub fn page(&self, request: PageRequest) -> Page<StoryMetadata> {
        let per_page = request.per_page.max(1);
        let mut sorted = self.stories.clone();
        sorted.sort_by(list_order);

        let total = sorted.len();
        let start = request.page.saturating_mul(per_page).min(total);
        let end = start.saturating_add(per_page).min(total);
        Page {
            items: sorted[start..end].to_vec(),
            page: request.page,
            per_page,
            total,
            has_more: end < total,
        }
    }
}
