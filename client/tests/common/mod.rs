//! Shared helpers for the client integration tests.

#![allow(dead_code)]

use serde_json::json;
use storyloom_client::{ClientConfig, MemoryRemote, Storyloom};
use storyloom_engine::{codex_id, DocKind, Document, MetadataIndex, Story, StoryMetadata};

pub fn config(node_id: &str) -> ClientConfig {
    ClientConfig {
        node_id: node_id.to_string(),
        ..ClientConfig::default()
    }
}

pub async fn open(remote: MemoryRemote) -> Storyloom<MemoryRemote> {
    Storyloom::open(config("local"), remote).await.unwrap()
}

/// A story document as another device would have pushed it.
pub fn story_doc(id: &str, title: &str, updated_at: u64) -> Document {
    let mut story = Story::new(id, title, updated_at);
    story.updated_at = updated_at;
    Document::encode(id, DocKind::Story, &story, "remote", updated_at).unwrap()
}

pub fn codex_doc(story_id: &str) -> Document {
    Document::new(
        codex_id(story_id),
        DocKind::Codex,
        json!({ "storyId": story_id, "entries": [] }),
        "remote",
        1000,
    )
}

/// An index document listing the given story documents.
pub fn index_doc(stories: &[&Document]) -> Document {
    let mut index = MetadataIndex::default();
    for doc in stories {
        let story: Story = doc.decode().unwrap();
        index.upsert(StoryMetadata::project(&story, &doc.rev));
    }
    Document::encode(
        storyloom_engine::METADATA_INDEX_ID,
        DocKind::MetadataIndex,
        &index,
        "remote",
        1000,
    )
    .unwrap()
}

pub fn bump(doc: &Document, body: serde_json::Value, updated_at: u64) -> Document {
    let mut next = doc.clone();
    next.update_body(body, "remote", updated_at);
    next
}
