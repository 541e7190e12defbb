//! Documents: the unit of storage and replication.
//!
//! One document per story (chapters and scenes inline), one per story codex,
//! one per story research set, plus the singleton metadata index.

use crate::{DocId, Error, NodeId, Result, Revision, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Id of the singleton metadata index document.
pub const METADATA_INDEX_ID: &str = "story-metadata-index";

const STORY_PREFIX: &str = "story_";
const CODEX_PREFIX: &str = "codex_";
const RESEARCH_PREFIX: &str = "research_";

/// Id of the codex document belonging to a story.
pub fn codex_id(story_id: &str) -> DocId {
    format!("{CODEX_PREFIX}{story_id}")
}

/// Id of the research document set belonging to a story.
pub fn research_id(story_id: &str) -> DocId {
    format!("{RESEARCH_PREFIX}{story_id}")
}

/// Build a story document id from a unique suffix.
pub fn story_id(suffix: &str) -> DocId {
    format!("{STORY_PREFIX}{suffix}")
}

/// What a document holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocKind {
    Story,
    Codex,
    Research,
    MetadataIndex,
}

impl DocKind {
    /// Stable lowercase name, used on the wire and in SQL.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Story => "story",
            DocKind::Codex => "codex",
            DocKind::Research => "research",
            DocKind::MetadataIndex => "metadataIndex",
        }
    }

    /// Parse the name produced by [`DocKind::as_str`].
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "story" => Some(DocKind::Story),
            "codex" => Some(DocKind::Codex),
            "research" => Some(DocKind::Research),
            "metadataIndex" => Some(DocKind::MetadataIndex),
            _ => None,
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKind::MetadataIndex => f.write_str("metadata index"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Origin of the current revision of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Written on this node
    Local,
    /// Received through replication
    Remote,
}

/// Metadata associated with a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// When the document was first created (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the document was last written (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Whether the current revision was written here or replicated in
    pub origin: Origin,
}

impl Metadata {
    /// Metadata for a document created on this node.
    pub fn new_local(timestamp: Timestamp) -> Self {
        Self {
            created_at: timestamp,
            updated_at: timestamp,
            origin: Origin::Local,
        }
    }

    /// Update metadata for a modification.
    pub fn touch(&mut self, timestamp: Timestamp, origin: Origin) {
        self.updated_at = timestamp;
        self.origin = origin;
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Stable, human-readable id
    pub id: DocId,
    /// What the body holds
    pub kind: DocKind,
    /// Current revision
    pub rev: Revision,
    /// JSON body
    pub body: serde_json::Value,
    /// Timestamps and origin
    pub metadata: Metadata,
    /// Soft delete flag (tombstone)
    pub deleted: bool,
}

impl Document {
    /// Create the first revision of a document on `node_id`.
    pub fn new(
        id: impl Into<DocId>,
        kind: DocKind,
        body: serde_json::Value,
        node_id: impl Into<NodeId>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            rev: Revision::initial(node_id),
            body,
            metadata: Metadata::new_local(timestamp),
            deleted: false,
        }
    }

    /// Build a document by serializing a typed body.
    pub fn encode<T: Serialize>(
        id: impl Into<DocId>,
        kind: DocKind,
        value: &T,
        node_id: impl Into<NodeId>,
        timestamp: Timestamp,
    ) -> Result<Self> {
        let id = id.into();
        let body = encode_body(&id, value)?;
        Ok(Self::new(id, kind, body, node_id, timestamp))
    }

    /// Deserialize the body into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| Error::InvalidBody {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }

    /// Deserialize the body, checking the document kind first.
    pub fn decode_as<T: DeserializeOwned>(&self, kind: DocKind) -> Result<T> {
        if self.kind != kind {
            return Err(Error::KindMismatch {
                id: self.id.clone(),
                expected: kind,
                actual: self.kind,
            });
        }
        self.decode()
    }

    /// Check if the document is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Replace the body, producing the next revision.
    pub fn update_body(&mut self, body: serde_json::Value, node_id: &str, timestamp: Timestamp) {
        self.body = body;
        self.rev = self.rev.next(node_id);
        self.metadata.touch(timestamp, Origin::Local);
    }

    /// Mark as deleted, producing the next revision.
    pub fn mark_deleted(&mut self, node_id: &str, timestamp: Timestamp) {
        self.deleted = true;
        self.rev = self.rev.next(node_id);
        self.metadata.touch(timestamp, Origin::Local);
    }
}

pub(crate) fn encode_body<T: Serialize>(id: &str, value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::InvalidBody {
        id: id.to_string(),
        reason: e.to_string(),
    })
}
