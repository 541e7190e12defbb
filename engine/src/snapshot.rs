//! Snapshot types for persisting and restoring store state.
//!
//! Snapshots are the bridge between the in-memory [`Store`](crate::Store)
//! and durable storage. They are designed for deterministic serialization.

use crate::{error::Result, DocId, Document, Error, NodeId, Revision};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a replica.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Node ID of the store
    pub node_id: NodeId,
    /// All documents by id, tombstones included
    pub documents: BTreeMap<DocId, Document>,
    /// Local revisions not yet acknowledged by the remote
    #[serde(default)]
    pub pending: BTreeMap<DocId, Revision>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            node_id: node_id.into(),
            documents: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Add a document to the snapshot.
    pub fn add_document(&mut self, doc: Document) {
        self.documents.insert(doc.id.clone(), doc);
    }

    /// Count documents, tombstones included.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Count active (non-deleted) documents.
    pub fn active_document_count(&self) -> usize {
        self.documents.values().filter(|d| d.is_active()).count()
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        for (id, doc) in &self.documents {
            if id != &doc.id {
                return Err(Error::InvalidSnapshot(format!(
                    "document stored under '{}' has id '{}'",
                    id, doc.id
                )));
            }
        }
        for (id, rev) in &self.pending {
            match self.documents.get(id) {
                Some(doc) if &doc.rev >= rev => {}
                _ => {
                    return Err(Error::InvalidSnapshot(format!(
                        "pending revision {rev} of '{id}' has no matching document"
                    )))
                }
            }
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocKind;
    use serde_json::json;

    fn doc(id: &str) -> Document {
        Document::new(id, DocKind::Story, json!({ "title": id }), "node-1", 1000)
    }

    #[test]
    fn json_roundtrip() {
        let mut snapshot = StoreSnapshot::new("node-1");
        snapshot.add_document(doc("story_b"));
        snapshot.add_document(doc("story_a"));
        snapshot
            .pending
            .insert("story_a".into(), Revision::initial("node-1"));

        let json = snapshot.to_json().unwrap();
        let restored = StoreSnapshot::from_json(&json).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn serialization_is_deterministic() {
        let mut a = StoreSnapshot::new("node-1");
        a.add_document(doc("story_1"));
        a.add_document(doc("story_2"));

        let mut b = StoreSnapshot::new("node-1");
        b.add_document(doc("story_2"));
        b.add_document(doc("story_1"));

        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn rejects_future_format() {
        let mut snapshot = StoreSnapshot::new("node-1");
        snapshot.format_version = SNAPSHOT_FORMAT_VERSION + 1;
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(matches!(
            StoreSnapshot::from_json(&json),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn validate_catches_dangling_pending() {
        let mut snapshot = StoreSnapshot::new("node-1");
        snapshot
            .pending
            .insert("story_x".into(), Revision::initial("node-1"));
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn counts() {
        let mut snapshot = StoreSnapshot::new("node-1");
        snapshot.add_document(doc("story_1"));
        let mut gone = doc("story_2");
        gone.deleted = true;
        snapshot.add_document(gone);
        assert_eq!(snapshot.document_count(), 2);
        assert_eq!(snapshot.active_document_count(), 1);
    }
}
