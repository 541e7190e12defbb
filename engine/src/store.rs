//! Store - the in-memory document container of one replica.
//!
//! The store holds every document this node knows about, applies local
//! writes with optimistic revision checks, merges replicated versions, and
//! tracks which local revisions still need to be pushed.

use crate::document::Origin;
use crate::reconcile::{resolve, MergeStrategy, Resolution};
use crate::snapshot::StoreSnapshot;
use crate::{error::Result, DocId, DocKind, Document, Error, NodeId, Revision, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Result of a local write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    /// The document written
    pub id: DocId,
    /// Its new revision
    pub rev: Revision,
}

/// What happened to a replicated document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    /// Stored as a new document
    Inserted,
    /// Replaced the local version
    Updated,
    /// Local version kept
    Ignored,
}

impl RemoteApply {
    /// Whether the store changed.
    pub fn changed(&self) -> bool {
        !matches!(self, RemoteApply::Ignored)
    }
}

/// The document store of one replica.
#[derive(Debug, Clone)]
pub struct Store {
    /// Node ID for this store instance
    node_id: NodeId,
    /// Conflict resolution for replicated versions
    strategy: MergeStrategy,
    /// Documents by id, tombstones included
    documents: HashMap<DocId, Document>,
    /// Local revisions not yet acknowledged by the remote
    pending: BTreeMap<DocId, Revision>,
}

impl Store {
    /// Create an empty store for `node_id`.
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self {
            node_id: node_id.into(),
            strategy: MergeStrategy::default(),
            documents: HashMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Use a different merge strategy for replicated versions.
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Get the node ID.
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Get the merge strategy.
    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Write a document body locally.
    ///
    /// `base` must name the revision the caller last read (`None` for a new
    /// document). A mismatch is a [`Error::RevisionConflict`]: somebody else
    /// wrote in between and the caller must re-read. Writing over a
    /// tombstone with `base` equal to the tombstone's revision resurrects it.
    pub fn put(
        &mut self,
        id: &str,
        kind: DocKind,
        body: serde_json::Value,
        base: Option<&Revision>,
        timestamp: Timestamp,
    ) -> Result<WriteResult> {
        let current = self.documents.get_mut(id);
        let current_rev = current.as_ref().map(|d| d.rev.clone());
        if current_rev.as_ref() != base {
            return Err(Error::RevisionConflict {
                id: id.to_string(),
                expected: base.cloned(),
                actual: current_rev,
            });
        }

        let rev = match current {
            Some(doc) => {
                if doc.kind != kind {
                    return Err(Error::KindMismatch {
                        id: id.to_string(),
                        expected: doc.kind,
                        actual: kind,
                    });
                }
                doc.deleted = false;
                doc.update_body(body, &self.node_id, timestamp);
                doc.rev.clone()
            }
            None => {
                let doc = Document::new(id, kind, body, self.node_id.clone(), timestamp);
                let rev = doc.rev.clone();
                self.documents.insert(id.to_string(), doc);
                rev
            }
        };

        self.pending.insert(id.to_string(), rev.clone());
        Ok(WriteResult {
            id: id.to_string(),
            rev,
        })
    }

    /// Tombstone a document locally.
    pub fn delete(&mut self, id: &str, base: &Revision, timestamp: Timestamp) -> Result<WriteResult> {
        let doc = self
            .documents
            .get_mut(id)
            .filter(|d| d.is_active())
            .ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;

        if &doc.rev != base {
            return Err(Error::RevisionConflict {
                id: id.to_string(),
                expected: Some(base.clone()),
                actual: Some(doc.rev.clone()),
            });
        }

        doc.mark_deleted(&self.node_id, timestamp);
        let rev = doc.rev.clone();
        self.pending.insert(id.to_string(), rev.clone());
        Ok(WriteResult {
            id: id.to_string(),
            rev,
        })
    }

    /// Merge a replicated version of a document.
    pub fn apply_remote(&mut self, mut incoming: Document) -> RemoteApply {
        let outcome = match resolve(self.documents.get(&incoming.id), &incoming, self.strategy) {
            Resolution::Insert => RemoteApply::Inserted,
            Resolution::TakeIncoming { .. } => RemoteApply::Updated,
            Resolution::Identical => {
                // The remote already holds this revision.
                self.acknowledge_one(&incoming.id, &incoming.rev);
                return RemoteApply::Ignored;
            }
            Resolution::KeepLocal { .. } => return RemoteApply::Ignored,
        };

        incoming.metadata.origin = Origin::Remote;
        // A superseded local revision no longer needs pushing.
        self.pending.remove(&incoming.id);
        self.documents.insert(incoming.id.clone(), incoming);
        outcome
    }

    /// Get an active document by id.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id).filter(|d| d.is_active())
    }

    /// Get a document including tombstones.
    pub fn get_including_deleted(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    /// Whether an active document exists.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Active documents of one kind.
    pub fn documents_of_kind(&self, kind: DocKind) -> impl Iterator<Item = &Document> {
        self.documents
            .values()
            .filter(move |d| d.kind == kind && d.is_active())
    }

    /// Count of active documents of one kind.
    pub fn count_of_kind(&self, kind: DocKind) -> usize {
        self.documents_of_kind(kind).count()
    }

    /// Count of active documents.
    pub fn len(&self) -> usize {
        self.documents.values().filter(|d| d.is_active()).count()
    }

    /// True when no active document is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Documents whose latest local revision has not been acknowledged.
    pub fn pending_documents(&self) -> Vec<Document> {
        self.pending
            .keys()
            .filter_map(|id| self.documents.get(id).cloned())
            .collect()
    }

    /// Number of documents waiting to be pushed.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Acknowledge pushed revisions.
    ///
    /// A document stays pending if it was written again after the pushed
    /// revision was taken.
    pub fn acknowledge(&mut self, acked: &[(DocId, Revision)]) {
        for (id, rev) in acked {
            self.acknowledge_one(id, rev);
        }
    }

    fn acknowledge_one(&mut self, id: &str, rev: &Revision) {
        if self.pending.get(id) == Some(rev) {
            self.pending.remove(id);
        }
    }

    /// Export the current state as a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new(self.node_id.clone());
        for doc in self.documents.values() {
            snapshot.add_document(doc.clone());
        }
        snapshot.pending = self.pending.clone();
        snapshot
    }

    /// Replace the current state with a snapshot's state.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) -> Result<()> {
        snapshot.validate()?;
        if snapshot.node_id != self.node_id {
            return Err(Error::InvalidSnapshot(format!(
                "node ID mismatch: expected '{}', got '{}'",
                self.node_id, snapshot.node_id
            )));
        }

        self.documents = snapshot.documents.into_iter().collect();
        self.pending = snapshot.pending;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> Store {
        Store::new("test-node")
    }

    fn remote_doc(id: &str, generation: u64, title: &str) -> Document {
        let mut doc = Document::new(id, DocKind::Story, json!({ "title": title }), "remote", 500);
        doc.rev = Revision::with_generation("remote", generation);
        doc
    }

    #[test]
    fn create_store() {
        let store = test_store();
        assert_eq!(store.node_id(), "test-node");
        assert!(store.is_empty());
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn put_new_document() {
        let mut store = test_store();
        let result = store
            .put("story_1", DocKind::Story, json!({"title": "A"}), None, 1000)
            .unwrap();

        assert_eq!(result.rev, Revision::initial("test-node"));
        assert_eq!(store.get("story_1").unwrap().body, json!({"title": "A"}));
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn put_requires_current_revision() {
        let mut store = test_store();
        let first = store
            .put("story_1", DocKind::Story, json!({"title": "A"}), None, 1000)
            .unwrap();

        let second = store
            .put("story_1", DocKind::Story, json!({"title": "B"}), Some(&first.rev), 2000)
            .unwrap();
        assert_eq!(second.rev.generation, 2);

        // Stale base revision
        let result = store.put("story_1", DocKind::Story, json!({"title": "C"}), Some(&first.rev), 3000);
        assert!(matches!(result, Err(Error::RevisionConflict { .. })));

        // Creating over an existing document
        let result = store.put("story_1", DocKind::Story, json!({}), None, 3000);
        assert!(matches!(
            result,
            Err(Error::RevisionConflict { expected: None, .. })
        ));
        assert_eq!(store.get("story_1").unwrap().body, json!({"title": "B"}));
    }

    #[test]
    fn put_rejects_kind_change() {
        let mut store = test_store();
        let first = store
            .put("story_1", DocKind::Story, json!({}), None, 1000)
            .unwrap();
        let result = store.put("story_1", DocKind::Codex, json!({}), Some(&first.rev), 2000);
        assert!(matches!(result, Err(Error::KindMismatch { .. })));
    }

    #[test]
    fn delete_tombstones_and_marks_pending() {
        let mut store = test_store();
        let first = store
            .put("story_1", DocKind::Story, json!({}), None, 1000)
            .unwrap();
        store.acknowledge(&[("story_1".into(), first.rev.clone())]);

        store.delete("story_1", &first.rev, 2000).unwrap();

        assert!(store.get("story_1").is_none());
        assert!(store.get_including_deleted("story_1").unwrap().deleted);
        assert_eq!(store.pending_count(), 1);
        assert!(matches!(
            store.delete("story_1", &first.rev, 3000),
            Err(Error::DocumentNotFound(_))
        ));
    }

    #[test]
    fn apply_remote_inserts_and_updates() {
        let mut store = test_store();
        assert_eq!(store.apply_remote(remote_doc("story_1", 1, "A")), RemoteApply::Inserted);
        assert_eq!(store.apply_remote(remote_doc("story_1", 2, "B")), RemoteApply::Updated);
        assert_eq!(store.apply_remote(remote_doc("story_1", 1, "A")), RemoteApply::Ignored);
        assert_eq!(store.get("story_1").unwrap().body, json!({"title": "B"}));
        assert_eq!(
            store.get("story_1").unwrap().metadata.origin,
            Origin::Remote
        );
        // Replicated documents are never pending.
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn remote_win_clears_pending() {
        let mut store = test_store();
        store
            .put("story_1", DocKind::Story, json!({"title": "local"}), None, 1000)
            .unwrap();
        assert_eq!(store.pending_count(), 1);

        store.apply_remote(remote_doc("story_1", 5, "remote"));
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.get("story_1").unwrap().body, json!({"title": "remote"}));
    }

    #[test]
    fn acknowledge_keeps_newer_writes_pending() {
        let mut store = test_store();
        let first = store
            .put("story_1", DocKind::Story, json!({"v": 1}), None, 1000)
            .unwrap();
        let _second = store
            .put("story_1", DocKind::Story, json!({"v": 2}), Some(&first.rev), 2000)
            .unwrap();

        store.acknowledge(&[("story_1".into(), first.rev)]);
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn counts_by_kind() {
        let mut store = test_store();
        store.put("story_1", DocKind::Story, json!({}), None, 1).unwrap();
        store.put("story_2", DocKind::Story, json!({}), None, 1).unwrap();
        store.put("codex_story_1", DocKind::Codex, json!({}), None, 1).unwrap();

        assert_eq!(store.count_of_kind(DocKind::Story), 2);
        assert_eq!(store.count_of_kind(DocKind::Codex), 1);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn export_import_roundtrip() {
        let mut store = test_store();
        store.put("story_1", DocKind::Story, json!({"title": "A"}), None, 1).unwrap();
        store.apply_remote(remote_doc("story_2", 3, "B"));

        let snapshot = store.export_state();
        let mut restored = test_store();
        restored.import_state(snapshot).unwrap();

        assert_eq!(restored.get("story_1"), store.get("story_1"));
        assert_eq!(restored.get("story_2"), store.get("story_2"));
        assert_eq!(restored.pending_count(), 1);
    }

    #[test]
    fn import_rejects_foreign_node() {
        let store = Store::new("node-a");
        let mut other = Store::new("node-b");
        let result = other.import_state(store.export_state());
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }
}
