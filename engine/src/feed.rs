//! Change feed: the shape of the remote store.
//!
//! The feed keeps the latest version of every document together with the
//! sequence number at which it was last written. Replicas pull everything
//! after their checkpoint and push their pending revisions; the feed decides
//! which pushed versions win using the same resolution rules as replicas.

use crate::filter::ReplicationFilter;
use crate::reconcile::{resolve, MergeStrategy, Resolution};
use crate::{DocId, DocKind, Document, NodeId, Revision};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Position in the change feed.
pub type Seq = u64;

/// Default number of documents per pull.
pub const DEFAULT_BATCH_LIMIT: usize = 100;

/// Upper bound on documents per pull.
pub const MAX_BATCH_LIMIT: usize = 1000;

/// Clamp a requested pull size to the accepted range.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .map(|l| l.clamp(1, MAX_BATCH_LIMIT))
        .unwrap_or(DEFAULT_BATCH_LIMIT)
}

/// A batch of changes, in sequence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBatch {
    /// Latest versions of documents changed after the requested sequence
    pub documents: Vec<Document>,
    /// Sequence to resume from
    pub last_seq: Seq,
    /// Whether more changes are waiting
    pub has_more: bool,
}

/// Body of a push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    /// Pushing node
    pub node_id: NodeId,
    /// Pending document versions
    pub documents: Vec<Document>,
}

/// A pushed revision that was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedDoc {
    pub id: DocId,
    pub rev: Revision,
}

/// A pushed revision that lost to the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedDoc {
    pub id: DocId,
    pub rev: Revision,
    pub reason: String,
    pub winner: Revision,
}

/// Outcome of a push.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub accepted: Vec<AcceptedDoc>,
    pub rejected: Vec<RejectedDoc>,
}

/// Answer to a count query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub kind: DocKind,
    pub count: u64,
}

/// What the feed does with one pushed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushDecision {
    /// Store it
    Accept,
    /// Already stored (a retried push)
    AlreadyStored,
    /// Stored version wins
    Reject { winner: Revision },
}

/// Decide what happens to a pushed version given the stored one.
pub fn decide_push(stored: Option<&Document>, pushed: &Document, strategy: MergeStrategy) -> PushDecision {
    match resolve(stored, pushed, strategy) {
        Resolution::Insert | Resolution::TakeIncoming { .. } => PushDecision::Accept,
        Resolution::Identical => PushDecision::AlreadyStored,
        Resolution::KeepLocal { winner } => PushDecision::Reject { winner },
    }
}

/// In-memory change feed.
#[derive(Debug, Clone, Default)]
pub struct ChangeFeed {
    strategy: MergeStrategy,
    documents: HashMap<DocId, (Seq, Document)>,
    last_seq: Seq,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different merge strategy for pushes.
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Current head of the feed.
    pub fn last_seq(&self) -> Seq {
        self.last_seq
    }

    /// Store a pushed version if it wins.
    pub fn accept(&mut self, doc: Document) -> PushDecision {
        let decision = decide_push(self.documents.get(&doc.id).map(|(_, d)| d), &doc, self.strategy);
        if decision == PushDecision::Accept {
            self.last_seq += 1;
            self.documents.insert(doc.id.clone(), (self.last_seq, doc));
        }
        decision
    }

    /// Apply a whole push.
    pub fn push(&mut self, documents: Vec<Document>) -> PushResponse {
        let mut response = PushResponse::default();
        for doc in documents {
            let (id, rev) = (doc.id.clone(), doc.rev.clone());
            match self.accept(doc) {
                PushDecision::Accept | PushDecision::AlreadyStored => {
                    response.accepted.push(AcceptedDoc { id, rev })
                }
                PushDecision::Reject { winner } => response.rejected.push(RejectedDoc {
                    id,
                    rev,
                    reason: "conflict".to_string(),
                    winner,
                }),
            }
        }
        response
    }

    /// Documents admitted by `filter` and written after `since`, oldest first.
    ///
    /// Once the filtered scan is exhausted `last_seq` jumps to the head of
    /// the feed, so a narrow filter does not rescan skipped writes.
    pub fn changes_since(&self, since: Seq, limit: usize, filter: &ReplicationFilter) -> ChangeBatch {
        let limit = limit.max(1);
        let mut changed: Vec<&(Seq, Document)> = self
            .documents
            .values()
            .filter(|(seq, doc)| *seq > since && filter.includes(&doc.id))
            .collect();
        changed.sort_by_key(|(seq, _)| *seq);

        let has_more = changed.len() > limit;
        changed.truncate(limit);
        let last_seq = match changed.last() {
            Some((seq, _)) if has_more => *seq,
            _ => since.max(self.last_seq),
        };

        ChangeBatch {
            documents: changed.into_iter().map(|(_, d)| d.clone()).collect(),
            last_seq,
            has_more,
        }
    }

    /// Latest version of a document, tombstones included.
    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.get(id).map(|(_, d)| d)
    }

    /// Count of active documents of one kind.
    pub fn count(&self, kind: DocKind) -> usize {
        self.documents
            .values()
            .filter(|(_, d)| d.kind == kind && d.is_active())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALL: ReplicationFilter = ReplicationFilter::Bootstrap;

    fn doc(id: &str, node: &str, generation: u64) -> Document {
        let mut doc = Document::new(id, DocKind::Story, json!({}), node, 1000);
        doc.rev = Revision::with_generation(node, generation);
        doc
    }

    #[test]
    fn clamp_limit_bounds() {
        assert_eq!(clamp_limit(None), DEFAULT_BATCH_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(50_000)), MAX_BATCH_LIMIT);
    }

    #[test]
    fn changes_are_paged_in_sequence_order() {
        let mut feed = ChangeFeed::new();
        for i in 0..5 {
            feed.accept(doc(&format!("story_{i}"), "a", 1));
        }

        let first = feed.changes_since(0, 2, &ALL);
        assert_eq!(first.documents.len(), 2);
        assert_eq!(first.documents[0].id, "story_0");
        assert_eq!(first.last_seq, 2);
        assert!(first.has_more);

        let rest = feed.changes_since(first.last_seq, 10, &ALL);
        assert_eq!(rest.documents.len(), 3);
        assert!(!rest.has_more);

        let empty = feed.changes_since(rest.last_seq, 10, &ALL);
        assert!(empty.documents.is_empty());
        assert_eq!(empty.last_seq, rest.last_seq);
    }

    #[test]
    fn rewritten_document_moves_to_head() {
        let mut feed = ChangeFeed::new();
        feed.accept(doc("story_1", "a", 1));
        feed.accept(doc("story_2", "a", 1));
        feed.accept(doc("story_1", "a", 2));

        let batch = feed.changes_since(0, 10, &ALL);
        let ids: Vec<_> = batch.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["story_2", "story_1"]);
        assert_eq!(batch.documents[1].rev.generation, 2);
    }

    #[test]
    fn filtered_pull_only_moves_admitted_documents() {
        let mut feed = ChangeFeed::new();
        for i in 0..50 {
            feed.accept(doc(&format!("story_{i}"), "a", 1));
        }
        let focus = ReplicationFilter::selective(Some("story_7"));

        let batch = feed.changes_since(0, 10, &focus);
        let ids: Vec<_> = batch.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["story_7"]);
        assert!(!batch.has_more);
        assert_eq!(batch.last_seq, 50);

        feed.accept(doc("story_9", "a", 2));
        assert!(feed.changes_since(batch.last_seq, 10, &focus).documents.is_empty());
        feed.accept(doc("story_7", "a", 2));
        let next = feed.changes_since(batch.last_seq, 10, &focus);
        assert_eq!(next.documents.len(), 1);
        assert_eq!(next.last_seq, 52);
    }

    #[test]
    fn push_is_idempotent_and_rejects_losers() {
        let mut feed = ChangeFeed::new();
        let response = feed.push(vec![doc("story_1", "a", 2)]);
        assert_eq!(response.accepted.len(), 1);

        let retried = feed.push(vec![doc("story_1", "a", 2)]);
        assert_eq!(retried.accepted.len(), 1);
        assert_eq!(feed.last_seq(), 1);

        let stale = feed.push(vec![doc("story_1", "b", 1)]);
        assert_eq!(stale.rejected.len(), 1);
        assert_eq!(stale.rejected[0].winner, Revision::with_generation("a", 2));
    }

    #[test]
    fn count_skips_tombstones_and_other_kinds() {
        let mut feed = ChangeFeed::new();
        feed.accept(doc("story_1", "a", 1));
        let mut gone = doc("story_2", "a", 2);
        gone.deleted = true;
        feed.accept(gone);
        let mut codex = doc("codex_story_1", "a", 1);
        codex.kind = DocKind::Codex;
        feed.accept(codex);

        assert_eq!(feed.count(DocKind::Story), 1);
        assert_eq!(feed.count(DocKind::Codex), 1);
    }
}
