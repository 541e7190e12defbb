//! Replication filter: which documents take part in the live sync stream.

use crate::document::{codex_id, METADATA_INDEX_ID};
use crate::DocId;
use serde::{Deserialize, Serialize};

/// Predicate over document ids deciding inclusion in replication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum ReplicationFilter {
    /// The metadata index, plus the active story and its codex when one is focused.
    Selective { active: Option<DocId> },
    /// Every document. Used for one-shot repair pulls.
    Bootstrap,
}

impl ReplicationFilter {
    /// Selective filter scoped to `active`.
    pub fn selective(active: Option<&str>) -> Self {
        ReplicationFilter::Selective {
            active: active.map(str::to_string),
        }
    }

    /// Whether a document id passes the filter.
    pub fn includes(&self, id: &str) -> bool {
        match self {
            ReplicationFilter::Bootstrap => true,
            ReplicationFilter::Selective { active } => {
                if id == METADATA_INDEX_ID {
                    return true;
                }
                match active {
                    Some(story_id) => id == story_id || id == codex_id(story_id),
                    None => false,
                }
            }
        }
    }

    /// Ids a selective filter admits, for remotes that filter server side.
    /// `None` means every document.
    pub fn admitted_ids(&self) -> Option<Vec<DocId>> {
        match self {
            ReplicationFilter::Bootstrap => None,
            ReplicationFilter::Selective { active } => {
                let mut ids = vec![METADATA_INDEX_ID.to_string()];
                if let Some(story_id) = active {
                    ids.push(story_id.clone());
                    ids.push(codex_id(story_id));
                }
                Some(ids)
            }
        }
    }

    /// True in bootstrap mode.
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, ReplicationFilter::Bootstrap)
    }

    /// Active story named by a selective filter.
    pub fn active(&self) -> Option<&str> {
        match self {
            ReplicationFilter::Selective { active } => active.as_deref(),
            ReplicationFilter::Bootstrap => None,
        }
    }

    /// Key under which replication progress for this filter is checkpointed.
    ///
    /// Two filters with the same key select the same documents.
    pub fn checkpoint_key(&self) -> String {
        match self {
            ReplicationFilter::Bootstrap => "bootstrap".to_string(),
            ReplicationFilter::Selective { active: None } => "selective".to_string(),
            ReplicationFilter::Selective {
                active: Some(story_id),
            } => format!("selective:{story_id}"),
        }
    }
}

impl Default for ReplicationFilter {
    fn default() -> Self {
        ReplicationFilter::Selective { active: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selective_without_active_only_takes_index() {
        let filter = ReplicationFilter::selective(None);
        assert!(filter.includes(METADATA_INDEX_ID));
        assert!(!filter.includes("story_1"));
        assert!(!filter.includes("codex_story_1"));
    }

    #[test]
    fn selective_takes_active_story_and_codex() {
        let filter = ReplicationFilter::selective(Some("story_1"));
        assert!(filter.includes("story_1"));
        assert!(filter.includes("codex_story_1"));
        assert!(filter.includes(METADATA_INDEX_ID));
        assert!(!filter.includes("story_2"));
        assert!(!filter.includes("codex_story_2"));
        assert!(!filter.includes("research_story_1"));
    }

    #[test]
    fn bootstrap_takes_everything() {
        let filter = ReplicationFilter::Bootstrap;
        assert!(filter.includes("story_1"));
        assert!(filter.includes("anything"));
        assert!(filter.is_bootstrap());
    }

    #[test]
    fn admitted_ids_match_includes() {
        let filter = ReplicationFilter::selective(Some("story_1"));
        let ids = filter.admitted_ids().unwrap();
        assert_eq!(ids, vec![METADATA_INDEX_ID, "story_1", "codex_story_1"]);
        assert!(ids.iter().all(|id| filter.includes(id)));

        assert_eq!(
            ReplicationFilter::selective(None).admitted_ids(),
            Some(vec![METADATA_INDEX_ID.to_string()])
        );
        assert_eq!(ReplicationFilter::Bootstrap.admitted_ids(), None);
    }

    #[test]
    fn checkpoint_keys_differ_per_active_story() {
        let a = ReplicationFilter::selective(Some("story_a")).checkpoint_key();
        let b = ReplicationFilter::selective(Some("story_b")).checkpoint_key();
        let none = ReplicationFilter::selective(None).checkpoint_key();
        assert_ne!(a, b);
        assert_ne!(a, none);
        assert_eq!(ReplicationFilter::default().checkpoint_key(), none);
    }
}
