//! Document revisions.
//!
//! Every stored document carries a revision made of a generation counter and
//! the id of the node that produced it. Revisions are totally ordered, which
//! is what makes conflict resolution deterministic across replicas.

use crate::{Error, NodeId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A document revision, rendered as `<generation>-<node>`.
///
/// Ordering rules:
/// 1. Higher generation wins
/// 2. If generations are equal, lexicographically higher node id wins
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// Number of writes this document has seen
    pub generation: u64,
    /// Node that produced this revision
    pub node_id: NodeId,
}

impl Revision {
    /// The first revision a node produces for a new document.
    pub fn initial(node_id: impl Into<NodeId>) -> Self {
        Self {
            generation: 1,
            node_id: node_id.into(),
        }
    }

    /// Create a revision with a specific generation.
    pub fn with_generation(node_id: impl Into<NodeId>, generation: u64) -> Self {
        Self {
            generation,
            node_id: node_id.into(),
        }
    }

    /// The revision a node produces when it writes on top of this one.
    pub fn next(&self, node_id: impl Into<NodeId>) -> Self {
        Self {
            generation: self.generation + 1,
            node_id: node_id.into(),
        }
    }

    /// True if `other` supersedes this revision.
    pub fn is_superseded_by(&self, other: &Revision) -> bool {
        other > self
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.generation.cmp(&other.generation) {
            Ordering::Equal => self.node_id.cmp(&other.node_id),
            other => other,
        }
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.node_id)
    }
}

impl FromStr for Revision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, node_id) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidRevision(s.to_string()))?;
        let generation = generation
            .parse::<u64>()
            .map_err(|_| Error::InvalidRevision(s.to_string()))?;
        if generation == 0 || node_id.is_empty() {
            return Err(Error::InvalidRevision(s.to_string()));
        }
        Ok(Self::with_generation(node_id, generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_revision_is_generation_one() {
        let rev = Revision::initial("node-1");
        assert_eq!(rev.generation, 1);
        assert_eq!(rev.node_id, "node-1");
    }

    #[test]
    fn next_bumps_generation_and_takes_writer() {
        let rev = Revision::initial("node-1");
        let next = rev.next("node-2");
        assert_eq!(next.generation, 2);
        assert_eq!(next.node_id, "node-2");
        assert!(rev.is_superseded_by(&next));
    }

    #[test]
    fn ordering_by_generation() {
        let a = Revision::with_generation("node-z", 1);
        let b = Revision::with_generation("node-a", 2);
        assert!(a < b);
    }

    #[test]
    fn ordering_by_node_id_when_generation_equal() {
        let a = Revision::with_generation("node-a", 5);
        let b = Revision::with_generation("node-b", 5);
        assert!(a < b);
    }

    #[test]
    fn display_and_parse() {
        let rev = Revision::with_generation("device-7", 12);
        assert_eq!(rev.to_string(), "12-device-7");
        let parsed: Revision = "12-device-7".parse().unwrap();
        assert_eq!(parsed, rev);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<Revision>().is_err());
        assert!("abc".parse::<Revision>().is_err());
        assert!("0-node".parse::<Revision>().is_err());
        assert!("3-".parse::<Revision>().is_err());
    }

    #[test]
    fn serialization_format() {
        let rev = Revision::with_generation("node-1", 10);
        let json = serde_json::to_string(&rev).unwrap();
        assert!(json.contains("nodeId"));
        assert!(json.contains("generation"));
    }
}
