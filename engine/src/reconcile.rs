//! Conflict resolution between a local document and an incoming version.
//!
//! This is the core of determinism: two replicas holding the same pair of
//! versions always keep the same winner, whichever side received which.
//!
//! # Algorithm
//!
//! 1. No local version: take the incoming one
//! 2. Same revision: nothing to do
//! 3. Otherwise order both versions by the merge strategy and keep the greater

use crate::{Document, Revision};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Merge strategy for conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Higher revision wins, ties broken by node id (default)
    #[default]
    RevisionWins,
    /// Later `updated_at` wins, ties broken by revision (clock skew applies)
    TimestampWins,
}

/// Outcome of resolving an incoming version against the local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing stored locally; store the incoming version
    Insert,
    /// Incoming version wins; replace the local one
    TakeIncoming { replaced: Revision },
    /// Local version wins; drop the incoming one
    KeepLocal { winner: Revision },
    /// Both sides hold the same revision
    Identical,
}

impl Resolution {
    /// Whether the incoming version should be written.
    pub fn accepts_incoming(&self) -> bool {
        matches!(self, Resolution::Insert | Resolution::TakeIncoming { .. })
    }
}

/// Order two versions of the same document under `strategy`.
pub fn compare(a: &Document, b: &Document, strategy: MergeStrategy) -> Ordering {
    match strategy {
        MergeStrategy::RevisionWins => a.rev.cmp(&b.rev),
        MergeStrategy::TimestampWins => a
            .metadata
            .updated_at
            .cmp(&b.metadata.updated_at)
            .then_with(|| a.rev.cmp(&b.rev)),
    }
}

/// Decide between the local version (if any) and an incoming one.
pub fn resolve(local: Option<&Document>, incoming: &Document, strategy: MergeStrategy) -> Resolution {
    let Some(local) = local else {
        return Resolution::Insert;
    };
    if local.rev == incoming.rev {
        return Resolution::Identical;
    }
    match compare(incoming, local, strategy) {
        Ordering::Greater => Resolution::TakeIncoming {
            replaced: local.rev.clone(),
        },
        _ => Resolution::KeepLocal {
            winner: local.rev.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocKind;
    use serde_json::json;

    fn doc(node: &str, generation: u64, updated_at: u64, title: &str) -> Document {
        let mut doc = Document::new(
            "story_1",
            DocKind::Story,
            json!({ "title": title }),
            node,
            1000,
        );
        doc.rev = Revision::with_generation(node, generation);
        doc.metadata.updated_at = updated_at;
        doc
    }

    #[test]
    fn insert_when_missing() {
        let incoming = doc("remote", 1, 1000, "A");
        assert_eq!(
            resolve(None, &incoming, MergeStrategy::RevisionWins),
            Resolution::Insert
        );
    }

    #[test]
    fn identical_revision_is_noop() {
        let local = doc("remote", 3, 1000, "A");
        let incoming = local.clone();
        let resolution = resolve(Some(&local), &incoming, MergeStrategy::RevisionWins);
        assert_eq!(resolution, Resolution::Identical);
        assert!(!resolution.accepts_incoming());
    }

    #[test]
    fn higher_generation_wins() {
        let local = doc("local", 2, 5000, "local");
        let incoming = doc("remote", 3, 1000, "remote");
        assert_eq!(
            resolve(Some(&local), &incoming, MergeStrategy::RevisionWins),
            Resolution::TakeIncoming {
                replaced: Revision::with_generation("local", 2)
            }
        );
    }

    #[test]
    fn tie_broken_by_node_id() {
        let local = doc("a-node", 2, 1000, "local");
        let incoming = doc("b-node", 2, 1000, "remote");
        assert!(resolve(Some(&local), &incoming, MergeStrategy::RevisionWins).accepts_incoming());
        assert!(!resolve(Some(&incoming), &local, MergeStrategy::RevisionWins).accepts_incoming());
    }

    #[test]
    fn timestamp_strategy_prefers_later_write() {
        let local = doc("local", 5, 9000, "local");
        let incoming = doc("remote", 2, 1000, "remote");
        assert_eq!(
            resolve(Some(&local), &incoming, MergeStrategy::TimestampWins),
            Resolution::KeepLocal {
                winner: Revision::with_generation("local", 5)
            }
        );

        let incoming = doc("remote", 2, 9500, "remote");
        assert!(resolve(Some(&local), &incoming, MergeStrategy::TimestampWins).accepts_incoming());
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_node_id() -> impl Strategy<Value = String> {
            prop_oneof![Just("local".to_string()), Just("remote".to_string())]
        }

        fn arb_strategy() -> impl Strategy<Value = MergeStrategy> {
            prop_oneof![
                Just(MergeStrategy::RevisionWins),
                Just(MergeStrategy::TimestampWins)
            ]
        }

        proptest! {
            #[test]
            fn prop_resolution_symmetric(
                node_a in arb_node_id(),
                node_b in arb_node_id(),
                gen_a in 1u64..20,
                gen_b in 1u64..20,
                ts_a in 1000u64..5000,
                ts_b in 1000u64..5000,
                strategy in arb_strategy(),
            ) {
                let a = doc(&node_a, gen_a, ts_a, "a");
                let b = doc(&node_b, gen_b, ts_b, "b");

                // Replica 1 holds a and receives b; replica 2 holds b and receives a.
                let keep_1 = if resolve(Some(&a), &b, strategy).accepts_incoming() { &b } else { &a };
                let keep_2 = if resolve(Some(&b), &a, strategy).accepts_incoming() { &a } else { &b };

                prop_assert_eq!(&keep_1.rev, &keep_2.rev);
            }

            #[test]
            fn prop_resolution_deterministic(
                gen_a in 1u64..20,
                gen_b in 1u64..20,
                strategy in arb_strategy(),
            ) {
                let a = doc("local", gen_a, 1000, "a");
                let b = doc("remote", gen_b, 2000, "b");
                prop_assert_eq!(
                    resolve(Some(&a), &b, strategy),
                    resolve(Some(&a), &b, strategy)
                );
            }
        }
    }
}
