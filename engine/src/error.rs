//! Error types for the Storyloom engine.

use crate::{DocId, DocKind, Revision};
use thiserror::Error;

/// All possible errors from the Storyloom engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lookup errors
    #[error("document not found: {0}")]
    DocumentNotFound(DocId),

    // Write errors
    #[error("revision conflict on '{id}': expected {}, got {}", fmt_rev(.expected), fmt_rev(.actual))]
    RevisionConflict {
        id: DocId,
        expected: Option<Revision>,
        actual: Option<Revision>,
    },

    #[error("document '{id}' is a {actual}, not a {expected}")]
    KindMismatch {
        id: DocId,
        expected: DocKind,
        actual: DocKind,
    },

    // Decoding errors
    #[error("invalid body for '{id}': {reason}")]
    InvalidBody { id: DocId, reason: String },

    #[error("invalid revision: {0}")]
    InvalidRevision(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

fn fmt_rev(rev: &Option<Revision>) -> String {
    rev.as_ref()
        .map(Revision::to_string)
        .unwrap_or_else(|| "none".to_string())
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
