//! # Storyloom Engine
//!
//! The deterministic document core of Storyloom's local-first story store.
//!
//! This crate holds everything about stories and their replication that can
//! be decided without IO: documents and revisions, conflict resolution, the
//! replica's in-memory store, the replication filter, the story model and
//! its metadata projection. The same inputs always produce the same outputs.
//!
//! ## Design Principles
//!
//! - **No IO**: timestamps are passed in, nothing touches disk or network
//! - **Deterministic**: conflict resolution is symmetric across replicas
//! - **Testable**: pure logic, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Documents
//!
//! Data is stored as whole documents, one per story (chapters and scenes
//! inline), one per story codex, one per story research set, and a singleton
//! metadata index. Each [`Document`] has a stable human-readable id, a
//! [`DocKind`], a [`Revision`], a JSON body and a tombstone flag.
//!
//! ### Revisions and reconciliation
//!
//! A [`Revision`] is `<generation>-<node>`. Local writes must name the
//! revision they are based on; replicated versions are merged by
//! [`reconcile::resolve`] using a [`MergeStrategy`].
//!
//! ### Replication filter
//!
//! [`ReplicationFilter`] decides which ids take part in the live sync
//! stream: selectively the active story, its codex and the metadata index,
//! or everything during a bootstrap pull.
//!
//! ## Quick Start
//!
//! ```rust
//! use storyloom_engine::{DocKind, Store, Story};
//!
//! let mut store = Store::new("device_1");
//! let story = Story::new("story_1", "The Lighthouse", 1706745600000);
//! let body = serde_json::to_value(&story).unwrap();
//!
//! let written = store.put("story_1", DocKind::Story, body, None, 1706745600000).unwrap();
//! assert_eq!(written.rev.generation, 1);
//!
//! let loaded: Story = store.get("story_1").unwrap().decode().unwrap();
//! assert_eq!(loaded.title, "The Lighthouse");
//! ```
//!
//! ## Persistence
//!
//! Use [`Store::export_state`] and [`Store::import_state`] with
//! [`StoreSnapshot`]. Snapshots serialize to JSON with deterministic ordering.

pub mod document;
pub mod error;
pub mod feed;
pub mod filter;
pub mod metadata;
pub mod model;
pub mod reconcile;
pub mod revision;
pub mod snapshot;
pub mod store;
pub mod text;

// Re-export main types at crate root
pub use document::{codex_id, research_id, story_id, DocKind, Document, Metadata, Origin, METADATA_INDEX_ID};
pub use error::{Error, Result};
pub use feed::{
    AcceptedDoc, ChangeBatch, ChangeFeed, CountResponse, PushDecision, PushRequest, PushResponse,
    RejectedDoc, Seq,
};
pub use filter::ReplicationFilter;
pub use metadata::{MetadataIndex, Page, PageRequest, StoryMetadata};
pub use model::{
    Chapter, Codex, CodexEntry, ResearchNote, ResearchSet, Scene, SceneChange, Story,
    StoryChanges, StorySettings,
};
pub use reconcile::{MergeStrategy, Resolution};
pub use revision::Revision;
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{RemoteApply, Store, WriteResult};
pub use text::MAX_CONTENT_CHARS;

/// Type aliases for clarity
pub type DocId = String;
pub type NodeId = String;
pub type Timestamp = u64;
