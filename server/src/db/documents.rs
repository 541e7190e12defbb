//! Database operations for the documents table.
//!
//! One row per document holding its latest version. Every accepted write
//! draws a fresh `seq` from `documents_seq`; pulling is a range scan over it.

use storyloom_engine::{DocKind, Document, Metadata, Origin, Revision};
use sqlx::{PgExecutor, Row};

/// Key for the advisory lock serializing pushes, so `seq` order matches
/// commit order and a puller never skips a row committed late.
pub const PUSH_LOCK_KEY: i64 = 0x5354_4f52_594c_4f4f;

/// A stored document row from the database.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub kind: String,
    pub rev_generation: i64,
    pub rev_node: String,
    pub body: serde_json::Value,
    pub deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub seq: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            rev_generation: row.try_get("rev_generation")?,
            rev_node: row.try_get("rev_node")?,
            body: row.try_get("body")?,
            deleted: row.try_get("deleted")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            seq: row.try_get("seq")?,
        })
    }
}

impl StoredDocument {
    /// Convert a database row to an engine document.
    pub fn to_document(&self) -> Result<Document, String> {
        let kind = DocKind::parse(&self.kind)
            .ok_or_else(|| format!("Unknown document kind: {}", self.kind))?;
        let generation = u64::try_from(self.rev_generation)
            .map_err(|_| format!("Negative generation on {}", self.id))?;

        Ok(Document {
            id: self.id.clone(),
            kind,
            rev: Revision::with_generation(&self.rev_node, generation),
            body: self.body.clone(),
            metadata: Metadata {
                created_at: self.created_at.max(0) as u64,
                updated_at: self.updated_at.max(0) as u64,
                origin: Origin::Remote,
            },
            deleted: self.deleted,
        })
    }
}

const COLUMNS: &str =
    "id, kind, rev_generation, rev_node, body, deleted, created_at, updated_at, seq";

/// Take the push lock for the rest of the transaction.
pub async fn lock_pushes<'e>(executor: impl PgExecutor<'e>) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(PUSH_LOCK_KEY)
        .execute(executor)
        .await?;
    Ok(())
}

/// Get a document by id, tombstones included.
pub async fn get_document<'e>(
    executor: impl PgExecutor<'e>,
    id: &str,
) -> Result<Option<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(&format!(
        "SELECT {COLUMNS} FROM documents WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Insert or replace a document, returning its new sequence number.
pub async fn upsert_document<'e>(
    executor: impl PgExecutor<'e>,
    doc: &Document,
) -> Result<i64, sqlx::Error> {
    let (seq,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO documents (
            id, kind, rev_generation, rev_node, body, deleted, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE SET
            kind = EXCLUDED.kind,
            rev_generation = EXCLUDED.rev_generation,
            rev_node = EXCLUDED.rev_node,
            body = EXCLUDED.body,
            deleted = EXCLUDED.deleted,
            updated_at = EXCLUDED.updated_at,
            seq = nextval('documents_seq'),
            received_at = NOW()
        RETURNING seq
        "#,
    )
    .bind(&doc.id)
    .bind(doc.kind.as_str())
    .bind(doc.rev.generation as i64)
    .bind(&doc.rev.node_id)
    .bind(&doc.body)
    .bind(doc.deleted)
    .bind(doc.metadata.created_at as i64)
    .bind(doc.metadata.updated_at as i64)
    .fetch_one(executor)
    .await?;

    Ok(seq)
}

/// Highest `seq` among committed rows.
///
/// Pushes hold the push lock until commit, so every row at or below the
/// returned value is already visible.
pub async fn head_seq<'e>(executor: impl PgExecutor<'e>) -> Result<i64, sqlx::Error> {
    let (head,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(seq), 0) FROM documents")
        .fetch_one(executor)
        .await?;
    Ok(head)
}

/// Documents written in `(since, head]`, oldest first, restricted to `ids`
/// when given.
pub async fn get_changes_since<'e>(
    executor: impl PgExecutor<'e>,
    since: i64,
    head: i64,
    ids: Option<&[String]>,
    limit: i64,
) -> Result<Vec<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(&format!(
        "SELECT {COLUMNS} FROM documents \
         WHERE seq > $1 AND seq <= $2 AND ($3::text[] IS NULL OR id = ANY($3)) \
         ORDER BY seq ASC LIMIT $4"
    ))
    .bind(since)
    .bind(head)
    .bind(ids.map(<[String]>::to_vec))
    .bind(limit)
    .fetch_all(executor)
    .await
}

/// Number of active documents of one kind.
pub async fn count_active<'e>(
    executor: impl PgExecutor<'e>,
    kind: DocKind,
) -> Result<u64, sqlx::Error> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM documents WHERE kind = $1 AND NOT deleted")
            .bind(kind.as_str())
            .fetch_one(executor)
            .await?;

    Ok(count.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(kind: &str, generation: i64) -> StoredDocument {
        StoredDocument {
            id: "story_1".to_string(),
            kind: kind.to_string(),
            rev_generation: generation,
            rev_node: "device-a".to_string(),
            body: json!({ "title": "Draft" }),
            deleted: false,
            created_at: 1000,
            updated_at: 2000,
            seq: 7,
        }
    }

    #[test]
    fn row_converts_to_remote_document() {
        let doc = row("story", 3).to_document().unwrap();
        assert_eq!(doc.kind, DocKind::Story);
        assert_eq!(doc.rev, Revision::with_generation("device-a", 3));
        assert_eq!(doc.metadata.origin, Origin::Remote);
        assert_eq!(doc.metadata.updated_at, 2000);
        assert_eq!(doc.body["title"], "Draft");
    }

    #[test]
    fn corrupt_rows_are_reported() {
        assert!(row("chapter", 1).to_document().is_err());
        assert!(row("story", -1).to_document().is_err());
    }

    #[test]
    fn index_kind_uses_wire_name() {
        let doc = row("metadataIndex", 1).to_document().unwrap();
        assert_eq!(doc.kind, DocKind::MetadataIndex);
    }
}
