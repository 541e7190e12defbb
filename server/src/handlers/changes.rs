//! Changes handler - serves the change feed to replicas.

use crate::db::{self, StoredDocument};
use crate::error::{AppError, Result};
use serde::Deserialize;
use sqlx::PgPool;
use storyloom_engine::{feed::clamp_limit, ChangeBatch, Seq};

/// Query parameters for a changes pull.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesQuery {
    /// Sequence from the previous batch (0 or absent for the first pull)
    pub since: Option<Seq>,
    /// Maximum number of documents to return
    pub limit: Option<usize>,
    /// Comma-separated document ids; absent means every document
    pub ids: Option<String>,
}

/// Upper bound on ids in one filtered pull.
pub const MAX_FILTER_IDS: usize = 64;

/// Serve the documents changed after `since`.
pub async fn handle_changes(pool: &PgPool, query: ChangesQuery) -> Result<ChangeBatch> {
    let since = query.since.unwrap_or(0);
    let limit = clamp_limit(query.limit);
    let ids = parse_ids(query.ids.as_deref())?;

    let head = db::head_seq(pool).await?;
    // Fetch one more than requested to check if there are more
    let rows = db::get_changes_since(pool, since as i64, head, ids.as_deref(), limit as i64 + 1).await?;
    Ok(assemble_batch(rows, since, head.max(0) as Seq, limit))
}

fn parse_ids(raw: Option<&str>) -> Result<Option<Vec<String>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let ids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.len() > MAX_FILTER_IDS {
        return Err(AppError::BadRequest(format!(
            "At most {MAX_FILTER_IDS} ids per pull"
        )));
    }
    Ok(Some(ids))
}

/// Build a batch from up to `limit + 1` rows read at `head`.
///
/// An exhausted scan resumes from `head`, so rows the filter skipped are
/// not read again.
fn assemble_batch(rows: Vec<StoredDocument>, since: Seq, head: Seq, limit: usize) -> ChangeBatch {
    let has_more = rows.len() > limit;
    let rows: Vec<_> = rows.into_iter().take(limit).collect();
    let last_seq = match rows.last() {
        Some(row) if has_more => row.seq.max(0) as Seq,
        _ => since.max(head),
    };

    let mut documents = Vec::with_capacity(rows.len());
    for row in &rows {
        match row.to_document() {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                // Skipped rather than failing the batch; the checkpoint still moves past it.
                tracing::warn!(doc_id = %row.id, seq = row.seq, "Skipping unreadable document: {}", e);
            }
        }
    }

    ChangeBatch {
        documents,
        last_seq,
        has_more,
    }
}
