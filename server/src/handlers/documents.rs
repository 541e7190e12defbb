//! Single-document and count handlers.

use crate::db;
use crate::error::{AppError, Result};
use serde::Deserialize;
use sqlx::PgPool;
use storyloom_engine::{CountResponse, DocKind, Document};

/// Query parameters for a count.
#[derive(Debug, Deserialize)]
pub struct CountQuery {
    pub kind: String,
}

/// Latest version of one document, tombstones included.
pub async fn handle_get_document(pool: &PgPool, id: &str) -> Result<Document> {
    let stored = db::get_document(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {id}")))?;
    stored.to_document().map_err(AppError::Internal)
}

/// Number of active documents of one kind.
pub async fn handle_count(pool: &PgPool, query: CountQuery) -> Result<CountResponse> {
    let kind = DocKind::parse(&query.kind)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown document kind: {}", query.kind)))?;
    let count = db::count_active(pool, kind).await?;
    Ok(CountResponse { kind, count })
}
