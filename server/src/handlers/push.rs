//! Push handler - processes pending document versions from replicas.

use crate::db;
use crate::error::{AppError, Result};
use sqlx::PgPool;
use storyloom_engine::feed::decide_push;
use storyloom_engine::{
    AcceptedDoc, Document, MergeStrategy, PushDecision, PushRequest, PushResponse, RejectedDoc,
};

/// Process a push request from a replica.
///
/// Each version is decided against the stored one with the same rules
/// replicas use, so a rejected replica converges on the stored winner.
pub async fn handle_push(pool: &PgPool, request: PushRequest) -> Result<PushResponse> {
    if request.documents.is_empty() {
        return Ok(PushResponse::default());
    }
    validate(&request.documents)?;

    let mut tx = pool.begin().await?;
    db::lock_pushes(&mut *tx).await?;

    let mut response = PushResponse::default();
    for doc in request.documents {
        let stored = match db::get_document(&mut *tx, &doc.id).await? {
            Some(row) => Some(row.to_document().map_err(AppError::Internal)?),
            None => None,
        };

        let (id, rev) = (doc.id.clone(), doc.rev.clone());
        match decide_push(stored.as_ref(), &doc, MergeStrategy::RevisionWins) {
            PushDecision::Accept => {
                let seq = db::upsert_document(&mut *tx, &doc).await?;
                tracing::debug!(doc_id = %id, rev = %rev, seq, "Stored pushed document");
                response.accepted.push(AcceptedDoc { id, rev });
            }
            // Already processed, treat as accepted
            PushDecision::AlreadyStored => response.accepted.push(AcceptedDoc { id, rev }),
            PushDecision::Reject { winner } => {
                tracing::debug!(doc_id = %id, rev = %rev, winner = %winner, "Rejected pushed document");
                response.rejected.push(RejectedDoc {
                    id,
                    rev,
                    reason: "conflict".to_string(),
                    winner,
                });
            }
        }
    }

    tx.commit().await?;
    tracing::info!(
        node_id = %request.node_id,
        accepted = response.accepted.len(),
        rejected = response.rejected.len(),
        "Push processed"
    );
    Ok(response)
}

fn validate(documents: &[Document]) -> Result<()> {
    for doc in documents {
        if doc.id.is_empty() {
            return Err(AppError::BadRequest("Document id must not be empty".to_string()));
        }
        if doc.rev.generation == 0 || doc.rev.node_id.is_empty() {
            return Err(AppError::BadRequest(format!("Invalid revision on {}", doc.id)));
        }
    }
    Ok(())
}
