//! Sync endpoint routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use storyloom_engine::{ChangeBatch, CountResponse, Document, PushRequest, PushResponse};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_changes, handle_count, handle_get_document, handle_push, ChangesQuery, CountQuery,
};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/changes", get(changes_handler))
        .route("/sync/push", post(push_handler))
        .route("/sync/docs/{id}", get(document_handler))
        .route("/sync/count", get(count_handler))
}

/// GET /sync/changes - Pull the change feed.
async fn changes_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<ChangeBatch>> {
    let batch = handle_changes(&state.pool, query).await?;
    Ok(Json(batch))
}

/// POST /sync/push - Push pending document versions.
async fn push_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    tracing::debug!(anonymous = auth.anonymous, docs = request.documents.len(), "Push received");
    let response = handle_push(&state.pool, request).await?;
    Ok(Json(response))
}

/// GET /sync/docs/{id} - Fetch one document.
async fn document_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Document>> {
    let doc = handle_get_document(&state.pool, &id).await?;
    Ok(Json(doc))
}

/// GET /sync/count - Count active documents of a kind.
async fn count_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<CountQuery>,
) -> Result<Json<CountResponse>> {
    let response = handle_count(&state.pool, query).await?;
    Ok(Json(response))
}
