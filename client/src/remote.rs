//! Remote store abstraction.
//!
//! The remote has the same shape as the local store: a change feed of
//! latest document versions that accepts pushes and answers point reads and
//! count queries.

use crate::error::RemoteError;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use storyloom_engine::{
    ChangeBatch, ChangeFeed, CountResponse, DocKind, Document, PushDecision, PushRequest,
    PushResponse, ReplicationFilter, Seq,
};

/// Result type for remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The remote replica.
#[async_trait]
pub trait Remote: Send + Sync + 'static {
    /// Latest version of one document, tombstones included. `None` if the
    /// remote never saw it.
    async fn fetch(&self, id: &str) -> RemoteResult<Option<Document>>;

    /// Changes admitted by `filter` after `since`, oldest first.
    ///
    /// Filtering happens on the remote; documents outside the filter are
    /// never transferred.
    async fn changes_since(
        &self,
        since: Seq,
        limit: usize,
        filter: &ReplicationFilter,
    ) -> RemoteResult<ChangeBatch>;

    /// Offer pending local versions.
    async fn push(&self, node_id: &str, documents: Vec<Document>) -> RemoteResult<PushResponse>;

    /// Number of active documents of one kind.
    async fn count(&self, kind: DocKind) -> RemoteResult<u64>;
}

/// In-memory remote for tests and offline demos.
#[derive(Default)]
pub struct MemoryRemote {
    feed: Mutex<ChangeFeed>,
    failure: Mutex<Option<RemoteError>>,
    latency: Mutex<Option<Duration>>,
    served: AtomicU64,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document as if another device had pushed it.
    pub fn insert(&self, doc: Document) -> PushDecision {
        self.feed.lock().accept(doc)
    }

    /// Make every call fail with `error` until cleared with `None`.
    pub fn fail_with(&self, error: Option<RemoteError>) {
        *self.failure.lock() = error;
    }

    /// Delay every call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Latest stored version of a document.
    pub fn get(&self, id: &str) -> Option<Document> {
        self.feed.lock().get(id).cloned()
    }

    /// Documents handed out by `changes_since` so far.
    pub fn documents_served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }

    /// Count of active documents of one kind.
    pub fn count_of_kind(&self, kind: DocKind) -> usize {
        self.feed.lock().count(kind)
    }

    async fn enter(&self) -> RemoteResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    async fn fetch(&self, id: &str) -> RemoteResult<Option<Document>> {
        self.enter().await?;
        Ok(self.get(id))
    }

    async fn changes_since(
        &self,
        since: Seq,
        limit: usize,
        filter: &ReplicationFilter,
    ) -> RemoteResult<ChangeBatch> {
        self.enter().await?;
        let batch = self.feed.lock().changes_since(since, limit, filter);
        self.served
            .fetch_add(batch.documents.len() as u64, Ordering::Relaxed);
        Ok(batch)
    }

    async fn push(&self, _node_id: &str, documents: Vec<Document>) -> RemoteResult<PushResponse> {
        self.enter().await?;
        Ok(self.feed.lock().push(documents))
    }

    async fn count(&self, kind: DocKind) -> RemoteResult<u64> {
        self.enter().await?;
        Ok(self.count_of_kind(kind) as u64)
    }
}

/// Remote reached over the sync server's HTTP API.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<reqwest::Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(classify_status(status, message))
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> RemoteResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::Http {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: "endpoint not found".to_string(),
            });
        }
        Self::decode(response).await
    }
}

fn classify_status(status: StatusCode, message: String) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Denied(message),
        s if s.is_server_error() => RemoteError::Unavailable(format!("HTTP {}: {}", s.as_u16(), message)),
        s => RemoteError::Http {
            status: s.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl Remote for HttpRemote {
    async fn fetch(&self, id: &str) -> RemoteResult<Option<Document>> {
        let response = self
            .send(self.client.get(self.url(&format!("/sync/docs/{id}"))))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(response).await.map(Some)
    }

    async fn changes_since(
        &self,
        since: Seq,
        limit: usize,
        filter: &ReplicationFilter,
    ) -> RemoteResult<ChangeBatch> {
        let mut request = self
            .client
            .get(self.url("/sync/changes"))
            .query(&[("since", since), ("limit", limit as u64)]);
        if let Some(ids) = filter.admitted_ids() {
            request = request.query(&[("ids", ids.join(","))]);
        }
        self.send_json(request).await
    }

    async fn push(&self, node_id: &str, documents: Vec<Document>) -> RemoteResult<PushResponse> {
        let body = PushRequest {
            node_id: node_id.to_string(),
            documents,
        };
        self.send_json(self.client.post(self.url("/sync/push")).json(&body))
            .await
    }

    async fn count(&self, kind: DocKind) -> RemoteResult<u64> {
        let request = self
            .client
            .get(self.url("/sync/count"))
            .query(&[("kind", kind.as_str())]);
        let response: CountResponse = self.send_json(request).await?;
        Ok(response.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, String::new()),
            RemoteError::Denied(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, String::new()),
            RemoteError::Denied(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            RemoteError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, String::new()),
            RemoteError::Http { status: 400, .. }
        ));
    }

    #[test]
    fn base_url_loses_trailing_slash() {
        let remote = HttpRemote::new("http://localhost:3000/", None).unwrap();
        assert_eq!(remote.url("/sync/changes"), "http://localhost:3000/sync/changes");
    }

    #[tokio::test]
    async fn memory_remote_injected_failure() {
        let remote = MemoryRemote::new();
        remote.insert(Document::new("story_1", DocKind::Story, json!({}), "other", 1000));

        remote.fail_with(Some(RemoteError::Unavailable("offline".into())));
        assert!(remote.fetch("story_1").await.is_err());

        remote.fail_with(None);
        assert!(remote.fetch("story_1").await.unwrap().is_some());
        assert!(remote.fetch("story_2").await.unwrap().is_none());
        assert_eq!(remote.count(DocKind::Story).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_remote_serves_only_admitted_documents() {
        let remote = MemoryRemote::new();
        for i in 0..20 {
            let id = format!("story_{i}");
            remote.insert(Document::new(&id, DocKind::Story, json!({}), "other", 1000));
        }

        let focus = ReplicationFilter::selective(Some("story_4"));
        let batch = remote.changes_since(0, 100, &focus).await.unwrap();
        assert_eq!(batch.documents.len(), 1);
        assert_eq!(remote.documents_served(), 1);

        remote
            .changes_since(0, 100, &ReplicationFilter::Bootstrap)
            .await
            .unwrap();
        assert_eq!(remote.documents_served(), 21);
    }
}
