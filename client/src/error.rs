//! Error types for the client core.

use crate::config::ConfigError;

/// Failures talking to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Network blip or remote temporarily down. Retried by the live stream.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// Credentials rejected.
    #[error("remote denied access: {0}")]
    Denied(String),

    #[error("remote returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("could not decode remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether retrying later can succeed without user action.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Unavailable(_) => true,
            RemoteError::Http { status, .. } => *status >= 500,
            RemoteError::Denied(_) | RemoteError::Decode(_) => false,
        }
    }
}

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Engine error: {0}")]
    Engine(#[from] storyloom_engine::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Story not found: {0}")]
    StoryNotFound(String),

    #[error("Save failed: {0}")]
    SaveFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Whether a failed sync round can succeed by simply trying again.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Remote(e) => e.is_transient(),
            ClientError::Storage(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
