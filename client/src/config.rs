//! Configuration for the client core.
//!
//! Every knob has a default so the core can be built without touching the
//! environment. [`ClientConfig::from_env`] overlays `STORYLOOM_*` variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Live replication settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Pause between live replication rounds.
    pub interval: Duration,
    /// Pause after a failed round.
    pub retry: Duration,
    /// Pause after a failure retrying cannot fix (bad response, rejected request).
    pub failure_backoff: Duration,
    /// Documents requested per change-feed batch.
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            retry: Duration::from_millis(5000),
            failure_backoff: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Document-ready waiter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyConfig {
    /// Hard timeout after which the wait resolves regardless.
    pub timeout: Duration,
    /// Polling cadence.
    pub poll_interval: Duration,
}

impl Default for ReadyConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Save queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveConfig {
    /// Quiet period before a debounced save fires.
    pub debounce: Duration,
    /// Rate limit for derived work on content changes.
    pub content_throttle: Duration,
    /// Delay before a pending save is drained.
    pub retry_backoff: Duration,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(3000),
            content_throttle: Duration::from_millis(500),
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Replica id written into revisions
    pub node_id: String,
    /// Directory for the durable snapshot; in-memory only when unset
    pub data_dir: Option<PathBuf>,
    /// Base URL of the sync server
    pub remote_url: Option<String>,
    /// Bearer token for the sync server
    pub auth_token: Option<String>,
    pub sync: SyncConfig,
    pub ready: ReadyConfig,
    pub save: SaveConfig,
    /// Entries per metadata index page
    pub index_page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            node_id: uuid::Uuid::new_v4().to_string(),
            data_dir: None,
            remote_url: None,
            auth_token: None,
            sync: SyncConfig::default(),
            ready: ReadyConfig::default(),
            save: SaveConfig::default(),
            index_page_size: 20,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(name) {
                Some(raw) => parse_number::<u64>(name, &raw).map(Duration::from_millis),
                None => Ok(default),
            }
        };

        let sync = SyncConfig {
            interval: millis("STORYLOOM_SYNC_INTERVAL_MS", defaults.sync.interval)?,
            retry: millis("STORYLOOM_SYNC_RETRY_MS", defaults.sync.retry)?,
            failure_backoff: millis(
                "STORYLOOM_SYNC_FAILURE_BACKOFF_MS",
                defaults.sync.failure_backoff,
            )?,
            batch_size: match lookup("STORYLOOM_SYNC_BATCH_SIZE") {
                Some(raw) => positive("STORYLOOM_SYNC_BATCH_SIZE", &raw)?,
                None => defaults.sync.batch_size,
            },
        };
        let ready = ReadyConfig {
            timeout: millis("STORYLOOM_READY_TIMEOUT_MS", defaults.ready.timeout)?,
            poll_interval: millis("STORYLOOM_READY_POLL_MS", defaults.ready.poll_interval)?,
        };
        let save = SaveConfig {
            debounce: millis("STORYLOOM_SAVE_DEBOUNCE_MS", defaults.save.debounce)?,
            content_throttle: millis(
                "STORYLOOM_CONTENT_THROTTLE_MS",
                defaults.save.content_throttle,
            )?,
            retry_backoff: millis(
                "STORYLOOM_SAVE_RETRY_BACKOFF_MS",
                defaults.save.retry_backoff,
            )?,
        };
        let index_page_size = match lookup("STORYLOOM_INDEX_PAGE_SIZE") {
            Some(raw) => positive("STORYLOOM_INDEX_PAGE_SIZE", &raw)?,
            None => defaults.index_page_size,
        };

        Ok(Self {
            node_id: lookup("STORYLOOM_NODE_ID")
                .filter(|id| !id.is_empty())
                .unwrap_or(defaults.node_id),
            data_dir: lookup("STORYLOOM_DATA_DIR").map(PathBuf::from),
            remote_url: lookup("STORYLOOM_REMOTE_URL"),
            auth_token: lookup("STORYLOOM_AUTH_TOKEN"),
            sync,
            ready,
            save,
            index_page_size,
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}

fn positive(name: &'static str, raw: &str) -> Result<usize, ConfigError> {
    match parse_number::<usize>(name, raw)? {
        0 => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
        }),
        n => Ok(n),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("STORYLOOM_REMOTE_URL environment variable is required")]
    MissingRemoteUrl,
}
