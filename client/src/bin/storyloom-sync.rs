//! Headless sync runner.
//!
//! Opens the local store against the sync server, repairs missing stories,
//! then keeps live replication running and logs every status transition
//! until Ctrl-C.

use storyloom_client::{ClientConfig, ConfigError, HttpRemote, Storyloom, SyncHealth};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyloom_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = ClientConfig::from_env()?;
    let remote_url = config
        .remote_url
        .clone()
        .ok_or(ConfigError::MissingRemoteUrl)?;

    tracing::info!("Syncing with {}", remote_url);
    let remote = HttpRemote::new(remote_url, config.auth_token.clone())?;
    let core = Storyloom::open(config, remote).await?;

    match core.check_sync_health().await {
        Ok(SyncHealth::Bootstrapped { docs_processed }) => {
            tracing::info!(docs = docs_processed, "Bootstrapped empty local store")
        }
        Ok(SyncHealth::Missing(report)) => tracing::warn!(
            local = report.local_count,
            remote = report.remote_count,
            "Stories missing locally; run a force pull to recover"
        ),
        Ok(SyncHealth::Healthy(_)) => {}
        Err(e) => tracing::warn!(error = %e, "Sync health check failed"),
    }

    let mut statuses = core.subscribe_status();
    core.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            status = statuses.recv() => match status {
                Ok(status) => tracing::info!(
                    phase = ?status.phase,
                    online = status.is_online,
                    docs = status.progress.docs_processed,
                    pending = status.progress.pending_docs,
                    last_sync = ?status.last_sync,
                    "Sync status"
                ),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "Status log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("Shutting down");
    core.shutdown().await?;
    Ok(())
}
