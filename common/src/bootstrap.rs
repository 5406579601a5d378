// Bootstrap utilities for binary initialization

use crate::backoff::{retry_within, ExponentialBackoff, RetryStrategy};
use crate::config::{ScanConfig, Settings};
use crate::errors::JanitorError;
use crate::store::{KeyScheme, QueueStore, RedisQueueStore};
use crate::telemetry;
use tracing::info;

/// Initialize logging and, when a port is configured, the metrics exporter
///
/// # Errors
/// Returns error if the log filter is invalid or the exporter cannot bind
pub fn init_observability(settings: &Settings) -> Result<(), JanitorError> {
    telemetry::init_logging(&settings.observability.log_level)
        .map_err(|e| JanitorError::Telemetry(e.to_string()))?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port).map_err(|e| JanitorError::Telemetry(e.to_string()))?;
    }

    Ok(())
}

/// Connect to the store, retrying with backoff for up to the startup grace period
///
/// # Errors
/// Returns `StoreUnavailable` once the grace period is used up
#[tracing::instrument(skip(settings), fields(store_url = %settings.store.url()))]
pub async fn connect_store(settings: &Settings) -> Result<RedisQueueStore, JanitorError> {
    connect_store_with(settings, &ExponentialBackoff::default()).await
}

pub async fn connect_store_with(
    settings: &Settings,
    strategy: &dyn RetryStrategy,
) -> Result<RedisQueueStore, JanitorError> {
    info!(
        grace_seconds = settings.store.startup_grace_seconds,
        "Connecting to store"
    );

    let keys = KeyScheme::new(settings.scan.processing_prefix.clone());
    let store = retry_within(settings.store.startup_grace(), strategy, || {
        let keys = keys.clone();
        async move {
            let store = RedisQueueStore::connect(&settings.store, keys).await?;
            store.ping().await?;
            Ok(store)
        }
    })
    .await?;

    info!("Store connection ready");
    Ok(store)
}

/// Every processing key the janitor sweeps, for the startup banner
pub fn processing_summary(scan: &ScanConfig) -> String {
    let keys = KeyScheme::new(scan.processing_prefix.clone());
    scan.queues
        .iter()
        .map(|queue| {
            format!(
                "`{}` and `{}`",
                keys.processing_key(queue),
                keys.processing_pattern(queue)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}
