// Janitor binary entry point

use anyhow::Result;
use common::bootstrap::{connect_store, init_observability, processing_summary};
use common::config::Settings;
use common::errors::JanitorError;
use common::scheduler::{ScanScheduler, Scheduler};
use common::staleness::SystemClock;
use common::store::QueueStore;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration errors are fatal before anything else starts
    let settings = match Settings::load().map_err(JanitorError::from) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };

    init_observability(&settings)?;

    info!(
        store_url = %settings.store.url(),
        queues = ?settings.scan.queues,
        interval_seconds = settings.scan.interval_seconds,
        stale_time_seconds = settings.scan.stale_time_seconds,
        "Configuration loaded"
    );

    let store = connect_store(&settings).await.map_err(|e| {
        error!(error = %e, "Store unreachable at startup");
        e
    })?;
    let store = Arc::new(store) as Arc<dyn QueueStore>;

    info!(
        "Janitor initialized. Cleaning {} every {}s",
        processing_summary(&settings.scan),
        settings.scan.interval_seconds
    );

    let scheduler = Arc::new(ScanScheduler::new(
        settings.scan.clone(),
        store,
        Arc::new(SystemClock),
    ));

    // Handle SIGTERM/SIGINT: the in-flight move finishes before run() returns
    let scheduler_for_shutdown = scheduler.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, initiating graceful shutdown");
        scheduler_for_shutdown.stop().await;
    });

    scheduler.run().await;

    info!("Janitor stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "Failed to listen for SIGTERM");
            return wait_for_ctrl_c().await;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for Ctrl+C");
                terminate.recv().await;
            }
        }
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        // Without a signal source the janitor runs until killed
        std::future::pending::<()>().await;
    }
}
