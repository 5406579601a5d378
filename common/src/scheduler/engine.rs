// Scan scheduler engine implementation

use crate::config::ScanConfig;
use crate::models::TickReport;
use crate::resolver::StalenessResolver;
use crate::staleness::Clock;
use crate::store::QueueStore;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Scheduler trait for periodic recovery passes
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Run ticks until `stop` is called
    async fn run(&self);

    /// Request a graceful stop; the current move always completes
    async fn stop(&self);

    /// Sweep every monitored queue once
    async fn run_once(&self) -> TickReport;
}

/// Owns the sweep loop. Holds no queue state of its own.
pub struct ScanScheduler {
    config: ScanConfig,
    resolver: StalenessResolver,
    instance_id: Uuid,
    shutdown_tx: watch::Sender<bool>,
}

impl ScanScheduler {
    pub fn new(config: ScanConfig, store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        let resolver = StalenessResolver::from_config(&config, store, clock);

        Self {
            config,
            resolver,
            instance_id: Uuid::new_v4(),
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_stopping(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

#[async_trait]
impl Scheduler for ScanScheduler {
    #[instrument(skip(self))]
    async fn run(&self) {
        info!(
            janitor_id = %self.instance_id,
            interval_seconds = self.config.interval_seconds,
            stale_time_seconds = self.config.stale_time_seconds,
            queues = ?self.config.queues,
            requeue_at = %self.config.requeue_at,
            "Starting scan scheduler"
        );

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    let requeued = report.requeued();

                    if !report.is_clean() {
                        warn!(
                            failed_queues = ?report.failed_queues,
                            requeued,
                            "Tick finished with failures, retrying next tick"
                        );
                    } else if requeued > 0 {
                        info!(requeued, "Tick finished");
                    } else {
                        debug!("Tick finished, nothing to requeue");
                    }
                    debug!(interval_seconds = self.config.interval_seconds, "Sleeping until next tick");
                }
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received, stopping scan scheduler");
                    break;
                }
            }
        }

        info!("Scan scheduler stopped");
    }

    #[instrument(skip(self))]
    async fn stop(&self) {
        info!("Stopping scan scheduler");
        self.shutdown_tx.send_replace(true);
    }

    #[instrument(skip(self))]
    async fn run_once(&self) -> TickReport {
        let shutdown_rx = self.shutdown_receiver();

        let sweeps = self.config.queues.iter().map(|queue| {
            let shutdown_rx = shutdown_rx.clone();
            async move {
                let result = self.resolver.sweep(queue, &shutdown_rx).await;
                (queue.clone(), result)
            }
        });

        let mut report = TickReport::default();
        for (queue, result) in join_all(sweeps).await {
            match result {
                Ok(sweep) => report.sweeps.push(sweep),
                Err(e) => {
                    error!(
                        queue = %queue,
                        error = %e,
                        transient = e.is_transient(),
                        "Failed to sweep queue"
                    );
                    report.failed_queues.push(queue);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobRecord;
    use crate::staleness::{ManualClock, SystemClock};
    use crate::store::{MemoryQueueStore, RequeuePosition};
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn scan_config(queues: &[&str]) -> ScanConfig {
        ScanConfig {
            interval_seconds: 1,
            queues: queues.iter().map(|q| q.to_string()).collect::<BTreeSet<_>>(),
            stale_time_seconds: 600,
            processing_prefix: "processing".to_string(),
            requeue_at: RequeuePosition::Head,
        }
    }

    #[tokio::test]
    async fn test_run_once_sweeps_every_queue() {
        let store = MemoryQueueStore::default();
        store.insert_processing("processing-predict:w1", "p1").await;
        store.insert_processing("processing-segment:w1", "s1").await;
        let scheduler = ScanScheduler::new(
            scan_config(&["predict", "segment"]),
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(Utc::now())),
        );

        let report = scheduler.run_once().await;

        assert!(report.is_clean());
        assert_eq!(report.sweeps.len(), 2);
        assert_eq!(report.requeued(), 2);
        assert_eq!(store.list("predict").await, vec!["p1".to_string()]);
        assert_eq!(store.list("segment").await, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_run_once_reports_failed_queue_without_panicking() {
        let store = MemoryQueueStore::default();
        store.fail_next(1).await;
        let scheduler = ScanScheduler::new(
            scan_config(&["predict"]),
            Arc::new(store.clone()),
            Arc::new(SystemClock),
        );

        let report = scheduler.run_once().await;
        assert_eq!(report.failed_queues, vec!["predict".to_string()]);

        // The next tick recovers
        let report = scheduler.run_once().await;
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_failed_queue_does_not_block_other_queues() {
        let store = MemoryQueueStore::default();
        store.insert_processing("processing-predict:w1", "p1").await;
        store.insert_processing("processing-segment:w1", "s1").await;
        store.insert_processing("processing-segment", "s2").await;
        store.fail_key("predict").await;
        let scheduler = ScanScheduler::new(
            scan_config(&["predict", "segment"]),
            Arc::new(store.clone()),
            Arc::new(SystemClock),
        );

        let report = scheduler.run_once().await;

        assert_eq!(report.failed_queues, vec!["predict".to_string()]);
        assert_eq!(report.sweeps.len(), 1);
        assert_eq!(report.sweeps[0].queue, "segment");
        assert_eq!(report.requeued(), 2);
        assert_eq!(
            store.list("processing-predict:w1").await,
            vec!["p1".to_string()]
        );
        let mut segment_work = store.list("segment").await;
        segment_work.sort();
        assert_eq!(segment_work, vec!["s1".to_string(), "s2".to_string()]);

        // Once the store recovers the next tick picks up the failed queue
        store.heal_key("predict").await;
        let report = scheduler.run_once().await;
        assert!(report.is_clean());
        assert_eq!(store.list("predict").await, vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn test_run_returns_after_stop() {
        let store = MemoryQueueStore::default();
        store.insert_processing("processing-predict:w1", "live").await;
        store
            .set_record("live", JobRecord::new("started", Utc::now().to_rfc3339()))
            .await;
        let scheduler = Arc::new(ScanScheduler::new(
            scan_config(&["predict"]),
            Arc::new(store.clone()),
            Arc::new(SystemClock),
        ));

        let runner = scheduler.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;
        assert!(scheduler.is_stopping());

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .expect("scheduler task panicked");
        assert_eq!(store.list("processing-predict:w1").await, vec!["live".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_before_run_exits_immediately() {
        let scheduler = ScanScheduler::new(
            scan_config(&["predict"]),
            Arc::new(MemoryQueueStore::default()),
            Arc::new(SystemClock),
        );
        scheduler.stop().await;

        tokio::time::timeout(Duration::from_secs(1), scheduler.run())
            .await
            .expect("run should return when already stopped");
    }
}
