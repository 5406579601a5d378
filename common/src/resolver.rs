// Staleness resolver: returns abandoned processing-queue entries to their work queue

use crate::config::ScanConfig;
use crate::errors::StoreError;
use crate::models::{QueuePair, SweepReport};
use crate::staleness::{classify, Classification, Clock, StaleReason};
use crate::store::{KeyScheme, QueueStore, RequeuePosition};
use crate::telemetry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Inspects the processing queues of one work queue and moves stale entries back.
///
/// Classification may work from a read that is already out of date; the move
/// itself is conditional on the entry still being in the processing queue, so
/// concurrent janitors and finishing workers collapse to at most one move.
pub struct StalenessResolver {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    keys: KeyScheme,
    stale_time: Duration,
    requeue_at: RequeuePosition,
}

impl StalenessResolver {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        keys: KeyScheme,
        stale_time: Duration,
        requeue_at: RequeuePosition,
    ) -> Self {
        Self {
            store,
            clock,
            keys,
            stale_time,
            requeue_at,
        }
    }

    pub fn from_config(config: &ScanConfig, store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            store,
            clock,
            KeyScheme::new(config.processing_prefix.clone()),
            config.stale_time(),
            config.requeue_at,
        )
    }

    /// Sweep every processing queue of `queue` once.
    ///
    /// Each processing queue is read as a snapshot; entries claimed after the
    /// snapshot wait for the next sweep. A store error aborts the sweep; moves
    /// already made stay made. A shutdown request is honored between moves.
    #[instrument(skip(self, shutdown))]
    pub async fn sweep(
        &self,
        queue: &str,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<SweepReport, StoreError> {
        let started = Instant::now();
        let mut report = SweepReport::new(queue);

        let result = self.sweep_queues(queue, shutdown, &mut report).await;
        telemetry::record_sweep_duration(queue, started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                telemetry::update_live_entries(queue, report.live);
                debug!(
                    processing_queues = report.processing_queues,
                    inspected = report.inspected,
                    live = report.live,
                    requeued = report.requeued,
                    race_lost = report.race_lost,
                    interrupted = report.interrupted,
                    "Sweep finished"
                );
                Ok(report)
            }
            Err(e) => {
                telemetry::record_sweep_failure(queue);
                warn!(
                    error = %e,
                    requeued_before_failure = report.requeued,
                    "Sweep aborted"
                );
                Err(e)
            }
        }
    }

    async fn sweep_queues(
        &self,
        queue: &str,
        shutdown: &watch::Receiver<bool>,
        report: &mut SweepReport,
    ) -> Result<(), StoreError> {
        let processing_keys = self.store.processing_queues(queue).await?;
        report.processing_queues = processing_keys.len();

        for processing_key in processing_keys {
            let pair = QueuePair {
                work_key: self.keys.work_key(queue),
                processing_key,
            };

            let snapshot = self.store.entries(&pair.processing_key).await?;
            debug!(
                processing_key = %pair.processing_key,
                entries = snapshot.len(),
                "Inspecting processing queue"
            );

            for job_id in snapshot {
                if *shutdown.borrow() {
                    report.interrupted = true;
                    return Ok(());
                }

                report.inspected += 1;
                self.resolve_entry(queue, &pair, &job_id, report).await?;
            }
        }

        Ok(())
    }

    async fn resolve_entry(
        &self,
        queue: &str,
        pair: &QueuePair,
        job_id: &str,
        report: &mut SweepReport,
    ) -> Result<(), StoreError> {
        let record = self.store.job_record(job_id).await?;
        let reason = match classify(record.as_ref(), self.clock.now(), self.stale_time) {
            Classification::Live => {
                report.live += 1;
                return Ok(());
            }
            Classification::Stale(reason) => reason,
        };

        match &reason {
            StaleReason::MissingRecord => {
                debug!(job_id = %job_id, "Job record not found")
            }
            StaleReason::MissingTimestamp | StaleReason::MalformedTimestamp(_) => {
                let record = serde_json::to_string(&record).unwrap_or_default();
                warn!(
                    job_id = %job_id,
                    record = %record,
                    "Job record has no usable update timestamp"
                );
            }
            StaleReason::Expired { age } => {
                debug!(job_id = %job_id, age_seconds = age.as_secs(), "Job record expired")
            }
        }

        if self.store.requeue(pair, job_id, self.requeue_at).await? {
            report.requeued += 1;
            telemetry::record_requeued(queue, reason.label());
            info!(
                job_id = %job_id,
                processing_key = %pair.processing_key,
                work_key = %pair.work_key,
                reason = reason.label(),
                position = %self.requeue_at,
                "Requeued stale entry"
            );
        } else {
            report.race_lost += 1;
            telemetry::record_race_lost(queue);
            debug!(
                job_id = %job_id,
                processing_key = %pair.processing_key,
                "Entry already left the processing queue"
            );
        }

        Ok(())
    }
}
