// Telemetry module for structured logging and metrics

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting
///
/// `RUST_LOG` takes precedence over `log_level` when it is set.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, "Structured logging initialized");

    Ok(())
}

/// Initialize Prometheus metrics exporter
///
/// Registers:
/// - janitor_requeued_total: entries moved back to their work queue
/// - janitor_race_lost_total: stale entries already gone when the move ran
/// - janitor_sweep_failures_total: sweeps aborted by a store error
/// - janitor_live_entries: live entries seen in the last sweep
/// - janitor_sweep_duration_seconds: wall time of one queue sweep
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "janitor_requeued_total",
        "Total number of stale entries returned to their work queue"
    );
    describe_counter!(
        "janitor_race_lost_total",
        "Total number of stale entries that were gone before they could be moved"
    );
    describe_counter!(
        "janitor_sweep_failures_total",
        "Total number of queue sweeps aborted by a store error"
    );
    describe_gauge!(
        "janitor_live_entries",
        "Live processing-queue entries seen in the most recent sweep"
    );
    describe_histogram!(
        "janitor_sweep_duration_seconds",
        "Duration of one queue sweep in seconds"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_requeued(queue: &str, reason: &'static str) {
    counter!(
        "janitor_requeued_total",
        "queue" => queue.to_string(),
        "reason" => reason
    )
    .increment(1);
}

#[inline]
pub fn record_race_lost(queue: &str) {
    counter!("janitor_race_lost_total", "queue" => queue.to_string()).increment(1);
}

#[inline]
pub fn record_sweep_failure(queue: &str) {
    counter!("janitor_sweep_failures_total", "queue" => queue.to_string()).increment(1);
}

#[inline]
pub fn update_live_entries(queue: &str, live: usize) {
    gauge!("janitor_live_entries", "queue" => queue.to_string()).set(live as f64);
}

#[inline]
pub fn record_sweep_duration(queue: &str, duration_seconds: f64) {
    histogram!("janitor_sweep_duration_seconds", "queue" => queue.to_string())
        .record(duration_seconds);
}
