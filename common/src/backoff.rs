// Exponential backoff with jitter for reaching the store at startup

use crate::errors::{JanitorError, StoreError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Delay before retry number `attempt` (0-based)
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff: base * 2^attempt, capped, plus up to `jitter_factor` extra
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    /// Jitter factor (0.0 to 1.0)
    jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub fn with_config(base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    fn calculate_base_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn add_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor == 0.0 {
            return delay;
        }

        let jitter_range_ms = (delay.as_millis() as f64 * self.jitter_factor) as u64;
        if jitter_range_ms == 0 {
            return delay;
        }

        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_range_ms);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        self.add_jitter(self.calculate_base_delay(attempt))
    }
}

/// Fixed delay retry strategy (for testing or simple cases)
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Run `operation` until it succeeds or `grace` has elapsed.
///
/// The operation is always attempted at least once. Once the grace period is
/// used up the last store error is returned as `StoreUnavailable`.
pub async fn retry_within<T, F, Fut>(
    grace: Duration,
    strategy: &dyn RetryStrategy,
    mut operation: F,
) -> Result<T, JanitorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempts = attempt + 1, "Store reachable");
                }
                return Ok(value);
            }
            Err(e) => {
                let delay = strategy.next_delay(attempt);
                attempt += 1;
                let elapsed = started.elapsed();

                if elapsed + delay > grace {
                    return Err(JanitorError::StoreUnavailable {
                        attempts: attempt,
                        waited_seconds: elapsed.as_secs(),
                        source: e,
                    });
                }

                warn!(
                    error = %e,
                    attempt = attempt,
                    retry_delay_ms = delay.as_millis() as u64,
                    "Store unreachable, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
