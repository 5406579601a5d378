// Staleness classification of processing-queue entries
//
// A record that cannot be read, or whose progress timestamp cannot be
// understood, is stale: a possibly dead job stuck forever costs more than a
// spurious retry.

use crate::models::JobRecord;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// Human-readable timestamp format some workers write, always in UTC
const LEGACY_TIMESTAMP_FORMAT: &str = "%b %d, %Y %H:%M:%S%.f";

/// Numeric timestamps above this are epoch milliseconds, not seconds
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::milliseconds(by.as_millis() as i64);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Why an entry was judged abandoned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// No job record exists. Never-started and evicted records are not told apart.
    MissingRecord,
    /// The record exists but carries no progress timestamp
    MissingTimestamp,
    /// The progress timestamp could not be parsed
    MalformedTimestamp(String),
    /// The last progress update is older than the threshold
    Expired { age: Duration },
}

impl StaleReason {
    /// Short label used for log fields and metric labels
    pub fn label(&self) -> &'static str {
        match self {
            StaleReason::MissingRecord => "missing_record",
            StaleReason::MissingTimestamp => "missing_timestamp",
            StaleReason::MalformedTimestamp(_) => "malformed_timestamp",
            StaleReason::Expired { .. } => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Live,
    Stale(StaleReason),
}

/// Parse a worker-written progress timestamp.
///
/// Accepts RFC 3339, the legacy `Mon DD, YYYY HH:MM:SS.ffffff` form (UTC), and
/// numeric epoch seconds or milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT) {
        return Some(Utc.from_utc_datetime(&parsed));
    }

    let numeric: f64 = raw.parse().ok()?;
    if !numeric.is_finite() || numeric < 0.0 {
        return None;
    }
    let millis = if numeric > EPOCH_MILLIS_THRESHOLD {
        numeric
    } else {
        numeric * 1000.0
    };
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
}

/// Decide whether a processing-queue entry is still being worked on.
///
/// Live only when the record exists and its last update is no more than
/// `stale_time` before `now`. Timestamps in the future count as live.
pub fn classify(record: Option<&JobRecord>, now: DateTime<Utc>, stale_time: Duration) -> Classification {
    let Some(record) = record else {
        return Classification::Stale(StaleReason::MissingRecord);
    };

    let Some(raw) = record.updated_at.as_deref() else {
        return Classification::Stale(StaleReason::MissingTimestamp);
    };

    let Some(updated_at) = parse_timestamp(raw) else {
        return Classification::Stale(StaleReason::MalformedTimestamp(raw.to_string()));
    };

    // Negative age means the worker's clock is ahead of ours
    let age = match (now - updated_at).to_std() {
        Ok(age) => age,
        Err(_) => return Classification::Live,
    };

    if age > stale_time {
        Classification::Stale(StaleReason::Expired { age })
    } else {
        Classification::Live
    }
}
