// Data models for queue entries, job records, and sweep outcomes

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hash field holding the job status
pub const STATUS_FIELD: &str = "status";

/// Hash field holding the last progress timestamp written by the worker
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Out-of-band job metadata maintained by workers; the janitor only reads it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub status: Option<String>,
    pub updated_at: Option<String>,
}

impl JobRecord {
    pub fn new(status: impl Into<String>, updated_at: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            updated_at: Some(updated_at.into()),
        }
    }

    /// Build a record from a raw hash. An empty hash means the record does not exist.
    pub fn from_fields(fields: HashMap<String, String>) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }

        Some(Self {
            status: fields.get(STATUS_FIELD).cloned(),
            updated_at: fields.get(UPDATED_AT_FIELD).cloned(),
        })
    }
}

/// Work queue and one of its processing queues
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueuePair {
    pub work_key: String,
    pub processing_key: String,
}

/// Outcome of sweeping every processing queue of one work queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub queue: String,
    pub processing_queues: usize,
    pub inspected: usize,
    pub live: usize,
    pub requeued: usize,
    /// Stale entries that were already gone when the move ran
    pub race_lost: usize,
    /// Set when a shutdown request cut the sweep short
    pub interrupted: bool,
}

impl SweepReport {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }
}

/// Outcome of one scheduler tick across all monitored queues
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub sweeps: Vec<SweepReport>,
    pub failed_queues: Vec<String>,
}

impl TickReport {
    pub fn requeued(&self) -> usize {
        self.sweeps.iter().map(|s| s.requeued).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_hash_is_missing_record() {
        assert_eq!(JobRecord::from_fields(HashMap::new()), None);
    }

    #[test]
    fn test_hash_without_known_fields_is_present_but_empty() {
        let fields = HashMap::from([("model_name".to_string(), "model".to_string())]);
        let record = JobRecord::from_fields(fields).unwrap();
        assert_eq!(record.status, None);
        assert_eq!(record.updated_at, None);
    }

    #[test]
    fn test_hash_fields_are_extracted() {
        let fields = HashMap::from([
            (STATUS_FIELD.to_string(), "started".to_string()),
            (
                UPDATED_AT_FIELD.to_string(),
                "2024-01-01T00:00:00+00:00".to_string(),
            ),
        ]);
        let record = JobRecord::from_fields(fields).unwrap();
        assert_eq!(record, JobRecord::new("started", "2024-01-01T00:00:00+00:00"));
    }

    #[test]
    fn test_tick_report_totals() {
        let mut a = SweepReport::new("predict");
        a.requeued = 2;
        let mut b = SweepReport::new("segment");
        b.requeued = 3;
        let report = TickReport {
            sweeps: vec![a, b],
            failed_queues: vec![],
        };
        assert_eq!(report.requeued(), 5);
        assert!(report.is_clean());
    }
}
