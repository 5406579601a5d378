// Queue store abstraction over the shared list/hash store
//
// Work queues are filled with LPUSH by producers and claimed from the right
// (RPOPLPUSH / LMOVE RIGHT LEFT) into a processing queue. The right end is
// therefore the head: the next entry a worker will claim.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryQueueStore;
pub use self::redis::RedisQueueStore;

use crate::errors::StoreError;
use crate::models::{JobRecord, QueuePair};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

/// Which end of the work queue a recovered entry is pushed onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequeuePosition {
    /// Claimed next, ahead of newer work
    #[default]
    Head,
    /// Claimed after everything already queued
    Tail,
}

impl FromStr for RequeuePosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "head" => Ok(RequeuePosition::Head),
            "tail" => Ok(RequeuePosition::Tail),
            other => Err(format!("expected 'head' or 'tail', got '{}'", other)),
        }
    }
}

impl fmt::Display for RequeuePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequeuePosition::Head => write!(f, "head"),
            RequeuePosition::Tail => write!(f, "tail"),
        }
    }
}

/// Key naming for work and processing queues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    processing_prefix: String,
}

impl KeyScheme {
    pub fn new(processing_prefix: impl Into<String>) -> Self {
        Self {
            processing_prefix: processing_prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.processing_prefix
    }

    pub fn work_key(&self, queue: &str) -> String {
        queue.to_string()
    }

    /// Shared processing queue used when workers do not claim per consumer
    pub fn processing_key(&self, queue: &str) -> String {
        format!("{}-{}", self.processing_prefix, queue)
    }

    /// Glob matching every per-consumer processing queue of `queue`
    pub fn processing_pattern(&self, queue: &str) -> String {
        format!("{}-{}:*", self.processing_prefix, escape_glob(queue))
    }

    /// Whether `key` is a processing queue belonging to `queue`
    pub fn is_processing_key(&self, queue: &str, key: &str) -> bool {
        let shared = self.processing_key(queue);
        match key.strip_prefix(shared.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with(':') && rest.len() > 1,
            None => false,
        }
    }
}

impl Default for KeyScheme {
    fn default() -> Self {
        Self::new("processing")
    }
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Capabilities the janitor needs from the store.
///
/// `requeue` is the only mutating call and must be atomic: the entry is pushed
/// onto the work queue only if it was removed from the processing queue by the
/// same indivisible operation.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Verify the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// Every processing queue currently holding entries for `queue`
    async fn processing_queues(&self, queue: &str) -> Result<Vec<String>, StoreError>;

    /// Snapshot of a processing queue's entries
    async fn entries(&self, processing_key: &str) -> Result<Vec<String>, StoreError>;

    /// Job record for `job_id`, `None` when it does not exist
    async fn job_record(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Move one occurrence of `job_id` from the processing queue to the work queue.
    ///
    /// Returns `false` without touching the work queue when the entry was
    /// already gone.
    async fn requeue(
        &self,
        pair: &QueuePair,
        job_id: &str,
        position: RequeuePosition,
    ) -> Result<bool, StoreError>;
}
