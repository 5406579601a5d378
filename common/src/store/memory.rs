// In-process queue store with the same semantics as the Redis store

use super::{KeyScheme, QueueStore, RequeuePosition};
use crate::errors::StoreError;
use crate::models::{JobRecord, QueuePair};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    /// Lists are stored left to right; the right end is the head
    lists: HashMap<String, VecDeque<String>>,
    records: HashMap<String, JobRecord>,
    fail_next: usize,
    failing_keys: HashSet<String>,
}

impl State {
    fn check_fault(&mut self) -> Result<(), StoreError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(StoreError::Connection("injected failure".to_string()));
        }
        Ok(())
    }

    fn check_key_fault(&mut self, key: &str) -> Result<(), StoreError> {
        self.check_fault()?;
        if self.failing_keys.contains(key) {
            return Err(StoreError::Connection(format!("injected failure on {}", key)));
        }
        Ok(())
    }
}

/// Store kept entirely in memory.
///
/// All operations run under one mutex, so `requeue` is atomic with respect to
/// every other call, including calls from concurrently running janitors that
/// share the same instance.
#[derive(Debug, Clone)]
pub struct MemoryQueueStore {
    keys: KeyScheme,
    state: Arc<Mutex<State>>,
}

impl MemoryQueueStore {
    pub fn new(keys: KeyScheme) -> Self {
        Self {
            keys,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Producer side: LPUSH onto a work queue
    pub async fn push_work(&self, queue: &str, job_id: &str) {
        let key = self.keys.work_key(queue);
        let mut state = self.state.lock().await;
        state
            .lists
            .entry(key)
            .or_default()
            .push_front(job_id.to_string());
    }

    /// Worker side: claim the head of the work queue into a processing queue
    pub async fn claim(&self, queue: &str, processing_key: &str) -> Option<String> {
        let work_key = self.keys.work_key(queue);
        let mut state = self.state.lock().await;
        let job_id = state.lists.get_mut(&work_key)?.pop_back()?;
        state
            .lists
            .entry(processing_key.to_string())
            .or_default()
            .push_front(job_id.clone());
        Some(job_id)
    }

    /// Worker side: remove a finished entry from its processing queue
    pub async fn complete(&self, processing_key: &str, job_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(list) = state.lists.get_mut(processing_key) else {
            return false;
        };
        match list.iter().position(|entry| entry == job_id) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Place an entry directly into a processing queue
    pub async fn insert_processing(&self, processing_key: &str, job_id: &str) {
        let mut state = self.state.lock().await;
        state
            .lists
            .entry(processing_key.to_string())
            .or_default()
            .push_front(job_id.to_string());
    }

    pub async fn set_record(&self, job_id: &str, record: JobRecord) {
        self.state
            .lock()
            .await
            .records
            .insert(job_id.to_string(), record);
    }

    pub async fn remove_record(&self, job_id: &str) {
        self.state.lock().await.records.remove(job_id);
    }

    /// Contents of a list, left to right
    pub async fn list(&self, key: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `count` store calls fail with a connection error
    pub async fn fail_next(&self, count: usize) {
        self.state.lock().await.fail_next = count;
    }

    /// Make every call touching `key` fail with a connection error until healed.
    ///
    /// A work queue name also fails discovery of its processing queues.
    pub async fn fail_key(&self, key: &str) {
        self.state.lock().await.failing_keys.insert(key.to_string());
    }

    pub async fn heal_key(&self, key: &str) {
        self.state.lock().await.failing_keys.remove(key);
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new(KeyScheme::default())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.state.lock().await.check_fault()
    }

    async fn processing_queues(&self, queue: &str) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock().await;
        state.check_key_fault(&self.keys.work_key(queue))?;

        let mut found: Vec<String> = state
            .lists
            .iter()
            .filter(|(key, list)| !list.is_empty() && self.keys.is_processing_key(queue, key))
            .map(|(key, _)| key.clone())
            .collect();
        found.sort();
        Ok(found)
    }

    async fn entries(&self, processing_key: &str) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock().await;
        state.check_key_fault(processing_key)?;
        Ok(state
            .lists
            .get(processing_key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn job_record(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut state = self.state.lock().await;
        state.check_key_fault(job_id)?;
        Ok(state.records.get(job_id).cloned())
    }

    async fn requeue(
        &self,
        pair: &QueuePair,
        job_id: &str,
        position: RequeuePosition,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.check_key_fault(&pair.processing_key)?;
        state.check_key_fault(&pair.work_key)?;

        // LREM count 1 removes the first match scanning from the left
        let removed = match state.lists.get_mut(&pair.processing_key) {
            Some(list) => match list.iter().position(|entry| entry == job_id) {
                Some(index) => list.remove(index).is_some(),
                None => false,
            },
            None => false,
        };

        if !removed {
            return Ok(false);
        }

        let work = state.lists.entry(pair.work_key.clone()).or_default();
        match position {
            RequeuePosition::Head => work.push_back(job_id.to_string()),
            RequeuePosition::Tail => work.push_front(job_id.to_string()),
        }

        Ok(true)
    }
}
