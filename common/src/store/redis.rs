// Redis-backed queue store
// RECC 2025: No unwrap(), use #[tracing::instrument], proper error handling

use super::{KeyScheme, QueueStore, RequeuePosition};
use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::models::{JobRecord, QueuePair};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult, Script};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Remove one occurrence of ARGV[1] from KEYS[1] and, only if something was
/// removed, push it onto KEYS[2]. ARGV[2] selects the end: "head" pushes on the
/// right (claimed next), "tail" on the left.
const REQUEUE_SCRIPT: &str = r#"
    local removed = redis.call("LREM", KEYS[1], 1, ARGV[1])
    if removed == 1 then
        if ARGV[2] == "head" then
            redis.call("RPUSH", KEYS[2], ARGV[1])
        else
            redis.call("LPUSH", KEYS[2], ARGV[1])
        end
        return 1
    end
    return 0
"#;

const SCAN_COUNT: usize = 1000;

/// Redis client wrapper with connection manager and per-call timeout
#[derive(Clone)]
pub struct RedisQueueStore {
    manager: ConnectionManager,
    keys: KeyScheme,
    timeout: Duration,
    requeue_script: Script,
}

impl RedisQueueStore {
    /// Connect to Redis. The connection manager reconnects on its own after
    /// a dropped connection; the handshake itself is bounded by the store timeout.
    #[instrument(skip(config, keys), fields(redis_url = %config.url()))]
    pub async fn connect(config: &StoreConfig, keys: KeyScheme) -> Result<Self, StoreError> {
        info!("Connecting to Redis");

        let client = Client::open(config.url().as_str()).map_err(|e| {
            StoreError::Connection(format!("Failed to create Redis client: {}", e))
        })?;

        let timeout = config.timeout();
        let manager = match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(Ok(manager)) => manager,
            Ok(Err(e)) => {
                return Err(StoreError::Connection(format!(
                    "Failed to create connection manager: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(StoreError::Timeout(format!(
                    "Connecting to {} exceeded {:?}",
                    config.url(),
                    timeout
                )))
            }
        };

        info!("Redis connection established");

        Ok(Self {
            manager,
            keys,
            timeout,
            requeue_script: Script::new(REQUEUE_SCRIPT),
        })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(format!(
                "{} exceeded {:?}",
                operation, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection();
        let response: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;

        if response != "PONG" {
            return Err(StoreError::Command(format!(
                "Unexpected PING response: {}",
                response
            )));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn processing_queues(&self, queue: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection();
        let pattern = self.keys.processing_pattern(queue);
        let mut found = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;

            found.extend(
                batch
                    .into_iter()
                    .filter(|key| self.keys.is_processing_key(queue, key)),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        let shared = self.keys.processing_key(queue);
        let shared_exists: bool = self.bounded("EXISTS", conn.exists(&shared)).await?;
        if shared_exists {
            found.push(shared);
        }

        // SCAN may return a key more than once
        found.sort();
        found.dedup();

        debug!(count = found.len(), "Discovered processing queues");
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn entries(&self, processing_key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection();
        self.bounded("LRANGE", conn.lrange(processing_key, 0, -1))
            .await
    }

    #[instrument(skip(self))]
    async fn job_record(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.connection();
        let fields: RedisResult<HashMap<String, String>> =
            match tokio::time::timeout(self.timeout, conn.hgetall(job_id)).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(StoreError::Timeout(format!(
                        "HGETALL exceeded {:?}",
                        self.timeout
                    )))
                }
            };

        match fields {
            Ok(fields) => Ok(JobRecord::from_fields(fields)),
            // A key of another type exists but carries no readable progress fields
            Err(e) if e.code() == Some("WRONGTYPE") => {
                debug!(job_id = %job_id, "Job key is not a hash");
                Ok(Some(JobRecord::default()))
            }
            Err(e) => Err(StoreError::from(e)),
        }
    }

    #[instrument(skip(self), fields(processing_key = %pair.processing_key, work_key = %pair.work_key))]
    async fn requeue(
        &self,
        pair: &QueuePair,
        job_id: &str,
        position: RequeuePosition,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection();
        let mut invocation = self.requeue_script.prepare_invoke();
        invocation
            .key(&pair.processing_key)
            .key(&pair.work_key)
            .arg(job_id)
            .arg(position.to_string());

        let moved: i32 = self
            .bounded("requeue script", invocation.invoke_async(&mut conn))
            .await
            .map_err(|e| match e {
                StoreError::Command(msg) => StoreError::Script(msg),
                other => other,
            })?;

        Ok(moved == 1)
    }
}
