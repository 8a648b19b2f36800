use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ScrapeType;

const QUEUE_KEY: &str = "followtrack:jobs";
const PROCESSING_KEY: &str = "followtrack:processing";
const CANCEL_TTL_SECONDS: u64 = 86400;

/// Job payload serialized into Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedScrape {
    pub job_id: i64,
    /// Opaque work handle; also keys the progress feed and cancel flag.
    pub work_handle: Uuid,
    pub target_handle: String,
    pub scrape_type: ScrapeType,
    pub prefer_authenticated: bool,
}

/// Redis-backed async job queue with cooperative cancellation flags.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    fn cancel_key(work_handle: Uuid) -> String {
        format!("scrape_cancel:{work_handle}")
    }

    /// Enqueue a scrape job.
    pub async fn enqueue(&self, job: &QueuedScrape) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload).await?;
        Ok(())
    }

    /// Dequeue a job for processing (pop with move to processing list).
    pub async fn dequeue(&self) -> Result<Option<QueuedScrape>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = conn.rpoplpush(QUEUE_KEY, PROCESSING_KEY).await?;

        match result {
            Some(payload) => {
                let job: QueuedScrape = serde_json::from_str(&payload)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Mark a job as done (remove from processing list).
    pub async fn complete(&self, job: &QueuedScrape) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload).await?;
        Ok(())
    }

    /// Flag a queued or running job for cooperative termination. The
    /// executor observes the flag at its next checkpoint; a job blocked in
    /// a network call is interrupted only once that call returns.
    pub async fn request_cancel(&self, work_handle: Uuid) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(Self::cancel_key(work_handle), 1u8, CANCEL_TTL_SECONDS)
            .await?;
        Ok(())
    }

    /// Check whether cancellation was requested for a job.
    pub async fn is_cancel_requested(&self, work_handle: Uuid) -> Result<bool, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let flag: Option<u8> = conn.get(Self::cancel_key(work_handle)).await?;
        Ok(flag.is_some())
    }

    /// Drop the cancellation flag once the job reached a terminal state.
    pub async fn clear_cancel(&self, work_handle: Uuid) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(Self::cancel_key(work_handle)).await?;
        Ok(())
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await?;
        Ok(depth)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
