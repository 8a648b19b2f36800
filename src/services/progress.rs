use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress documents expire after five minutes; a consumer that stops
/// polling sees staleness, not an error.
const PROGRESS_TTL_SECONDS: u64 = 300;

/// Feed status vocabulary exposed to progress consumers.
/// `completed` and `failed` end the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    Delayed,
    InProgress,
    Completed,
    Failed,
}

/// One JSON-shaped event on a job's progress feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    pub message: String,
    /// 0-100.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrape_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers_scraped: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following_scraped: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ProgressResults>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressResults {
    pub followers_count: i64,
    pub following_count: i64,
}

impl ProgressEvent {
    pub fn new(status: ProgressStatus, message: impl Into<String>, progress: u8) -> Self {
        Self {
            status,
            message: message.into(),
            progress,
            scrape_id: None,
            retry_after: None,
            followers_scraped: None,
            following_scraped: None,
            results: None,
        }
    }

    pub fn with_scrape_id(mut self, scrape_id: i64) -> Self {
        self.scrape_id = Some(scrape_id);
        self
    }
}

/// Write-through progress feed over Redis SETEX keys.
///
/// Writes are fire-and-forget from the orchestrator's point of view; a
/// publish failure is logged by the caller but never fails the job.
pub struct ProgressPublisher {
    client: redis::Client,
}

impl ProgressPublisher {
    pub fn new(redis_url: &str) -> Result<Self, ProgressError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    fn key(work_handle: Uuid) -> String {
        format!("scrape_progress:{work_handle}")
    }

    /// Publish the latest event for a job, replacing any prior one.
    pub async fn publish(&self, work_handle: Uuid, event: &ProgressEvent) -> Result<(), ProgressError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(event)?;
        conn.set_ex::<_, _, ()>(Self::key(work_handle), payload, PROGRESS_TTL_SECONDS)
            .await?;
        Ok(())
    }

    /// Read the latest event for a job, if one is still live.
    pub async fn latest(&self, work_handle: Uuid) -> Result<Option<ProgressEvent>, ProgressError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(Self::key(work_handle)).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_feed_contract() {
        let event = ProgressEvent::new(ProgressStatus::Delayed, "Rate limited. Waiting 42 seconds...", 0);
        let mut event = event.with_scrape_id(7);
        event.retry_after = Some(42);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "delayed");
        assert_eq!(json["progress"], 0);
        assert_eq!(json["scrape_id"], 7);
        assert_eq!(json["retry_after"], 42);
        assert!(json.get("results").is_none());
    }

    #[test]
    fn test_terminal_event_carries_results() {
        let mut event = ProgressEvent::new(ProgressStatus::Completed, "Scrape completed successfully", 100);
        event.results = Some(ProgressResults {
            followers_count: 1500,
            following_count: 300,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["results"]["followers_count"], 1500);
    }
}
