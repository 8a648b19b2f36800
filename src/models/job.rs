use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a scrape job.
///
/// `pending → in_progress → {completed, failed, cancelled, partial}`.
/// The four right-hand states are terminal; only `pending` and
/// `in_progress` are cancellable.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Partial,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Partial
        )
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::InProgress)
    }
}

/// Which side(s) of the graph a job collects.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScrapeType {
    Followers,
    Following,
    #[default]
    Both,
}

/// One bounded collection attempt against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: i64,
    pub target_id: i64,
    pub scrape_type: ScrapeType,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    // Results
    pub followers_count: Option<i64>,
    pub following_count: Option<i64>,
    pub new_followers: Option<i64>,
    pub lost_followers: Option<i64>,

    // Progress counters captured on partial-save cancellation
    pub followers_scraped: Option<i64>,
    pub following_scraped: Option<i64>,
    pub is_partial: bool,

    pub error_message: Option<String>,
    pub retry_count: i32,

    /// Handle of the queued unit of work, used for cancellation lookup
    /// and as the progress-feed key.
    pub work_handle: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Partial.is_terminal());
    }

    #[test]
    fn test_cancellable_states() {
        assert!(JobStatus::Pending.is_cancellable());
        assert!(JobStatus::InProgress.is_cancellable());
        assert!(!JobStatus::Completed.is_cancellable());
        assert!(!JobStatus::Partial.is_cancellable());
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(JobStatus::InProgress.to_string(), "in_progress");
        assert_eq!(JobStatus::from_str("in_progress").unwrap(), JobStatus::InProgress);
        assert_eq!(ScrapeType::Both.to_string(), "both");
        assert_eq!(ScrapeType::from_str("followers").unwrap(), ScrapeType::Followers);
    }
}
