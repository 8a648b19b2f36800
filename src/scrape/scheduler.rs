//! Daily refresh of bookmarked targets.
//!
//! A single background task that sleeps until the configured UTC hour,
//! then submits a full scrape for every bookmarked target. Per-target
//! failures are logged and skipped so one bad target never starves the
//! rest of the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::orchestrator::Orchestrator;
use crate::db::queries;
use crate::models::job::ScrapeType;

/// Time until the next daily fire at `hour_utc:00`. A call exactly at
/// the fire instant schedules the following day.
pub fn until_next_fire(now: DateTime<Utc>, hour_utc: u32) -> Duration {
    let today_fire = now
        .date_naive()
        .and_hms_opt(hour_utc, 0, 0)
        .unwrap_or_else(|| now.date_naive().and_hms_opt(0, 0, 0).expect("midnight exists"))
        .and_utc();

    let next = if today_fire > now {
        today_fire
    } else {
        today_fire + chrono::Duration::days(1)
    };

    (next - now).to_std().unwrap_or(Duration::ZERO)
}

pub async fn run(orchestrator: Arc<Orchestrator>, hour_utc: u32) {
    tracing::info!(hour_utc, "Scheduler started");

    loop {
        let wait = until_next_fire(Utc::now(), hour_utc);
        tracing::debug!(wait_seconds = wait.as_secs(), "Scheduler sleeping until next run");
        tokio::time::sleep(wait).await;

        run_once(&orchestrator).await;
    }
}

/// Submit a full refresh for every bookmarked target.
async fn run_once(orchestrator: &Orchestrator) {
    let targets = match queries::list_bookmarked_targets(orchestrator.db()).await {
        Ok(targets) => targets,
        Err(e) => {
            tracing::error!(error = %e, "Scheduler could not list bookmarked targets");
            return;
        }
    };

    tracing::info!(count = targets.len(), "Scheduled refresh starting");

    for target in targets {
        match orchestrator
            .submit(&target.handle, ScrapeType::Both, true)
            .await
        {
            Ok(job) => {
                tracing::info!(job_id = job.id, handle = %target.handle, "Scheduled scrape submitted");
            }
            Err(e) => {
                tracing::error!(handle = %target.handle, error = %e, "Scheduled scrape submission failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fire_later_today() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 30, 0).unwrap();
        assert_eq!(until_next_fire(now, 2), Duration::from_secs(90 * 60));
    }

    #[test]
    fn test_fire_tomorrow_when_hour_passed() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 3, 0, 0).unwrap();
        assert_eq!(until_next_fire(now, 2), Duration::from_secs(23 * 3600));
    }

    #[test]
    fn test_fire_at_exact_hour_schedules_next_day() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap();
        assert_eq!(until_next_fire(now, 2), Duration::from_secs(24 * 3600));
    }
}
