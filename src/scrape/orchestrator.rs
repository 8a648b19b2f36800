//! Job lifecycle orchestration: submission, rate-governed execution, and
//! cooperative cancellation.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::time::sleep;
use uuid::Uuid;

use super::delta;
use super::public::PublicGraphSource;
use super::session::SessionGraphSource;
use super::{build_relationships, mark_mutuals, FetchCoordinator, FetchError};
use crate::config::AppConfig;
use crate::db::queries;
use crate::models::job::{JobStatus, ScrapeJob, ScrapeType};
use crate::models::relationship::RelationKind;
use crate::models::target::normalize_handle;
use crate::services::credentials::CredentialService;
use crate::services::progress::{
    ProgressEvent, ProgressPublisher, ProgressResults, ProgressStatus,
};
use crate::services::queue::{JobQueue, QueuedScrape};
use crate::services::rate_limit::{Admission, RateGovernor};

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Job is {status}, expected a cancellable or deletable state")]
    InvalidState { status: JobStatus },

    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::services::queue::QueueError),

    #[error("Rate limiter error: {0}")]
    RateLimit(#[from] crate::services::rate_limit::RateLimitError),

    #[error("Fetch setup error: {0}")]
    Fetch(#[from] FetchError),
}

/// How a job execution ended from the worker's point of view.
enum Execution {
    Completed,
    /// The job row was finalized elsewhere (cancellation); nothing left
    /// to write.
    Abandoned,
}

/// Owns the job state machine and drives the fetch coordinator under rate
/// governor control. Constructed once at process start with its
/// collaborators injected; shared by reference between the API server,
/// the scheduler, and the workers.
pub struct Orchestrator {
    db: PgPool,
    governor: Arc<RateGovernor>,
    queue: Arc<JobQueue>,
    progress: Arc<ProgressPublisher>,
    credentials: Arc<CredentialService>,
    config: AppConfig,
}

impl Orchestrator {
    pub fn new(
        db: PgPool,
        governor: Arc<RateGovernor>,
        queue: Arc<JobQueue>,
        progress: Arc<ProgressPublisher>,
        credentials: Arc<CredentialService>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            governor,
            queue,
            progress,
            credentials,
            config,
        }
    }

    pub fn db(&self) -> &PgPool {
        &self.db
    }

    /// Create a pending job for the target (created on first reference)
    /// and enqueue it for a worker.
    pub async fn submit(
        &self,
        handle: &str,
        scrape_type: ScrapeType,
        prefer_authenticated: bool,
    ) -> Result<ScrapeJob, ScrapeError> {
        let handle = normalize_handle(handle);
        let target = queries::ensure_target(&self.db, &handle).await?;
        let mut job = queries::create_job(&self.db, target.id, scrape_type).await?;

        let work_handle = Uuid::new_v4();
        queries::set_job_work_handle(&self.db, job.id, work_handle).await?;
        job.work_handle = Some(work_handle);

        self.queue
            .enqueue(&QueuedScrape {
                job_id: job.id,
                work_handle,
                target_handle: handle.clone(),
                scrape_type,
                prefer_authenticated,
            })
            .await?;

        self.publish(
            work_handle,
            job.id,
            ProgressEvent::new(ProgressStatus::Pending, "Scrape queued", 0),
        )
        .await;

        metrics::counter!("scrape_jobs_submitted").increment(1);
        tracing::info!(job_id = job.id, handle = %handle, scrape_type = %scrape_type, "Scrape job submitted");

        Ok(job)
    }

    /// Cancel a pending or in-progress job.
    ///
    /// Marks the unit of work for cooperative termination and finalizes
    /// the row to `partial` (snapshotting progress counters from the
    /// feed) or `cancelled`. Jobs in any terminal state are rejected
    /// unchanged.
    pub async fn cancel(&self, job_id: i64, save_partial: bool) -> Result<ScrapeJob, ScrapeError> {
        let job = queries::get_job(&self.db, job_id)
            .await?
            .ok_or(ScrapeError::JobNotFound(job_id))?;

        if !job.status.is_cancellable() {
            return Err(ScrapeError::InvalidState { status: job.status });
        }

        if let Some(work_handle) = job.work_handle {
            // A flag that fails to stick must not keep the job out of a
            // terminal state; the executor's status guards cover the race.
            if let Err(e) = self.queue.request_cancel(work_handle).await {
                tracing::warn!(job_id, error = %e, "Failed to set cancellation flag");
            }
        }

        let (followers_scraped, following_scraped) = if save_partial {
            self.partial_counters(job.work_handle).await
        } else {
            (0, 0)
        };

        match queries::finalize_cancelled_job(
            &self.db,
            job_id,
            save_partial,
            followers_scraped,
            following_scraped,
        )
        .await?
        {
            Some(finalized) => {
                tracing::info!(job_id, save_partial, "Scrape job cancelled");
                Ok(finalized)
            }
            None => {
                // Lost the race against the executor reaching a terminal
                // state first.
                let current = queries::get_job(&self.db, job_id)
                    .await?
                    .ok_or(ScrapeError::JobNotFound(job_id))?;
                Err(ScrapeError::InvalidState {
                    status: current.status,
                })
            }
        }
    }

    /// Delete a job and its snapshot; only terminal jobs are deletable.
    pub async fn delete(&self, job_id: i64) -> Result<(), ScrapeError> {
        let job = queries::get_job(&self.db, job_id)
            .await?
            .ok_or(ScrapeError::JobNotFound(job_id))?;

        if !job.status.is_terminal() {
            return Err(ScrapeError::InvalidState { status: job.status });
        }

        queries::delete_terminal_job(&self.db, job_id).await?;
        Ok(())
    }

    /// Execute a dequeued job end to end.
    ///
    /// Any failure is recorded on the job, published to the feed, and
    /// re-raised to the worker harness; the worker process itself never
    /// dies over a failed job.
    pub async fn execute(&self, queued: &QueuedScrape) -> Result<(), ScrapeError> {
        let result = self.execute_inner(queued).await;

        match result {
            Ok(Execution::Completed) => {
                metrics::counter!("scrape_jobs_completed").increment(1);
                Ok(())
            }
            Ok(Execution::Abandoned) => {
                tracing::info!(job_id = queued.job_id, "Job abandoned after cancellation");
                if let Err(e) = self.queue.clear_cancel(queued.work_handle).await {
                    tracing::debug!(error = %e, "Failed to clear cancellation flag");
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id = queued.job_id, error = %e, "Scrape job failed");
                metrics::counter!("scrape_jobs_failed").increment(1);

                if let Err(persist_err) =
                    queries::mark_job_failed(&self.db, queued.job_id, &e.to_string()).await
                {
                    tracing::error!(job_id = queued.job_id, error = %persist_err, "Failed to record job failure");
                }

                self.publish(
                    queued.work_handle,
                    queued.job_id,
                    ProgressEvent::new(
                        ProgressStatus::Failed,
                        format!("Scrape failed: {e}"),
                        0,
                    ),
                )
                .await;

                Err(e)
            }
        }
    }

    async fn execute_inner(&self, queued: &QueuedScrape) -> Result<Execution, ScrapeError> {
        let identifier = format!("user:{}", queued.target_handle);

        // Gate on the rate governor; the wait is re-checked rather than
        // trusted as a single fixed sleep.
        loop {
            if self.cancel_requested(queued.work_handle).await {
                return Ok(Execution::Abandoned);
            }
            match self.governor.admit(&identifier).await? {
                Admission::Allowed => break,
                Admission::Denied { wait_seconds } => {
                    let wait = wait_seconds.ceil() as u64;
                    tracing::info!(job_id = queued.job_id, wait_seconds = wait, "Rate limited, delaying job");
                    let mut event = ProgressEvent::new(
                        ProgressStatus::Delayed,
                        format!("Rate limited. Waiting {wait} seconds..."),
                        0,
                    );
                    event.retry_after = Some(wait);
                    self.publish(queued.work_handle, queued.job_id, event).await;
                    sleep(Duration::from_secs_f64(wait_seconds)).await;
                }
            }
        }

        // Atomically move pending → in_progress; a job cancelled while
        // queued is simply not started.
        let Some(job) = queries::mark_job_started(&self.db, queued.job_id).await? else {
            return Ok(Execution::Abandoned);
        };

        self.publish(
            queued.work_handle,
            job.id,
            ProgressEvent::new(ProgressStatus::InProgress, "Starting scrape...", 0),
        )
        .await;

        self.governor.record(&identifier).await?;

        let mut coordinator = self.build_coordinator(queued).await?;

        let fetch_message = match job.scrape_type {
            ScrapeType::Both => "Fetching followers and following...",
            ScrapeType::Followers => "Fetching followers...",
            ScrapeType::Following => "Fetching following...",
        };
        self.publish(
            queued.work_handle,
            job.id,
            ProgressEvent::new(ProgressStatus::InProgress, fetch_message, 25),
        )
        .await;

        let mut followers = Vec::new();
        let mut following = Vec::new();

        if matches!(job.scrape_type, ScrapeType::Followers | ScrapeType::Both) {
            let outcome = coordinator
                .fetch(&queued.target_handle, RelationKind::Follower, queued.prefer_authenticated)
                .await;
            if outcome.throttled {
                let penalty = self.governor.record_violation(&identifier).await?;
                tracing::warn!(job_id = job.id, penalty_seconds = penalty, "Upstream throttled, backoff recorded");
            }
            followers = outcome.items;
        }

        if self.cancel_requested(queued.work_handle).await {
            return Ok(Execution::Abandoned);
        }

        if matches!(job.scrape_type, ScrapeType::Following | ScrapeType::Both) {
            if job.scrape_type == ScrapeType::Both {
                // Space the two sequential collections apart.
                sleep(self.governor.delay_with_jitter()).await;
            }
            let outcome = coordinator
                .fetch(&queued.target_handle, RelationKind::Following, queued.prefer_authenticated)
                .await;
            if outcome.throttled {
                let penalty = self.governor.record_violation(&identifier).await?;
                tracing::warn!(job_id = job.id, penalty_seconds = penalty, "Upstream throttled, backoff recorded");
            }
            following = outcome.items;
        }

        if self.cancel_requested(queued.work_handle).await {
            return Ok(Execution::Abandoned);
        }

        let mut event = ProgressEvent::new(ProgressStatus::InProgress, "Processing data...", 50);
        event.followers_scraped = Some(followers.len() as i64);
        event.following_scraped = Some(following.len() as i64);
        self.publish(queued.work_handle, job.id, event).await;

        let mut records = build_relationships(job.target_id, job.id, RelationKind::Follower, &followers);
        records.extend(build_relationships(
            job.target_id,
            job.id,
            RelationKind::Following,
            &following,
        ));
        mark_mutuals(&mut records);

        self.publish(
            queued.work_handle,
            job.id,
            ProgressEvent::new(ProgressStatus::InProgress, "Saving to database...", 75),
        )
        .await;

        queries::insert_relationships(&self.db, &records).await?;

        let delta = delta::compute_job_delta(&self.db, job.target_id, job.id).await?;
        tracing::info!(
            job_id = job.id,
            new_followers = delta.new_ids.len(),
            lost_followers = delta.lost_ids.len(),
            "Follower delta computed"
        );

        queries::update_target_after_scrape(
            &self.db,
            job.target_id,
            followers.len() as i64,
            following.len() as i64,
        )
        .await?;

        queries::mark_job_completed(&self.db, job.id, followers.len() as i64, following.len() as i64)
            .await?;

        let mut event =
            ProgressEvent::new(ProgressStatus::Completed, "Scrape completed successfully", 100);
        event.results = Some(ProgressResults {
            followers_count: followers.len() as i64,
            following_count: following.len() as i64,
        });
        self.publish(queued.work_handle, job.id, event).await;

        tracing::info!(
            job_id = job.id,
            followers = followers.len(),
            following = following.len(),
            "Scrape job completed"
        );

        Ok(Execution::Completed)
    }

    /// Build a fetch coordinator with the target's stored credential, or
    /// the configured fallback session identity, or none at all.
    async fn build_coordinator(
        &self,
        queued: &QueuedScrape,
    ) -> Result<FetchCoordinator<PublicGraphSource, SessionGraphSource>, ScrapeError> {
        let credential = match self.credentials.get(&self.db, &queued.target_handle).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(job_id = queued.job_id, error = %e, "Credential lookup failed");
                None
            }
        };

        let credential = credential.or_else(|| {
            self.config
                .session_handle
                .clone()
                .zip(self.config.session_secret.clone())
        });

        Ok(FetchCoordinator::new(
            PublicGraphSource::new()?,
            SessionGraphSource::new(credential)?,
        ))
    }

    async fn cancel_requested(&self, work_handle: Uuid) -> bool {
        match self.queue.is_cancel_requested(work_handle).await {
            Ok(requested) => requested,
            Err(e) => {
                tracing::debug!(error = %e, "Cancellation flag unreadable, assuming not cancelled");
                false
            }
        }
    }

    /// Read back the latest progress counters for a partial save. An
    /// unreadable feed falls back to zero counters rather than blocking
    /// the job's path to a terminal state.
    async fn partial_counters(&self, work_handle: Option<Uuid>) -> (i64, i64) {
        let Some(work_handle) = work_handle else {
            return (0, 0);
        };
        match self.progress.latest(work_handle).await {
            Ok(Some(event)) => (
                event.followers_scraped.unwrap_or(0),
                event.following_scraped.unwrap_or(0),
            ),
            Ok(None) => (0, 0),
            Err(e) => {
                tracing::warn!(error = %e, "Progress snapshot unreadable, saving zero partial counts");
                (0, 0)
            }
        }
    }

    /// Progress writes are fire-and-forget; a dead feed never fails a job.
    async fn publish(&self, work_handle: Uuid, job_id: i64, event: ProgressEvent) {
        let event = event.with_scrape_id(job_id);
        if let Err(e) = self.progress.publish(work_handle, &event).await {
            tracing::warn!(job_id, error = %e, "Failed to publish progress event");
        }
    }
}
