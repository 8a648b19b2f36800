use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use followtrack::app_state::AppState;
use followtrack::config::AppConfig;
use followtrack::db;
use followtrack::services::{
    encryption::EncryptionService,
    progress::ProgressPublisher,
    queue::JobQueue,
    rate_limit::{RateGovernor, RedisRateStore},
};

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting scrape worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let encryption =
        EncryptionService::new(&config.encryption_key).expect("Failed to initialize encryption");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");
    let progress =
        ProgressPublisher::new(&config.redis_url).expect("Failed to initialize progress feed");
    let rate_store =
        RedisRateStore::new(&config.redis_url).expect("Failed to initialize rate-limit store");
    let governor = RateGovernor::new(
        Arc::new(rate_store),
        config.rate_limit_per_minute,
        config.scrape_delay_seconds,
        config.jitter_seconds_min,
        config.jitter_seconds_max,
    );

    let state = AppState::new(db_pool, encryption, queue, progress, governor, config);

    tracing::info!("Worker ready, starting job processing loop");

    // Main processing loop
    loop {
        match process_next_job(&state).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                // No job available, sleep before next poll
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Process the next job from the queue.
/// Returns Ok(true) if a job was processed, Ok(false) if no job available.
///
/// A failed job is recorded as failed by the orchestrator and never
/// re-queued here; retrying is an explicit new submission.
async fn process_next_job(state: &AppState) -> Result<bool, Box<dyn std::error::Error>> {
    let job = match state.queue.dequeue().await? {
        Some(j) => j,
        None => return Ok(false),
    };

    tracing::info!(
        job_id = job.job_id,
        handle = %job.target_handle,
        scrape_type = %job.scrape_type,
        "Processing scrape job"
    );

    if let Err(e) = state.orchestrator.execute(&job).await {
        tracing::error!(job_id = job.job_id, error = %e, "Scrape job ended in failure");
    }

    // Drop the processing-list entry regardless of outcome; the job row
    // carries the result.
    state.queue.complete(&job).await?;

    if let Ok(depth) = state.queue.queue_depth().await {
        metrics::gauge!("scrape_queue_depth").set(depth as f64);
    }

    Ok(true)
}
