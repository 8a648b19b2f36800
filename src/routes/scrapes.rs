//! Scrape job submission, inspection, cancellation, and the progress feed.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, Pagination};
use crate::app_state::AppState;
use crate::db::queries;
use crate::models::job::{ScrapeJob, ScrapeType};
use crate::models::relationship::Relationship;
use crate::models::target::{is_valid_handle, normalize_handle};
use crate::services::progress::ProgressEvent;

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitScrapeRequest {
    #[garde(length(min = 1, max = 30))]
    pub handle: String,
    #[garde(skip)]
    #[serde(default)]
    pub scrape_type: ScrapeType,
    #[garde(skip)]
    #[serde(default)]
    pub prefer_authenticated: bool,
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    #[serde(default)]
    pub save_partial: bool,
}

/// POST /api/v1/scrapes — queue a collection job for a target.
pub async fn submit_scrape(
    State(state): State<AppState>,
    Json(request): Json<SubmitScrapeRequest>,
) -> Result<(StatusCode, Json<ScrapeJob>), ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let handle = normalize_handle(&request.handle);
    if !is_valid_handle(&handle) {
        return Err(ApiError::bad_request(format!("invalid handle '{handle}'")));
    }

    let job = state
        .orchestrator
        .submit(&handle, request.scrape_type, request.prefer_authenticated)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/v1/scrapes/{job_id}
pub async fn get_scrape(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<Json<ScrapeJob>, ApiError> {
    let job = queries::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {job_id} not found")))?;
    Ok(Json(job))
}

/// GET /api/v1/targets/{handle}/scrapes — job history, newest first.
pub async fn list_scrapes_for_target(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<ScrapeJob>>, ApiError> {
    let handle = normalize_handle(&handle);
    let target = queries::get_target_by_handle(&state.db, &handle)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("target '{handle}' not found")))?;

    let (limit, offset) = pagination.clamp();
    let jobs = queries::list_jobs_for_target(&state.db, target.id, limit, offset).await?;
    Ok(Json(jobs))
}

/// POST /api/v1/scrapes/{job_id}/cancel
///
/// `?save_partial=true` finalizes the job as `partial`, snapshotting the
/// counters already reported on the progress feed; otherwise the job ends
/// as `cancelled`. Terminal jobs are rejected with 409.
pub async fn cancel_scrape(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Query(query): Query<CancelQuery>,
) -> Result<Json<ScrapeJob>, ApiError> {
    let job = state.orchestrator.cancel(job_id, query.save_partial).await?;
    Ok(Json(job))
}

/// DELETE /api/v1/scrapes/{job_id} — terminal jobs only.
pub async fn delete_scrape(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.delete(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/scrapes/progress/{work_handle} — latest progress event.
///
/// Feed entries expire five minutes after the last write; once a feed has
/// gone quiet the response is synthesized from the job row instead.
pub async fn get_progress(
    State(state): State<AppState>,
    Path(work_handle): Path<Uuid>,
) -> Result<Json<ProgressEvent>, ApiError> {
    let live = state.progress.latest(work_handle).await.map_err(|e| {
        tracing::error!(error = %e, "Progress feed unreadable");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })?;

    if let Some(event) = live {
        return Ok(Json(event));
    }

    let job = queries::get_job_by_work_handle(&state.db, work_handle)
        .await?
        .ok_or_else(|| ApiError::not_found("no job known for this work handle"))?;
    Ok(Json(event_from_job(&job)))
}

/// Reconstruct a feed-shaped event from a persisted job row.
fn event_from_job(job: &ScrapeJob) -> ProgressEvent {
    use crate::models::job::JobStatus;
    use crate::services::progress::{ProgressResults, ProgressStatus};

    let mut event = match job.status {
        JobStatus::Pending => ProgressEvent::new(ProgressStatus::Pending, "Scrape queued", 0),
        JobStatus::InProgress => {
            ProgressEvent::new(ProgressStatus::InProgress, "Scrape in progress", 0)
        }
        JobStatus::Completed => {
            let mut event =
                ProgressEvent::new(ProgressStatus::Completed, "Scrape completed successfully", 100);
            event.results = Some(ProgressResults {
                followers_count: job.followers_count.unwrap_or(0),
                following_count: job.following_count.unwrap_or(0),
            });
            event
        }
        JobStatus::Failed => ProgressEvent::new(
            ProgressStatus::Failed,
            job.error_message.as_deref().unwrap_or("Scrape failed"),
            0,
        ),
        JobStatus::Cancelled => {
            ProgressEvent::new(ProgressStatus::Completed, "Scrape cancelled", 100)
        }
        JobStatus::Partial => {
            let mut event = ProgressEvent::new(
                ProgressStatus::Completed,
                "Scrape cancelled, partial results saved",
                100,
            );
            event.followers_scraped = job.followers_scraped;
            event.following_scraped = job.following_scraped;
            event
        }
    };
    event.scrape_id = Some(job.id);
    event
}

/// GET /api/v1/scrapes/{job_id}/relationships — the snapshot collected by
/// one job, followers and following interleaved by handle.
pub async fn list_relationships(
    State(state): State<AppState>,
    Path(job_id): Path<i64>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<Relationship>>, ApiError> {
    if queries::get_job(&state.db, job_id).await?.is_none() {
        return Err(ApiError::not_found(format!("job {job_id} not found")));
    }

    let (limit, offset) = pagination.clamp();
    let records = queries::list_relationships_for_job(&state.db, job_id, limit, offset).await?;
    Ok(Json(records))
}
