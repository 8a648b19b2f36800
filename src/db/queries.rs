use std::collections::HashSet;
use std::str::FromStr;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{JobStatus, ScrapeJob, ScrapeType};
use crate::models::relationship::{RelationKind, Relationship};
use crate::models::target::Target;

const JOB_COLUMNS: &str = "id, target_id, scrape_type, status, started_at, completed_at, \
     followers_count, following_count, new_followers, lost_followers, \
     followers_scraped, following_scraped, is_partial, error_message, retry_count, \
     work_handle, created_at";

fn job_from_row(row: &PgRow) -> Result<ScrapeJob, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let type_str: String = row.try_get("scrape_type")?;

    Ok(ScrapeJob {
        id: row.try_get("id")?,
        target_id: row.try_get("target_id")?,
        scrape_type: ScrapeType::from_str(&type_str).unwrap_or(ScrapeType::Both),
        status: JobStatus::from_str(&status_str).unwrap_or(JobStatus::Pending),
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        followers_count: row.try_get("followers_count")?,
        following_count: row.try_get("following_count")?,
        new_followers: row.try_get("new_followers")?,
        lost_followers: row.try_get("lost_followers")?,
        followers_scraped: row.try_get("followers_scraped")?,
        following_scraped: row.try_get("following_scraped")?,
        is_partial: row.try_get("is_partial")?,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        work_handle: row.try_get("work_handle")?,
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// Insert a target if it does not exist yet and return it.
pub async fn ensure_target(pool: &PgPool, handle: &str) -> Result<Target, sqlx::Error> {
    sqlx::query_as::<_, Target>(
        r#"
        INSERT INTO targets (handle)
        VALUES ($1)
        ON CONFLICT (handle) DO UPDATE SET updated_at = targets.updated_at
        RETURNING *
        "#,
    )
    .bind(handle)
    .fetch_one(pool)
    .await
}

pub async fn get_target(pool: &PgPool, target_id: i64) -> Result<Option<Target>, sqlx::Error> {
    sqlx::query_as::<_, Target>("SELECT * FROM targets WHERE id = $1")
        .bind(target_id)
        .fetch_optional(pool)
        .await
}

pub async fn get_target_by_handle(
    pool: &PgPool,
    handle: &str,
) -> Result<Option<Target>, sqlx::Error> {
    sqlx::query_as::<_, Target>("SELECT * FROM targets WHERE handle = $1")
        .bind(handle)
        .fetch_optional(pool)
        .await
}

pub async fn list_targets(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Target>, sqlx::Error> {
    sqlx::query_as::<_, Target>(
        "SELECT * FROM targets ORDER BY handle ASC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Targets eligible for scheduled daily scrapes.
pub async fn list_bookmarked_targets(pool: &PgPool) -> Result<Vec<Target>, sqlx::Error> {
    sqlx::query_as::<_, Target>("SELECT * FROM targets WHERE is_bookmarked ORDER BY handle ASC")
        .fetch_all(pool)
        .await
}

pub async fn set_target_bookmark(
    pool: &PgPool,
    target_id: i64,
    bookmarked: bool,
) -> Result<Option<Target>, sqlx::Error> {
    sqlx::query_as::<_, Target>(
        r#"
        UPDATE targets
        SET is_bookmarked = $1, updated_at = NOW()
        WHERE id = $2
        RETURNING *
        "#,
    )
    .bind(bookmarked)
    .bind(target_id)
    .fetch_optional(pool)
    .await
}

pub async fn delete_target(pool: &PgPool, target_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM targets WHERE id = $1")
        .bind(target_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_target_secret(
    pool: &PgPool,
    handle: &str,
    encrypted_secret: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE targets SET encrypted_secret = $1, updated_at = NOW() WHERE handle = $2",
    )
    .bind(encrypted_secret)
    .bind(handle)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_target_secret(
    pool: &PgPool,
    handle: &str,
) -> Result<Option<String>, sqlx::Error> {
    let row = sqlx::query("SELECT encrypted_secret FROM targets WHERE handle = $1")
        .bind(handle)
        .fetch_optional(pool)
        .await?;
    Ok(row.and_then(|r| r.try_get("encrypted_secret").ok()).flatten())
}

/// Update aggregate counts and the last-scraped stamp after a completed job.
pub async fn update_target_after_scrape(
    pool: &PgPool,
    target_id: i64,
    follower_count: i64,
    following_count: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE targets
        SET follower_count = $1,
            following_count = $2,
            last_scraped = NOW(),
            updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(follower_count)
    .bind(following_count)
    .bind(target_id)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Insert a new pending scrape job.
pub async fn create_job(
    pool: &PgPool,
    target_id: i64,
    scrape_type: ScrapeType,
) -> Result<ScrapeJob, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO scrape_jobs (target_id, scrape_type, status)
        VALUES ($1, $2, 'pending')
        RETURNING {JOB_COLUMNS}
        "#,
    ))
    .bind(target_id)
    .bind(scrape_type.to_string())
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

pub async fn get_job(pool: &PgPool, job_id: i64) -> Result<Option<ScrapeJob>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM scrape_jobs WHERE id = $1"))
        .bind(job_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn get_job_by_work_handle(
    pool: &PgPool,
    work_handle: Uuid,
) -> Result<Option<ScrapeJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM scrape_jobs WHERE work_handle = $1"
    ))
    .bind(work_handle)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn list_jobs_for_target(
    pool: &PgPool,
    target_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<ScrapeJob>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS} FROM scrape_jobs
        WHERE target_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    ))
    .bind(target_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

pub async fn set_job_work_handle(
    pool: &PgPool,
    job_id: i64,
    work_handle: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE scrape_jobs SET work_handle = $1 WHERE id = $2")
        .bind(work_handle)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Move a pending job to in_progress and stamp the start time.
///
/// The status guard makes the transition atomic: a job already cancelled
/// between enqueue and dequeue is not resurrected. Returns the updated job
/// or None if the job was no longer pending.
pub async fn mark_job_started(
    pool: &PgPool,
    job_id: i64,
) -> Result<Option<ScrapeJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE scrape_jobs
        SET status = 'in_progress', started_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING {JOB_COLUMNS}
        "#,
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(job_from_row).transpose()
}

pub async fn mark_job_completed(
    pool: &PgPool,
    job_id: i64,
    followers_count: i64,
    following_count: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE scrape_jobs
        SET status = 'completed',
            followers_count = $1,
            following_count = $2,
            completed_at = NOW()
        WHERE id = $3 AND status = 'in_progress'
        "#,
    )
    .bind(followers_count)
    .bind(following_count)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a failure. No-op once the job is already terminal.
pub async fn mark_job_failed(
    pool: &PgPool,
    job_id: i64,
    error_message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE scrape_jobs
        SET status = 'failed',
            error_message = $1,
            completed_at = NOW()
        WHERE id = $2 AND status IN ('pending', 'in_progress')
        "#,
    )
    .bind(error_message)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Finalize a cancelled job to `cancelled` or `partial`.
///
/// The status guard rejects jobs already in a terminal state; the caller
/// surfaces that as an invalid-state error. Returns the finalized job.
pub async fn finalize_cancelled_job(
    pool: &PgPool,
    job_id: i64,
    save_partial: bool,
    followers_scraped: i64,
    following_scraped: i64,
) -> Result<Option<ScrapeJob>, sqlx::Error> {
    let status = if save_partial { JobStatus::Partial } else { JobStatus::Cancelled };
    let row = sqlx::query(&format!(
        r#"
        UPDATE scrape_jobs
        SET status = $1,
            is_partial = $2,
            followers_scraped = $3,
            following_scraped = $4,
            completed_at = NOW()
        WHERE id = $5 AND status IN ('pending', 'in_progress')
        RETURNING {JOB_COLUMNS}
        "#,
    ))
    .bind(status.to_string())
    .bind(save_partial)
    .bind(followers_scraped)
    .bind(following_scraped)
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(job_from_row).transpose()
}

/// Delete a terminal job and its relationship snapshot. Returns false if
/// the job did not exist or was still pending/in_progress.
pub async fn delete_terminal_job(pool: &PgPool, job_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM scrape_jobs WHERE id = $1 AND status NOT IN ('pending', 'in_progress')",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// The most recent completed job for the target before `current_job_id`.
pub async fn previous_completed_job_id(
    pool: &PgPool,
    target_id: i64,
    current_job_id: i64,
) -> Result<Option<i64>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id FROM scrape_jobs
        WHERE target_id = $1 AND id < $2 AND status = 'completed'
        ORDER BY completed_at DESC
        LIMIT 1
        "#,
    )
    .bind(target_id)
    .bind(current_job_id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| r.try_get("id")).transpose()
}

/// Write delta counts onto a job.
pub async fn set_job_delta_counts(
    pool: &PgPool,
    job_id: i64,
    new_followers: i64,
    lost_followers: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE scrape_jobs SET new_followers = $1, lost_followers = $2 WHERE id = $3")
        .bind(new_followers)
        .bind(lost_followers)
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

/// Bulk-insert the relationship snapshot for a job via UNNEST.
pub async fn insert_relationships(
    pool: &PgPool,
    records: &[Relationship],
) -> Result<(), sqlx::Error> {
    if records.is_empty() {
        return Ok(());
    }

    let target_ids: Vec<i64> = records.iter().map(|r| r.target_id).collect();
    let counterpart_ids: Vec<i64> = records.iter().map(|r| r.counterpart_id).collect();
    let job_ids: Vec<i64> = records.iter().map(|r| r.job_id).collect();
    let kinds: Vec<String> = records.iter().map(|r| r.relation_kind.to_string()).collect();
    let handles: Vec<String> = records.iter().map(|r| r.handle.clone()).collect();
    let display_names: Vec<Option<String>> =
        records.iter().map(|r| r.display_name.clone()).collect();
    let avatar_urls: Vec<Option<String>> = records.iter().map(|r| r.avatar_url.clone()).collect();
    let verified: Vec<bool> = records.iter().map(|r| r.is_verified).collect();
    let private: Vec<bool> = records.iter().map(|r| r.is_private).collect();
    let mutual: Vec<bool> = records.iter().map(|r| r.is_mutual).collect();

    sqlx::query(
        r#"
        INSERT INTO relationships
            (target_id, counterpart_id, job_id, relation_kind, handle, display_name,
             avatar_url, is_verified, is_private, is_mutual)
        SELECT * FROM UNNEST
            ($1::bigint[], $2::bigint[], $3::bigint[], $4::text[], $5::text[], $6::text[],
             $7::text[], $8::boolean[], $9::boolean[], $10::boolean[])
        ON CONFLICT (target_id, counterpart_id, job_id, relation_kind) DO NOTHING
        "#,
    )
    .bind(&target_ids)
    .bind(&counterpart_ids)
    .bind(&job_ids)
    .bind(&kinds)
    .bind(&handles)
    .bind(&display_names)
    .bind(&avatar_urls)
    .bind(&verified)
    .bind(&private)
    .bind(&mutual)
    .execute(pool)
    .await?;
    Ok(())
}

/// Counterpart ids of a given relation kind within one job's snapshot.
pub async fn relation_ids_for_job(
    pool: &PgPool,
    job_id: i64,
    kind: RelationKind,
) -> Result<HashSet<i64>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT counterpart_id FROM relationships WHERE job_id = $1 AND relation_kind = $2",
    )
    .bind(job_id)
    .bind(kind.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| r.try_get::<i64, _>("counterpart_id"))
        .collect()
}

/// Flag followers in the current snapshot that were absent last time.
pub async fn mark_new_followers(
    pool: &PgPool,
    job_id: i64,
    new_ids: &HashSet<i64>,
) -> Result<(), sqlx::Error> {
    if new_ids.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = new_ids.iter().copied().collect();
    sqlx::query(
        r#"
        UPDATE relationships
        SET is_new = TRUE
        WHERE job_id = $1 AND relation_kind = 'follower' AND counterpart_id = ANY($2)
        "#,
    )
    .bind(job_id)
    .bind(&ids)
    .execute(pool)
    .await?;
    Ok(())
}

/// Relationship rows for one job, paged, followers first.
pub async fn list_relationships_for_job(
    pool: &PgPool,
    job_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<Relationship>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT target_id, counterpart_id, job_id, relation_kind, handle, display_name,
               avatar_url, is_verified, is_private, is_mutual, is_new, first_seen, last_seen
        FROM relationships
        WHERE job_id = $1
        ORDER BY relation_kind ASC, handle ASC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(job_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| {
            let kind_str: String = r.try_get("relation_kind")?;
            Ok(Relationship {
                target_id: r.try_get("target_id")?,
                counterpart_id: r.try_get("counterpart_id")?,
                job_id: r.try_get("job_id")?,
                relation_kind: RelationKind::from_str(&kind_str)
                    .unwrap_or(RelationKind::Follower),
                handle: r.try_get("handle")?,
                display_name: r.try_get("display_name")?,
                avatar_url: r.try_get("avatar_url")?,
                is_verified: r.try_get("is_verified")?,
                is_private: r.try_get("is_private")?,
                is_mutual: r.try_get("is_mutual")?,
                is_new: r.try_get("is_new")?,
                first_seen: r.try_get("first_seen")?,
                last_seen: r.try_get("last_seen")?,
            })
        })
        .collect()
}
