use followtrack::{
    config::AppConfig,
    db::{self, queries},
    models::job::{JobStatus, ScrapeType},
    models::relationship::RelationKind,
    scrape::{build_relationships, delta, mark_mutuals, ProfileSummary},
    services::queue::{JobQueue, QueuedScrape},
};
use uuid::Uuid;

fn profile(id: i64, handle: &str) -> ProfileSummary {
    ProfileSummary {
        id,
        handle: handle.to_string(),
        display_name: None,
        avatar_url: None,
        is_verified: false,
        is_private: false,
    }
}

/// Integration test: job lifecycle against live backing services.
///
/// Exercises target registration, job creation and the guarded status
/// transitions, queue round-trip, relationship persistence with mutual
/// flagging, and the follower delta between two completed jobs.
///
/// Note: this requires a running PostgreSQL and Redis instance
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_job_lifecycle() {
    let config = AppConfig::from_env().expect("Failed to load config");

    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run migrations");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize queue");

    // Unique handle per run so the test does not collide with itself.
    let handle = format!("it_{}", &Uuid::new_v4().simple().to_string()[..12]);

    // 1. Target registration is idempotent on handle
    let target = queries::ensure_target(&db_pool, &handle)
        .await
        .expect("Failed to create target");
    let again = queries::ensure_target(&db_pool, &handle)
        .await
        .expect("Failed to re-ensure target");
    assert_eq!(target.id, again.id);

    // 2. Job creation starts pending
    let job = queries::create_job(&db_pool, target.id, ScrapeType::Both)
        .await
        .expect("Failed to create job");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 0);

    let work_handle = Uuid::new_v4();
    queries::set_job_work_handle(&db_pool, job.id, work_handle)
        .await
        .expect("Failed to set work handle");

    // 3. Queue round-trip
    let queued = QueuedScrape {
        job_id: job.id,
        work_handle,
        target_handle: handle.clone(),
        scrape_type: ScrapeType::Both,
        prefer_authenticated: false,
    };
    queue.enqueue(&queued).await.expect("Failed to enqueue");
    let dequeued = queue
        .dequeue()
        .await
        .expect("Failed to dequeue")
        .expect("No job in queue");
    assert_eq!(dequeued.job_id, job.id);
    assert_eq!(dequeued.work_handle, work_handle);
    queue.complete(&dequeued).await.expect("Failed to complete");

    // 4. pending -> in_progress is guarded and one-shot
    let started = queries::mark_job_started(&db_pool, job.id)
        .await
        .expect("Failed to start job");
    assert!(started.is_some());
    let started_twice = queries::mark_job_started(&db_pool, job.id)
        .await
        .expect("Second start attempt errored");
    assert!(started_twice.is_none(), "in_progress job must not restart");

    // 5. Persist a snapshot with a mutual
    let followers = vec![profile(101, "alpha"), profile(102, "beta")];
    let following = vec![profile(102, "beta"), profile(103, "gamma")];
    let mut records =
        build_relationships(target.id, job.id, RelationKind::Follower, &followers);
    records.extend(build_relationships(
        target.id,
        job.id,
        RelationKind::Following,
        &following,
    ));
    mark_mutuals(&mut records);
    queries::insert_relationships(&db_pool, &records)
        .await
        .expect("Failed to insert relationships");

    let first_delta = delta::compute_job_delta(&db_pool, target.id, job.id)
        .await
        .expect("Failed to compute delta");
    assert_eq!(first_delta.new_ids.len(), 2, "first snapshot is all new");
    assert!(first_delta.lost_ids.is_empty());

    queries::mark_job_completed(&db_pool, job.id, followers.len() as i64, following.len() as i64)
        .await
        .expect("Failed to complete job");
    let completed = queries::get_job(&db_pool, job.id)
        .await
        .expect("Failed to get job")
        .expect("Job not found");
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.followers_count, Some(2));

    // 6. Second job: one follower gained, one lost
    let job2 = queries::create_job(&db_pool, target.id, ScrapeType::Followers)
        .await
        .expect("Failed to create second job");
    queries::mark_job_started(&db_pool, job2.id)
        .await
        .expect("Failed to start second job");

    let followers2 = vec![profile(102, "beta"), profile(104, "delta")];
    let records2 = build_relationships(target.id, job2.id, RelationKind::Follower, &followers2);
    queries::insert_relationships(&db_pool, &records2)
        .await
        .expect("Failed to insert second snapshot");
    queries::mark_job_completed(&db_pool, job2.id, followers2.len() as i64, 0)
        .await
        .expect("Failed to complete second job");

    let second_delta = delta::compute_job_delta(&db_pool, target.id, job2.id)
        .await
        .expect("Failed to compute second delta");
    assert_eq!(second_delta.new_ids, [104].into_iter().collect());
    assert_eq!(second_delta.lost_ids, [101].into_iter().collect());

    // 7. Cancellation only touches non-terminal jobs
    let job3 = queries::create_job(&db_pool, target.id, ScrapeType::Following)
        .await
        .expect("Failed to create third job");
    let cancelled = queries::finalize_cancelled_job(&db_pool, job3.id, false, 0, 0)
        .await
        .expect("Failed to cancel third job")
        .expect("Pending job must be cancellable");
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let already_terminal = queries::finalize_cancelled_job(&db_pool, job3.id, true, 5, 5)
        .await
        .expect("Re-cancel attempt errored");
    assert!(already_terminal.is_none(), "terminal job must stay put");

    // 8. Terminal-only deletion
    assert!(queries::delete_terminal_job(&db_pool, job3.id)
        .await
        .expect("Failed to delete cancelled job"));

    // Cleanup: cascade removes remaining jobs and relationships
    assert!(queries::delete_target(&db_pool, target.id)
        .await
        .expect("Failed to delete target"));
}
