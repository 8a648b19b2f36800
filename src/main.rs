use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use followtrack::app_state::AppState;
use followtrack::config::AppConfig;
use followtrack::db;
use followtrack::routes;
use followtrack::scrape::scheduler;
use followtrack::services::{
    encryption::EncryptionService,
    progress::ProgressPublisher,
    queue::JobQueue,
    rate_limit::{RateGovernor, RedisRateStore},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing followtrack server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("scrape_jobs_submitted", "Total scrape jobs submitted");
    metrics::describe_counter!("scrape_jobs_completed", "Total scrape jobs completed");
    metrics::describe_counter!("scrape_jobs_failed", "Total scrape jobs that failed");
    metrics::describe_gauge!(
        "scrape_queue_depth",
        "Current number of pending jobs in the queue"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize encryption service
    tracing::info!("Initializing AES-256-GCM encryption");
    let encryption =
        EncryptionService::new(&config.encryption_key).expect("Failed to initialize encryption");

    // Initialize Redis-backed services
    tracing::info!("Connecting to Redis");
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

    // Create shared application state
    let state = AppState::new(db_pool, encryption, queue, progress, governor, config.clone());

    // Daily refresh of bookmarked targets
    tokio::spawn(scheduler::run(
        state.orchestrator.clone(),
        config.scheduler_hour_utc,
    ));

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        // Targets
        .route("/api/v1/targets", get(routes::targets::list_targets))
        .route("/api/v1/targets", post(routes::targets::create_target))
        .route("/api/v1/targets/{handle}", get(routes::targets::get_target))
        .route(
            "/api/v1/targets/{handle}",
            delete(routes::targets::delete_target),
        )
        .route(
            "/api/v1/targets/{handle}/bookmark",
            put(routes::targets::set_bookmark),
        )
        .route(
            "/api/v1/targets/{handle}/credentials",
            post(routes::targets::store_credential),
        )
        .route(
            "/api/v1/targets/{handle}/credentials",
            delete(routes::targets::remove_credential),
        )
        .route(
            "/api/v1/targets/{handle}/scrapes",
            get(routes::scrapes::list_scrapes_for_target),
        )
        // Scrape jobs
        .route("/api/v1/scrapes", post(routes::scrapes::submit_scrape))
        .route("/api/v1/scrapes/{job_id}", get(routes::scrapes::get_scrape))
        .route(
            "/api/v1/scrapes/{job_id}",
            delete(routes::scrapes::delete_scrape),
        )
        .route(
            "/api/v1/scrapes/{job_id}/cancel",
            post(routes::scrapes::cancel_scrape),
        )
        .route(
            "/api/v1/scrapes/{job_id}/relationships",
            get(routes::scrapes::list_relationships),
        )
        .route(
            "/api/v1/scrapes/progress/{work_handle}",
            get(routes::scrapes::get_progress),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting followtrack on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
