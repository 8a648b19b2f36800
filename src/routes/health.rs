use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub queue: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    /// Pending jobs, reported for the queue component only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<i64>,
}

/// GET /health — dependency status for the database and the job queue.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_start = std::time::Instant::now();
    let database = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(db_start.elapsed().as_millis() as u64),
            depth: None,
        },
        Err(_) => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
            depth: None,
        },
    };

    let queue_start = std::time::Instant::now();
    let queue = match state.queue.health_check().await {
        Ok(_) => {
            let depth = state.queue.queue_depth().await.ok().map(|d| d as i64);
            ComponentHealth {
                status: "ok".to_string(),
                latency_ms: Some(queue_start.elapsed().as_millis() as u64),
                depth,
            }
        }
        Err(_) => ComponentHealth {
            status: "error".to_string(),
            latency_ms: None,
            depth: None,
        },
    };

    let all_healthy = database.status == "ok" && queue.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { database, queue },
    };

    (status_code, Json(response))
}
