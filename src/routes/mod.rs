pub mod health;
pub mod metrics;
pub mod scrapes;
pub mod targets;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::scrape::orchestrator::ScrapeError;

/// Uniform JSON error body for all API routes.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "Database error in request handler");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl From<ScrapeError> for ApiError {
    fn from(e: ScrapeError) -> Self {
        match e {
            ScrapeError::JobNotFound(_) => Self::not_found(e.to_string()),
            ScrapeError::InvalidState { .. } => Self::new(StatusCode::CONFLICT, e.to_string()),
            other => {
                tracing::error!(error = %other, "Orchestrator error in request handler");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl From<crate::services::credentials::CredentialError> for ApiError {
    fn from(e: crate::services::credentials::CredentialError) -> Self {
        tracing::error!(error = %e, "Credential error in request handler");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

/// Limit/offset pagination with bounded page size.
#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "Pagination::default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl Pagination {
    const MAX_LIMIT: i64 = 500;

    fn default_limit() -> i64 {
        100
    }

    pub fn clamp(&self) -> (i64, i64) {
        (self.limit.clamp(1, Self::MAX_LIMIT), self.offset.max(0))
    }
}
