//! Target CRUD, bookmarks, and credential management.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;

use super::{ApiError, Pagination};
use crate::app_state::AppState;
use crate::db::queries;
use crate::models::target::{is_valid_handle, normalize_handle, Target};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTargetRequest {
    #[garde(length(min = 1, max = 30))]
    pub handle: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BookmarkRequest {
    #[garde(skip)]
    pub bookmarked: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CredentialRequest {
    #[garde(length(min = 1, max = 256))]
    pub secret: String,
}

/// GET /api/v1/targets
pub async fn list_targets(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<Target>>, ApiError> {
    let (limit, offset) = pagination.clamp();
    let targets = queries::list_targets(&state.db, limit, offset).await?;
    Ok(Json(targets))
}

/// POST /api/v1/targets — register a target (idempotent on handle).
pub async fn create_target(
    State(state): State<AppState>,
    Json(request): Json<CreateTargetRequest>,
) -> Result<(StatusCode, Json<Target>), ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let handle = normalize_handle(&request.handle);
    if !is_valid_handle(&handle) {
        return Err(ApiError::bad_request(format!("invalid handle '{handle}'")));
    }

    let target = queries::ensure_target(&state.db, &handle).await?;
    Ok((StatusCode::CREATED, Json(target)))
}

/// GET /api/v1/targets/{handle}
pub async fn get_target(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Json<Target>, ApiError> {
    let handle = normalize_handle(&handle);
    let target = queries::get_target_by_handle(&state.db, &handle)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("target '{handle}' not found")))?;
    Ok(Json(target))
}

/// PUT /api/v1/targets/{handle}/bookmark — include or exclude the target
/// from the daily scheduled refresh.
pub async fn set_bookmark(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Json(request): Json<BookmarkRequest>,
) -> Result<Json<Target>, ApiError> {
    let handle = normalize_handle(&handle);
    let target = queries::get_target_by_handle(&state.db, &handle)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("target '{handle}' not found")))?;

    let updated = queries::set_target_bookmark(&state.db, target.id, request.bookmarked)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("target '{handle}' not found")))?;
    Ok(Json(updated))
}

/// DELETE /api/v1/targets/{handle} — removes the target and, by cascade,
/// its jobs and relationship snapshots.
pub async fn delete_target(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<StatusCode, ApiError> {
    let handle = normalize_handle(&handle);
    let target = queries::get_target_by_handle(&state.db, &handle)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("target '{handle}' not found")))?;

    queries::delete_target(&state.db, target.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/targets/{handle}/credentials — store the session secret,
/// encrypted at rest. The plaintext never touches the database or logs.
pub async fn store_credential(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    Json(request): Json<CredentialRequest>,
) -> Result<StatusCode, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let handle = normalize_handle(&handle);
    if !is_valid_handle(&handle) {
        return Err(ApiError::bad_request(format!("invalid handle '{handle}'")));
    }

    state
        .credentials
        .store(&state.db, &handle, &request.secret)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/targets/{handle}/credentials
pub async fn remove_credential(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<StatusCode, ApiError> {
    let handle = normalize_handle(&handle);
    let removed = state.credentials.remove(&state.db, &handle).await?;
    if !removed {
        return Err(ApiError::not_found(format!("target '{handle}' not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}
