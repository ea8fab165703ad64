//! Repo API Handlers
//!
//! HTTP endpoints for repository configuration.

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::json;

use blazeci_core::dto::repo::{RepoSummary, UpdateRepoConfig};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::repo_service;

fn map_repo_error(e: repo_service::RepoError) -> ApiError {
    match e {
        repo_service::RepoError::NotFound(id) => {
            ApiError::NotFound(format!("Repository {} not found", id))
        }
        repo_service::RepoError::ValidationError(msg) => ApiError::BadRequest(msg),
        repo_service::RepoError::DatabaseError(err) => ApiError::DatabaseError(err),
    }
}

/// GET /api/repos
/// List all connected repositories
pub async fn list_repos(State(state): State<AppState>) -> ApiResult<Json<Vec<RepoSummary>>> {
    tracing::debug!("Listing repositories");

    let repos = repo_service::list_repos(&state.pool)
        .await
        .map_err(map_repo_error)?;

    Ok(Json(repos.into_iter().map(Into::into).collect()))
}

/// GET /api/repos/{id}
/// Get a repository's configuration
pub async fn get_repo(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<RepoSummary>> {
    tracing::debug!("Getting repository {}", id);

    let repo = repo_service::get_repo(&state.pool, id)
        .await
        .map_err(map_repo_error)?;

    Ok(Json(repo.into()))
}

/// PUT /api/repos/{id}/config
/// Update a repository's runner configuration
pub async fn update_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRepoConfig>,
) -> ApiResult<Json<RepoSummary>> {
    tracing::info!("Updating runner config for repository {}", id);

    let repo = repo_service::update_config(&state.pool, id, req)
        .await
        .map_err(map_repo_error)?;

    // The worker picks the new limits up on its next pass
    state.fleet.dispatch_hint(id).await;

    Ok(Json(repo.into()))
}

/// POST /api/repos/{id}/webhook
/// Issue a fresh webhook secret for a repository
pub async fn register_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    tracing::info!("Registering webhook for repository {}", id);

    let secret = repo_service::register_webhook(&state.pool, id)
        .await
        .map_err(map_repo_error)?;

    Ok(Json(json!({ "repo_id": id, "secret": secret })))
}
