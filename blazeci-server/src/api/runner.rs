//! Runner API Handlers
//!
//! HTTP endpoints for runner record visibility and operator commands.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use uuid::Uuid;

use blazeci_core::dto::runner::{FleetSnapshot, RunnerRecordDto};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::service::runner_service;

fn map_runner_error(e: runner_service::RunnerError) -> ApiError {
    match e {
        runner_service::RunnerError::NotFound(id) => {
            ApiError::NotFound(format!("Runner {} not found", id))
        }
        runner_service::RunnerError::InvalidState(msg) => ApiError::BadRequest(msg),
        runner_service::RunnerError::DatabaseError(err) => ApiError::DatabaseError(err),
    }
}

/// Runner records plus the latest reconciliation snapshot
#[derive(Debug, Serialize)]
pub struct RepoFleetResponse {
    pub runners: Vec<RunnerRecordDto>,
    pub snapshot: Option<FleetSnapshot>,
}

/// GET /api/repos/{id}/runners
/// Runner records and fleet snapshot for a repository
pub async fn repo_fleet(
    State(state): State<AppState>,
    Path(repo_id): Path<i64>,
) -> ApiResult<Json<RepoFleetResponse>> {
    tracing::debug!("Fleet status for repository {}", repo_id);

    let (records, snapshot) = runner_service::fleet_status(&state.pool, &state.fleet, repo_id)
        .await
        .map_err(map_runner_error)?;

    Ok(Json(RepoFleetResponse {
        runners: records.into_iter().map(Into::into).collect(),
        snapshot,
    }))
}

/// DELETE /api/runners/{id}
/// Operator-initiated drain of a runner
pub async fn drain_runner(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Operator drain for runner {}", id);

    runner_service::drain_runner(&state.pool, &state.fleet, id)
        .await
        .map_err(map_runner_error)?;

    Ok(StatusCode::ACCEPTED)
}

/// POST /api/runners/{id}/reset
/// Acknowledge a Failed runner so provisioning may resume
pub async fn reset_runner(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Operator reset for runner {}", id);

    runner_service::reset_runner(&state.pool, &state.fleet, id)
        .await
        .map_err(map_runner_error)?;

    Ok(StatusCode::ACCEPTED)
}
