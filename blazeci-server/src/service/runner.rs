//! Runner Service
//!
//! Business logic for runner record queries and operator commands. Writes
//! to runner state always go through the repository's fleet worker so
//! they serialize with reconciliation.

use blazeci_core::domain::runner::{RunnerRecord, RunnerState};
use blazeci_core::dto::runner::FleetSnapshot;
use sqlx::PgPool;
use uuid::Uuid;

use crate::fleet::FleetManager;
use crate::repository::runner_repository;

/// Service error type
#[derive(Debug)]
pub enum RunnerError {
    NotFound(Uuid),
    InvalidState(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for RunnerError {
    fn from(err: sqlx::Error) -> Self {
        RunnerError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Runner records and the latest fleet snapshot for a repository
pub async fn fleet_status(
    pool: &PgPool,
    fleet: &FleetManager,
    repo_id: i64,
) -> Result<(Vec<RunnerRecord>, Option<FleetSnapshot>)> {
    let records = runner_repository::list_by_repo(pool, repo_id).await?;
    Ok((records, fleet.snapshot(repo_id)))
}

/// Operator-initiated drain of one runner
///
/// Idempotent: draining a runner that is already draining or closed is
/// accepted and does nothing.
pub async fn drain_runner(pool: &PgPool, fleet: &FleetManager, runner_id: Uuid) -> Result<()> {
    let record = runner_repository::find_by_id(pool, runner_id)
        .await?
        .ok_or(RunnerError::NotFound(runner_id))?;

    fleet.drain_runner(record.repo_id, runner_id).await;

    tracing::info!("Drain requested for runner {}", runner_id);

    Ok(())
}

/// Operator acknowledgement of a Failed runner
///
/// Releases the repository's scale-up hold.
pub async fn reset_runner(pool: &PgPool, fleet: &FleetManager, runner_id: Uuid) -> Result<()> {
    let record = runner_repository::find_by_id(pool, runner_id)
        .await?
        .ok_or(RunnerError::NotFound(runner_id))?;

    if record.state != RunnerState::Failed {
        return Err(RunnerError::InvalidState(format!(
            "runner {} is {}, only Failed runners can be reset",
            runner_id, record.state
        )));
    }

    fleet.reset_runner(record.repo_id, runner_id).await;

    tracing::info!("Reset requested for failed runner {}", runner_id);

    Ok(())
}
