//! Runner Record Repository
//!
//! Handles all database operations related to runner records. Records are
//! never deleted; terminal rows stay for audit.

use blazeci_core::domain::runner::{RunnerRecord, RunnerState};
use sqlx::PgPool;
use uuid::Uuid;

/// Create or update a runner record
pub async fn upsert(pool: &PgPool, record: &RunnerRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO runner_records
            (id, repo_id, state, task_handle, labels, active_job,
             launch_attempts, next_retry_at, created_at, last_observed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (id) DO UPDATE SET
            state = EXCLUDED.state,
            task_handle = COALESCE(runner_records.task_handle, EXCLUDED.task_handle),
            active_job = EXCLUDED.active_job,
            launch_attempts = EXCLUDED.launch_attempts,
            next_retry_at = EXCLUDED.next_retry_at,
            last_observed_at = EXCLUDED.last_observed_at
        "#,
    )
    .bind(record.id)
    .bind(record.repo_id)
    .bind(record.state.to_string())
    .bind(&record.task_handle)
    .bind(&record.labels)
    .bind(record.active_job)
    .bind(record.launch_attempts as i32)
    .bind(record.next_retry_at)
    .bind(record.created_at)
    .bind(record.last_observed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find a runner record by id
pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<RunnerRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, repo_id, state, task_handle, labels, active_job,
               launch_attempts, next_retry_at, created_at, last_observed_at
        FROM runner_records
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all records for a repository, newest first
pub async fn list_by_repo(pool: &PgPool, repo_id: i64) -> Result<Vec<RunnerRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, repo_id, state, task_handle, labels, active_job,
               launch_attempts, next_retry_at, created_at, last_observed_at
        FROM runner_records
        WHERE repo_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(repo_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// List records the reconciler still owns (non-terminal)
pub async fn list_non_terminal(
    pool: &PgPool,
    repo_id: i64,
) -> Result<Vec<RunnerRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunnerRow>(
        r#"
        SELECT id, repo_id, state, task_handle, labels, active_job,
               launch_attempts, next_retry_at, created_at, last_observed_at
        FROM runner_records
        WHERE repo_id = $1 AND state NOT IN ('Terminated', 'Orphaned')
        ORDER BY created_at
        "#,
    )
    .bind(repo_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunnerRow {
    id: Uuid,
    repo_id: i64,
    state: String,
    task_handle: Option<String>,
    labels: Vec<String>,
    active_job: Option<i64>,
    launch_attempts: i32,
    next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
    last_observed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<RunnerRow> for RunnerRecord {
    fn from(row: RunnerRow) -> Self {
        let state = match row.state.as_str() {
            "Provisioning" => RunnerState::Provisioning,
            "Active" => RunnerState::Active,
            "Draining" => RunnerState::Draining,
            "Terminated" => RunnerState::Terminated,
            "Failed" => RunnerState::Failed,
            "Orphaned" => RunnerState::Orphaned,
            // Unknown states are treated as closed rather than live
            _ => RunnerState::Terminated,
        };

        RunnerRecord {
            id: row.id,
            repo_id: row.repo_id,
            state,
            task_handle: row.task_handle,
            labels: row.labels,
            active_job: row.active_job,
            launch_attempts: row.launch_attempts.max(0) as u32,
            next_retry_at: row.next_retry_at,
            created_at: row.created_at,
            last_observed_at: row.last_observed_at,
        }
    }
}
