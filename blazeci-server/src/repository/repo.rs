//! Repo Repository
//!
//! Handles all database operations related to connected repositories.

use blazeci_core::domain::event::RepoRef;
use blazeci_core::domain::repo::RepoConfig;
use sqlx::PgPool;

/// Find a repository by its GitHub id
pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<RepoConfig>, sqlx::Error> {
    let row = sqlx::query_as::<_, RepoRow>(
        r#"
        SELECT id, owner, name, installation_id, max_runners, allowed_labels,
               active, created_at, updated_at
        FROM repositories
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.into()))
}

/// List all repositories
pub async fn list_all(pool: &PgPool) -> Result<Vec<RepoConfig>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RepoRow>(
        r#"
        SELECT id, owner, name, installation_id, max_runners, allowed_labels,
               active, created_at, updated_at
        FROM repositories
        ORDER BY owner, name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Ids of repositories that should have a worker at startup
pub async fn list_active_ids(pool: &PgPool) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM repositories WHERE active = TRUE")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Create a repository row on first contact, or refresh its identity
///
/// Used by the webhook path so a verified delivery for a repository we
/// have a secret for always has a config row to reconcile against.
pub async fn ensure_exists(
    pool: &PgPool,
    repo: &RepoRef,
    installation_id: Option<i64>,
    default_max_runners: u32,
    default_labels: &[String],
) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now();

    sqlx::query(
        r#"
        INSERT INTO repositories
            (id, owner, name, installation_id, max_runners, allowed_labels,
             active, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $7)
        ON CONFLICT (id) DO UPDATE SET
            owner = EXCLUDED.owner,
            name = EXCLUDED.name,
            installation_id = COALESCE(EXCLUDED.installation_id, repositories.installation_id),
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(repo.id)
    .bind(&repo.owner)
    .bind(&repo.name)
    .bind(installation_id)
    .bind(default_max_runners as i32)
    .bind(default_labels)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Update a repository's runner configuration
pub async fn update_config(
    pool: &PgPool,
    id: i64,
    max_runners: u32,
    allowed_labels: &[String],
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE repositories
        SET max_runners = $1, allowed_labels = $2, updated_at = $3
        WHERE id = $4
        "#,
    )
    .bind(max_runners as i32)
    .bind(allowed_labels)
    .bind(chrono::Utc::now())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Soft-delete or restore every repository under an installation
pub async fn set_active_by_installation(
    pool: &PgPool,
    installation_id: i64,
    active: bool,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE repositories
        SET active = $1, updated_at = $2
        WHERE installation_id = $3
        "#,
    )
    .bind(active)
    .bind(chrono::Utc::now())
    .bind(installation_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RepoRow {
    id: i64,
    owner: String,
    name: String,
    installation_id: Option<i64>,
    max_runners: i32,
    allowed_labels: Vec<String>,
    active: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<RepoRow> for RepoConfig {
    fn from(row: RepoRow) -> Self {
        RepoConfig {
            id: row.id,
            owner: row.owner,
            name: row.name,
            installation_id: row.installation_id,
            max_runners: row.max_runners.max(0) as u32,
            allowed_labels: row.allowed_labels,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
