//! Installation Repository
//!
//! Handles database operations for GitHub App installations.

use blazeci_core::domain::event::InstallationEvent;
use sqlx::PgPool;

/// Create or refresh an installation
pub async fn upsert(pool: &PgPool, event: &InstallationEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO installations (installation_id, account_login, account_type, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (installation_id) DO UPDATE SET
            account_login = EXCLUDED.account_login,
            account_type = EXCLUDED.account_type
        "#,
    )
    .bind(event.installation_id)
    .bind(&event.account_login)
    .bind(&event.account_type)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Remove an installation
pub async fn delete(pool: &PgPool, installation_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM installations WHERE installation_id = $1")
        .bind(installation_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
