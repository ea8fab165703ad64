//! Webhook Repository
//!
//! Handles database operations for webhook registrations and their shared
//! secrets, used by the ingress handler for signature verification.

use sqlx::PgPool;

/// A webhook registration's verification material
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookSecret {
    pub repo_id: i64,
    pub secret: String,
}

/// List the secrets of all active webhook registrations
pub async fn list_active(pool: &PgPool) -> Result<Vec<WebhookSecret>, sqlx::Error> {
    sqlx::query_as::<_, WebhookSecret>(
        r#"
        SELECT repo_id, secret
        FROM webhooks
        WHERE active = TRUE
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Create a webhook registration for a repository, replacing any prior one
pub async fn create(pool: &PgPool, repo_id: i64, secret: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE webhooks SET active = FALSE WHERE repo_id = $1")
        .bind(repo_id)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO webhooks (repo_id, secret, active, created_at)
        VALUES ($1, $2, TRUE, $3)
        "#,
    )
    .bind(repo_id)
    .bind(secret)
    .bind(chrono::Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}
