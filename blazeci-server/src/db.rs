use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create repositories table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id BIGINT PRIMARY KEY,
            owner VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            installation_id BIGINT,
            max_runners INTEGER NOT NULL DEFAULT 2,
            allowed_labels TEXT[] NOT NULL DEFAULT '{}',
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (owner, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create runner records table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runner_records (
            id UUID PRIMARY KEY,
            repo_id BIGINT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
            state VARCHAR(50) NOT NULL,
            task_handle VARCHAR(255),
            labels TEXT[] NOT NULL DEFAULT '{}',
            active_job BIGINT,
            launch_attempts INTEGER NOT NULL DEFAULT 0,
            next_retry_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            last_observed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create installations table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS installations (
            installation_id BIGINT PRIMARY KEY,
            account_login VARCHAR(255) NOT NULL,
            account_type VARCHAR(50) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create webhooks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS webhooks (
            id SERIAL PRIMARY KEY,
            repo_id BIGINT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
            secret VARCHAR(255) NOT NULL,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for better query performance
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runner_records_repo_id ON runner_records(repo_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_runner_records_state ON runner_records(state)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_repositories_installation ON repositories(installation_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_webhooks_active ON webhooks(repo_id, active)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
