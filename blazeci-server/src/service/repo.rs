//! Repo Service
//!
//! Business logic for repository configuration.

use blazeci_core::domain::repo::RepoConfig;
use blazeci_core::dto::repo::UpdateRepoConfig;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{repo_repository, webhook_repository};

/// Hard ceiling on per-repository runner caps; a typo in a config update
/// should not let one repository occupy the whole cluster.
const MAX_RUNNERS_CEILING: u32 = 64;

/// Service error type
#[derive(Debug)]
pub enum RepoError {
    NotFound(i64),
    ValidationError(String),
    DatabaseError(sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        RepoError::DatabaseError(err)
    }
}

pub type Result<T> = std::result::Result<T, RepoError>;

/// Get a repository by id
pub async fn get_repo(pool: &PgPool, id: i64) -> Result<RepoConfig> {
    let repo = repo_repository::find_by_id(pool, id)
        .await?
        .ok_or(RepoError::NotFound(id))?;

    Ok(repo)
}

/// List all connected repositories
pub async fn list_repos(pool: &PgPool) -> Result<Vec<RepoConfig>> {
    let repos = repo_repository::list_all(pool).await?;
    Ok(repos)
}

/// Update a repository's runner configuration
pub async fn update_config(pool: &PgPool, id: i64, req: UpdateRepoConfig) -> Result<RepoConfig> {
    validate_config(&req)?;

    let updated = repo_repository::update_config(pool, id, req.max_runners, &req.allowed_labels)
        .await?;

    if !updated {
        return Err(RepoError::NotFound(id));
    }

    tracing::info!(
        "Updated runner config for repo {}: max_runners={}, labels={:?}",
        id,
        req.max_runners,
        req.allowed_labels
    );

    get_repo(pool, id).await
}

/// Issue a fresh webhook secret for a repository
///
/// The returned secret is shown once; the operator configures it on the
/// GitHub webhook by hand (or via the App's hook).
pub async fn register_webhook(pool: &PgPool, repo_id: i64) -> Result<String> {
    // The repository must be known before a webhook can verify against it
    let _repo = get_repo(pool, repo_id).await?;

    let secret = Uuid::new_v4().simple().to_string();
    webhook_repository::create(pool, repo_id, &secret).await?;

    tracing::info!("Registered webhook secret for repo {}", repo_id);

    Ok(secret)
}

// =============================================================================
// Validation
// =============================================================================

fn validate_config(req: &UpdateRepoConfig) -> Result<()> {
    if req.max_runners == 0 {
        return Err(RepoError::ValidationError(
            "max_runners must be at least 1".to_string(),
        ));
    }

    if req.max_runners > MAX_RUNNERS_CEILING {
        return Err(RepoError::ValidationError(format!(
            "max_runners cannot exceed {MAX_RUNNERS_CEILING}"
        )));
    }

    if req.allowed_labels.is_empty() {
        return Err(RepoError::ValidationError(
            "at least one runner label is required".to_string(),
        ));
    }

    if req.allowed_labels.iter().any(|l| l.trim().is_empty()) {
        return Err(RepoError::ValidationError(
            "labels cannot be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(max_runners: u32, labels: &[&str]) -> UpdateRepoConfig {
        UpdateRepoConfig {
            max_runners,
            allowed_labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&request(2, &["self-hosted"])).is_ok());
    }

    #[test]
    fn test_zero_max_runners_rejected() {
        assert!(validate_config(&request(0, &["self-hosted"])).is_err());
    }

    #[test]
    fn test_excessive_max_runners_rejected() {
        assert!(validate_config(&request(500, &["self-hosted"])).is_err());
    }

    #[test]
    fn test_empty_labels_rejected() {
        assert!(validate_config(&request(2, &[])).is_err());
        assert!(validate_config(&request(2, &["self-hosted", "  "])).is_err());
    }
}
