//! Repository DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::repo::RepoConfig;

/// Repository summary for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSummary {
    pub id: i64,
    pub full_name: String,
    pub installation_id: Option<i64>,
    pub max_runners: u32,
    pub allowed_labels: Vec<String>,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<RepoConfig> for RepoSummary {
    fn from(repo: RepoConfig) -> Self {
        Self {
            id: repo.id,
            full_name: repo.full_name(),
            installation_id: repo.installation_id,
            max_runners: repo.max_runners,
            allowed_labels: repo.allowed_labels,
            active: repo.active,
            updated_at: repo.updated_at,
        }
    }
}

/// Request to update a repository's runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRepoConfig {
    pub max_runners: u32,
    pub allowed_labels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_summary_conversion() {
        let repo = RepoConfig {
            id: 7,
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            installation_id: Some(42),
            max_runners: 3,
            allowed_labels: vec!["self-hosted".to_string()],
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let dto: RepoSummary = repo.clone().into();
        assert_eq!(dto.id, repo.id);
        assert_eq!(dto.full_name, "acme/widgets");
        assert_eq!(dto.max_runners, 3);
    }
}
