//! Repository domain model
//!
//! Represents a repository connected to the fleet and its runner
//! configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A repository connected to the fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    /// GitHub's numeric repository id
    pub id: i64,

    /// Account that owns the repository
    pub owner: String,

    /// Repository name without the owner prefix
    pub name: String,

    /// GitHub App installation covering this repository, if any
    pub installation_id: Option<i64>,

    /// Upper bound on concurrently live runners for this repository
    pub max_runners: u32,

    /// Labels a job must request to be served by this fleet
    pub allowed_labels: Vec<String>,

    /// Inactive repositories keep their history but are never scaled
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RepoConfig {
    /// Returns the repository in `owner/name` form
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Checks whether a job's requested labels are served by this repository
    ///
    /// A job matches when it requests at least one label and every requested
    /// label is in the allowed set. Jobs with no labels target GitHub-hosted
    /// runners and never match.
    pub fn matches_labels(&self, requested: &[String]) -> bool {
        if requested.is_empty() {
            return false;
        }

        requested
            .iter()
            .all(|label| self.allowed_labels.iter().any(|allowed| allowed == label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(allowed: &[&str]) -> RepoConfig {
        RepoConfig {
            id: 1,
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            installation_id: Some(42),
            max_runners: 2,
            allowed_labels: allowed.iter().map(|s| s.to_string()).collect(),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_full_name() {
        assert_eq!(repo(&[]).full_name(), "acme/widgets");
    }

    #[test]
    fn test_matches_when_all_labels_allowed() {
        let repo = repo(&["self-hosted", "blazeci-small"]);
        let requested = vec!["self-hosted".to_string(), "blazeci-small".to_string()];
        assert!(repo.matches_labels(&requested));
    }

    #[test]
    fn test_rejects_unknown_label() {
        let repo = repo(&["self-hosted", "blazeci-small"]);
        let requested = vec!["self-hosted".to_string(), "gpu".to_string()];
        assert!(!repo.matches_labels(&requested));
    }

    #[test]
    fn test_rejects_empty_label_set() {
        let repo = repo(&["self-hosted"]);
        assert!(!repo.matches_labels(&[]));
    }
}
