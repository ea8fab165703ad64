//! Demand resync probe
//!
//! When the demand counters clamp (a decrement would have gone negative)
//! the webhook stream and our counters have drifted. The probe asks GitHub
//! for the authoritative job list of the run that triggered the anomaly so
//! the worker can resynchronize.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use blazeci_core::domain::repo::RepoConfig;
use blazeci_github::{AppAuth, GitHubClient};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("demand probe unavailable: {0}")]
    Unavailable(String),
}

/// Source of authoritative job counts for a workflow run
#[async_trait]
pub trait DemandProbe: Send + Sync {
    /// Returns (queued, in_progress) counts for the run's jobs
    async fn run_job_counts(
        &self,
        repo: &RepoConfig,
        run_id: i64,
    ) -> Result<(u32, u32), ProbeError>;
}

/// Probe backed by the GitHub REST API
pub struct GitHubDemandProbe {
    client: Arc<GitHubClient>,
    auth: Arc<AppAuth>,
}

impl GitHubDemandProbe {
    pub fn new(client: Arc<GitHubClient>, auth: Arc<AppAuth>) -> Self {
        Self { client, auth }
    }
}

#[async_trait]
impl DemandProbe for GitHubDemandProbe {
    async fn run_job_counts(
        &self,
        repo: &RepoConfig,
        run_id: i64,
    ) -> Result<(u32, u32), ProbeError> {
        let Some(installation_id) = repo.installation_id else {
            return Err(ProbeError::Unavailable(format!(
                "repo {} has no App installation",
                repo.full_name()
            )));
        };

        let token = self
            .auth
            .installation_token(&self.client, installation_id)
            .await
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        let jobs = self
            .client
            .list_run_jobs(&token, &repo.owner, &repo.name, run_id)
            .await
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        // Only jobs destined for this fleet count toward demand
        let mut queued = 0;
        let mut in_progress = 0;
        for job in jobs {
            if !repo.matches_labels(&job.labels) {
                continue;
            }
            match job.status.as_str() {
                "queued" => queued += 1,
                "in_progress" => in_progress += 1,
                _ => {}
            }
        }

        Ok((queued, in_progress))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Probe fake returning a scripted count
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub counts: Mutex<Option<(u32, u32)>>,
        pub calls: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl DemandProbe for FakeProbe {
        async fn run_job_counts(
            &self,
            _repo: &RepoConfig,
            run_id: i64,
        ) -> Result<(u32, u32), ProbeError> {
            self.calls.lock().unwrap().push(run_id);
            self.counts
                .lock()
                .unwrap()
                .ok_or_else(|| ProbeError::Unavailable("no scripted counts".to_string()))
        }
    }
}
