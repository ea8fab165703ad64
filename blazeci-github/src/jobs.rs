//! Workflow job endpoints

use serde::Deserialize;

use crate::GitHubClient;
use crate::error::Result;

/// A workflow job reduced to scheduling-relevant fields
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowJobBrief {
    pub id: i64,
    pub status: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RunJobsResponse {
    jobs: Vec<WorkflowJobBrief>,
}

impl GitHubClient {
    /// Lists the jobs of a workflow run
    ///
    /// Used to resync demand counters against GitHub's view when the
    /// webhook stream looks inconsistent.
    pub async fn list_run_jobs(
        &self,
        token: &str,
        owner: &str,
        repo: &str,
        run_id: i64,
    ) -> Result<Vec<WorkflowJobBrief>> {
        let path = format!("/repos/{owner}/{repo}/actions/runs/{run_id}/jobs");
        let response = self.request(reqwest::Method::GET, &path, token).send().await?;

        let body: RunJobsResponse = self.handle_response(response).await?;
        Ok(body.jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_brief_deserializes_without_labels() {
        let job: WorkflowJobBrief =
            serde_json::from_str(r#"{"id": 5, "status": "queued"}"#).unwrap();
        assert_eq!(job.id, 5);
        assert_eq!(job.status, "queued");
        assert!(job.labels.is_empty());
    }
}
