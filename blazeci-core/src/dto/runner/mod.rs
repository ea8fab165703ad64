//! Runner DTOs
//!
//! Wire shapes for runner records and the per-repository fleet snapshot
//! published after each reconciliation pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::runner::{RunnerRecord, RunnerState};

/// Runner record as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRecordDto {
    pub id: Uuid,
    pub repo_id: i64,
    pub state: RunnerState,
    pub task_handle: Option<String>,
    pub labels: Vec<String>,
    pub active_job: Option<i64>,
    pub launch_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_observed_at: Option<DateTime<Utc>>,
}

impl From<RunnerRecord> for RunnerRecordDto {
    fn from(record: RunnerRecord) -> Self {
        Self {
            id: record.id,
            repo_id: record.repo_id,
            state: record.state,
            task_handle: record.task_handle,
            labels: record.labels,
            active_job: record.active_job,
            launch_attempts: record.launch_attempts,
            created_at: record.created_at,
            last_observed_at: record.last_observed_at,
        }
    }
}

/// Point-in-time view of one repository's fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub repo_id: i64,
    pub queued_jobs: u32,
    pub in_progress_jobs: u32,
    pub live_runners: u32,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_record_dto_conversion() {
        let record = RunnerRecord::new(9, vec!["self-hosted".to_string()]);

        let dto: RunnerRecordDto = record.clone().into();
        assert_eq!(dto.id, record.id);
        assert_eq!(dto.repo_id, 9);
        assert_eq!(dto.state, RunnerState::Provisioning);
        assert!(dto.task_handle.is_none());
    }
}
