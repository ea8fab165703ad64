//! Normalized webhook events
//!
//! GitHub delivers webhooks as loosely-typed JSON with string event names.
//! The normalizer converts them into this sum type so the rest of the
//! system can match exhaustively and the compiler keeps event handling
//! total.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimal repository identity carried on events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    /// GitHub's numeric repository id
    pub id: i64,
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Lifecycle phase of a workflow job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobAction {
    Queued,
    InProgress,
    Completed,
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobAction::Queued => write!(f, "queued"),
            JobAction::InProgress => write!(f, "in_progress"),
            JobAction::Completed => write!(f, "completed"),
        }
    }
}

/// A `workflow_job` event reduced to the fields the fleet cares about
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub repo: RepoRef,

    /// GitHub's workflow job id
    pub job_id: i64,

    /// Workflow run the job belongs to
    pub run_id: i64,

    pub action: JobAction,

    /// Labels the job requests (e.g. `["self-hosted", "blazeci-small"]`)
    pub labels: Vec<String>,

    /// Runner name GitHub assigned the job to, when known
    pub runner_name: Option<String>,

    pub occurred_at: DateTime<Utc>,
}

/// GitHub App installation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallationAction {
    Created,
    Deleted,
}

/// An `installation` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationEvent {
    pub action: InstallationAction,
    pub installation_id: i64,
    pub account_login: String,
    pub account_type: String,
}

/// A webhook delivery after normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WebhookEvent {
    /// Job-level demand signal; the only variant that mutates counters
    Job(JobEvent),

    /// Coarse activity signal (`check_run`, `workflow_run`) that nudges a
    /// reconciliation pass without touching demand
    Hint { repo: RepoRef },

    /// App installation created or removed
    Installation(InstallationEvent),

    /// Recognized but irrelevant, or a replayed delivery
    Discard { reason: String },
}
