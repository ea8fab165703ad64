//! Task backend capability
//!
//! The fleet provisions runners as tasks on some compute backend. The
//! backend is a capability interface so the reconciliation core can be
//! exercised against an in-memory fake; the production implementation
//! lives in [`crate::fleet::docker`].

use async_trait::async_trait;
use thiserror::Error;

/// Observed state of a backend task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Launched but not running yet
    Starting,

    /// Up and running
    Running,

    /// Ran and exited
    Exited,

    /// The backend has no record of this task
    NotFound,
}

/// Backend call failure, split by whether a retry can help
#[derive(Debug, Error)]
pub enum BackendError {
    /// Temporary failure; retry with backoff
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// The backend rejected the request; retrying is pointless
    #[error("backend rejected the request: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Everything a backend needs to launch one ephemeral runner task
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub repo_id: i64,
    pub owner: String,
    pub repo: String,
    pub installation_id: Option<i64>,

    /// Name the runner registers with on GitHub; also the task name
    pub runner_name: String,

    pub labels: Vec<String>,

    /// Human-readable cause, recorded on the task for debugging
    pub trigger: String,
}

/// Compute backend running ephemeral runner tasks
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Launches a runner task and returns its opaque handle
    async fn launch(&self, spec: &LaunchSpec) -> Result<String, BackendError>;

    /// Reports the current status of a task
    async fn status(&self, handle: &str) -> Result<TaskStatus, BackendError>;

    /// Stops and reaps a task; missing tasks are success, not an error
    async fn terminate(&self, handle: &str) -> Result<(), BackendError>;
}
