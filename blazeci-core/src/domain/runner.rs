//! Runner record domain model
//!
//! Represents one ephemeral runner and its lifecycle state. A record maps
//! 1:1 onto a compute task in the backing cloud; the `task_handle` is the
//! opaque identifier of that task and is set at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a runner record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerState {
    /// Launch requested; the backing task has not been seen running yet
    Provisioning,

    /// The backing task is up and the runner is serving jobs
    Active,

    /// Termination issued; waiting for the task to exit
    Draining,

    /// The backing task exited and the record is closed
    Terminated,

    /// Provisioning gave up (launch rejected or attempt budget exhausted)
    Failed,

    /// The backing task disappeared without an observed exit
    Orphaned,
}

impl RunnerState {
    /// States that occupy capacity for the capacity policy
    pub fn is_live(self) -> bool {
        matches!(
            self,
            RunnerState::Provisioning | RunnerState::Active | RunnerState::Draining
        )
    }

    /// States the reconciler never leaves
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunnerState::Terminated | RunnerState::Failed | RunnerState::Orphaned
        )
    }

    /// Checks whether a transition is part of the lifecycle state machine
    pub fn can_transition(self, to: RunnerState) -> bool {
        use RunnerState::*;
        matches!(
            (self, to),
            (Provisioning, Active)
                | (Provisioning, Draining)
                | (Provisioning, Failed)
                | (Provisioning, Orphaned)
                | (Active, Draining)
                | (Active, Terminated)
                | (Active, Failed)
                | (Active, Orphaned)
                | (Draining, Terminated)
                | (Draining, Failed)
                | (Failed, Terminated)
        )
    }
}

impl std::fmt::Display for RunnerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerState::Provisioning => write!(f, "Provisioning"),
            RunnerState::Active => write!(f, "Active"),
            RunnerState::Draining => write!(f, "Draining"),
            RunnerState::Terminated => write!(f, "Terminated"),
            RunnerState::Failed => write!(f, "Failed"),
            RunnerState::Orphaned => write!(f, "Orphaned"),
        }
    }
}

/// One ephemeral runner and its backing task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRecord {
    /// Unique identifier, also used to derive the runner's GitHub name
    pub id: Uuid,

    /// Repository this runner serves
    pub repo_id: i64,

    /// Current lifecycle state
    pub state: RunnerState,

    /// Opaque identifier of the backing task; set at most once
    pub task_handle: Option<String>,

    /// Labels the runner registers with
    pub labels: Vec<String>,

    /// Workflow job the runner is currently executing, if any
    pub active_job: Option<i64>,

    /// Number of launch attempts made so far
    pub launch_attempts: u32,

    /// Earliest time the next launch attempt may run
    pub next_retry_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub last_observed_at: Option<DateTime<Utc>>,
}

impl RunnerRecord {
    /// Creates a fresh Provisioning record for a repository
    pub fn new(repo_id: i64, labels: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            repo_id,
            state: RunnerState::Provisioning,
            task_handle: None,
            labels,
            active_job: None,
            launch_attempts: 0,
            next_retry_at: None,
            created_at: Utc::now(),
            last_observed_at: None,
        }
    }

    /// Name the runner registers with on GitHub
    pub fn runner_name(&self) -> String {
        format!("blazeci-{}", self.id.simple())
    }

    /// Attaches the backing task handle
    ///
    /// Returns false if a handle was already attached; the existing handle
    /// is never overwritten.
    pub fn attach_handle(&mut self, handle: String) -> bool {
        if self.task_handle.is_some() {
            return false;
        }
        self.task_handle = Some(handle);
        true
    }

    /// True when this runner is eligible for scale-down selection
    pub fn is_idle(&self) -> bool {
        self.state == RunnerState::Active && self.active_job.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_and_terminal_partition() {
        let all = [
            RunnerState::Provisioning,
            RunnerState::Active,
            RunnerState::Draining,
            RunnerState::Terminated,
            RunnerState::Failed,
            RunnerState::Orphaned,
        ];
        for state in all {
            assert_ne!(state.is_live(), state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn test_lifecycle_transitions() {
        assert!(RunnerState::Provisioning.can_transition(RunnerState::Active));
        assert!(RunnerState::Active.can_transition(RunnerState::Draining));
        assert!(RunnerState::Draining.can_transition(RunnerState::Terminated));
        assert!(RunnerState::Active.can_transition(RunnerState::Orphaned));

        // No resurrection from terminal states
        assert!(!RunnerState::Terminated.can_transition(RunnerState::Active));
        assert!(!RunnerState::Orphaned.can_transition(RunnerState::Provisioning));
        // Draining never goes back
        assert!(!RunnerState::Draining.can_transition(RunnerState::Active));
    }

    #[test]
    fn test_handle_attaches_at_most_once() {
        let mut record = RunnerRecord::new(1, vec!["self-hosted".to_string()]);
        assert!(record.attach_handle("task-a".to_string()));
        assert!(!record.attach_handle("task-b".to_string()));
        assert_eq!(record.task_handle.as_deref(), Some("task-a"));
    }

    #[test]
    fn test_idle_requires_active_without_job() {
        let mut record = RunnerRecord::new(1, vec![]);
        assert!(!record.is_idle());

        record.state = RunnerState::Active;
        assert!(record.is_idle());

        record.active_job = Some(99);
        assert!(!record.is_idle());
    }
}
