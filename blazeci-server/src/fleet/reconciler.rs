//! Runner lifecycle reconciler
//!
//! Owns the authoritative record set for one repository and drives every
//! record through the lifecycle state machine:
//!
//! ```text
//! Provisioning -> Active -> Draining -> Terminated
//!       |            |
//!       +-> Failed   +-> Orphaned (task gone without an observed exit)
//! ```
//!
//! The reconciler is deliberately synchronous and I/O free: it consumes
//! observations and returns transitions, while the worker around it talks
//! to the backend and the store. That keeps every transition unit-testable
//! with plain inputs.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

use blazeci_core::domain::event::{JobAction, JobEvent};
use blazeci_core::domain::runner::{RunnerRecord, RunnerState};

use crate::fleet::backend::TaskStatus;

/// Tunables for the per-record lifecycle
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// How long a record may sit in Provisioning before it fails
    pub provision_timeout: Duration,

    /// Launch attempts before a record is marked permanently Failed
    pub max_launch_attempts: u32,

    /// First retry delay after a transient launch failure
    pub launch_retry_base: Duration,

    /// Upper bound on the launch retry delay
    pub launch_retry_cap: Duration,
}

/// One state change, for notification and persistence
#[derive(Debug, Clone)]
pub struct Transition {
    pub runner_id: Uuid,
    pub from: RunnerState,
    pub to: RunnerState,
    pub reason: String,
}

/// Per-repository reconciler
pub struct Reconciler {
    repo_id: i64,
    settings: ReconcilerSettings,
    records: HashMap<Uuid, RunnerRecord>,
    dirty: HashSet<Uuid>,
}

impl Reconciler {
    pub fn new(repo_id: i64, settings: ReconcilerSettings) -> Self {
        Self {
            repo_id,
            settings,
            records: HashMap::new(),
            dirty: HashSet::new(),
        }
    }

    /// Seeds the registry from persisted records (startup / recovery)
    pub fn load(&mut self, records: Vec<RunnerRecord>) {
        for record in records {
            if record.state.is_terminal() {
                continue;
            }
            self.records.insert(record.id, record);
        }
    }

    pub fn record(&self, id: Uuid) -> Option<&RunnerRecord> {
        self.records.get(&id)
    }

    pub fn records(&self) -> impl Iterator<Item = &RunnerRecord> {
        self.records.values()
    }

    /// Handles of every non-terminal record with a backing task
    pub fn handles(&self) -> Vec<String> {
        self.records
            .values()
            .filter(|r| !r.state.is_terminal())
            .filter_map(|r| r.task_handle.clone())
            .collect()
    }

    /// Runners occupying capacity for the policy
    pub fn live_count(&self) -> u32 {
        self.records
            .values()
            .filter(|r| r.state.is_live())
            .count() as u32
    }

    /// True while an unacknowledged Failed record exists
    ///
    /// Repeated launch failures usually mean broken credentials or a bad
    /// image; provisioning more runners would fail the same way, so
    /// scale-up is held until an operator acknowledges the failure.
    pub fn has_failed_hold(&self) -> bool {
        self.records
            .values()
            .any(|r| r.state == RunnerState::Failed)
    }

    /// Tracks which runner a job landed on, for idle/busy accounting
    pub fn note_job(&mut self, event: &JobEvent) {
        let Some(runner_name) = &event.runner_name else {
            return;
        };

        let Some(record) = self
            .records
            .values_mut()
            .find(|r| &r.runner_name() == runner_name)
        else {
            return;
        };

        match event.action {
            JobAction::InProgress => {
                record.active_job = Some(event.job_id);
            }
            JobAction::Completed => {
                if record.active_job == Some(event.job_id) || record.active_job.is_none() {
                    record.active_job = None;
                }
            }
            JobAction::Queued => return,
        }

        let id = record.id;
        self.dirty.insert(id);
    }

    /// Applies one pass worth of backend observations
    pub fn observe(
        &mut self,
        statuses: &HashMap<String, TaskStatus>,
        now: DateTime<Utc>,
    ) -> Vec<Transition> {
        let ids: Vec<Uuid> = self.records.keys().copied().collect();
        let mut transitions = Vec::new();

        for id in ids {
            let record = &self.records[&id];
            if record.state.is_terminal() {
                continue;
            }

            let Some(handle) = record.task_handle.clone() else {
                // Draining a record whose launch never completed: nothing
                // to wait for.
                if record.state == RunnerState::Draining {
                    transitions.extend(self.transition(
                        id,
                        RunnerState::Terminated,
                        "no task was launched",
                    ));
                }
                continue;
            };

            let status = statuses
                .get(&handle)
                .copied()
                .unwrap_or(TaskStatus::NotFound);

            let state = self.records[&id].state;
            match (state, status) {
                (RunnerState::Provisioning, TaskStatus::Starting) => self.touch(id, now),
                (RunnerState::Provisioning, TaskStatus::Running) => {
                    self.touch(id, now);
                    transitions.extend(self.transition(id, RunnerState::Active, "task started"));
                }
                (RunnerState::Provisioning, TaskStatus::Exited) => {
                    transitions.extend(self.transition(
                        id,
                        RunnerState::Failed,
                        "task exited before activation",
                    ));
                }
                (RunnerState::Provisioning, TaskStatus::NotFound) => {
                    transitions.extend(self.transition(
                        id,
                        RunnerState::Orphaned,
                        "task disappeared before activation",
                    ));
                }

                (RunnerState::Active, TaskStatus::Starting | TaskStatus::Running) => {
                    self.touch(id, now)
                }
                (RunnerState::Active, TaskStatus::Exited) => {
                    // Ephemeral runners deregister and exit after one job;
                    // an observed exit is the normal end of life.
                    transitions.extend(self.transition(
                        id,
                        RunnerState::Terminated,
                        "task exited",
                    ));
                }
                (RunnerState::Active, TaskStatus::NotFound) => {
                    transitions.extend(self.transition(
                        id,
                        RunnerState::Orphaned,
                        "task disappeared without draining",
                    ));
                }

                (RunnerState::Draining, TaskStatus::Starting | TaskStatus::Running) => {
                    self.touch(id, now)
                }
                (RunnerState::Draining, TaskStatus::Exited | TaskStatus::NotFound) => {
                    transitions.extend(self.transition(
                        id,
                        RunnerState::Terminated,
                        "task exit confirmed",
                    ));
                }

                // Terminal states were filtered above
                (RunnerState::Terminated | RunnerState::Failed | RunnerState::Orphaned, _) => {}
            }
        }

        transitions
    }

    /// Fails Provisioning records that overstayed the confirmation timeout
    pub fn check_provision_timeouts(&mut self, now: DateTime<Utc>) -> Vec<Transition> {
        let timeout = ChronoDuration::from_std(self.settings.provision_timeout)
            .unwrap_or_else(|_| ChronoDuration::seconds(i64::MAX / 1_000));

        let expired: Vec<Uuid> = self
            .records
            .values()
            .filter(|r| r.state == RunnerState::Provisioning && now - r.created_at > timeout)
            .map(|r| r.id)
            .collect();

        let mut transitions = Vec::new();
        for id in expired {
            transitions.extend(self.transition(
                id,
                RunnerState::Failed,
                "provisioning confirmation timed out",
            ));
        }
        transitions
    }

    /// Creates a fresh Provisioning record
    pub fn begin_provision(&mut self, labels: Vec<String>) -> Uuid {
        let record = RunnerRecord::new(self.repo_id, labels);
        let id = record.id;
        self.records.insert(id, record);
        self.dirty.insert(id);
        id
    }

    /// Attaches the backing task handle after a successful launch
    pub fn attach_handle(&mut self, id: Uuid, handle: String) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if !record.attach_handle(handle) {
            tracing::error!(
                "Refusing to overwrite task handle of runner {}",
                record.runner_name()
            );
            return;
        }
        self.dirty.insert(id);
    }

    /// Records a launch failure and schedules a retry or fails the record
    pub fn launch_failed(
        &mut self,
        id: Uuid,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let record = self.records.get_mut(&id)?;
        record.launch_attempts += 1;
        let attempts = record.launch_attempts;
        self.dirty.insert(id);

        if !retryable {
            return self
                .transition(id, RunnerState::Failed, "launch rejected by backend")
                .into_iter()
                .next();
        }

        if attempts >= self.settings.max_launch_attempts {
            return self
                .transition(id, RunnerState::Failed, "launch attempt budget exhausted")
                .into_iter()
                .next();
        }

        let delay = self.launch_backoff(attempts);
        if let Some(record) = self.records.get_mut(&id) {
            record.next_retry_at =
                Some(now + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::seconds(30)));
        }
        None
    }

    /// Exponential backoff for launch attempt n (1-based), capped
    fn launch_backoff(&self, attempts: u32) -> Duration {
        let base = self.settings.launch_retry_base;
        let delay = base.saturating_mul(1u32 << attempts.saturating_sub(1).min(16));
        delay.min(self.settings.launch_retry_cap)
    }

    /// Provisioning records whose launch should run (or retry) now
    pub fn due_launches(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut due: Vec<&RunnerRecord> = self
            .records
            .values()
            .filter(|r| {
                r.state == RunnerState::Provisioning
                    && r.task_handle.is_none()
                    && r.launch_attempts < self.settings.max_launch_attempts
                    && r.next_retry_at.is_none_or(|at| at <= now)
            })
            .collect();
        due.sort_by_key(|r| r.created_at);
        due.iter().map(|r| r.id).collect()
    }

    /// Picks up to `count` idle runners for draining, oldest first
    ///
    /// Only idle runners are ever eligible; a busy runner is never
    /// selected, and if fewer idle runners exist than requested the rest
    /// of the scale-down is deferred.
    pub fn select_idle(&self, count: u32) -> Vec<Uuid> {
        let mut idle: Vec<&RunnerRecord> = self.records.values().filter(|r| r.is_idle()).collect();
        idle.sort_by_key(|r| r.created_at);
        idle.iter().take(count as usize).map(|r| r.id).collect()
    }

    /// Moves a runner to Draining; idempotent
    ///
    /// Draining, terminal, and unknown records are a no-op so operator
    /// retries and duplicate scale-down decisions never double-issue
    /// backend calls.
    pub fn mark_draining(&mut self, id: Uuid, reason: &str) -> Option<Transition> {
        let record = self.records.get(&id)?;
        if !record.state.can_transition(RunnerState::Draining) {
            return None;
        }
        self.transition(id, RunnerState::Draining, reason)
            .into_iter()
            .next()
    }

    /// Fails a record out-of-band (permanent terminate rejection)
    pub fn mark_failed(&mut self, id: Uuid, reason: &str) -> Option<Transition> {
        self.transition(id, RunnerState::Failed, reason)
            .into_iter()
            .next()
    }

    /// Operator acknowledgement of a Failed record
    ///
    /// Closes the record (Failed -> Terminated) which releases the
    /// failed-hold so the policy may provision replacements.
    pub fn acknowledge_failed(&mut self, id: Uuid) -> Option<Transition> {
        let record = self.records.get(&id)?;
        if record.state != RunnerState::Failed {
            return None;
        }
        self.transition(id, RunnerState::Terminated, "failure acknowledged by operator")
            .into_iter()
            .next()
    }

    /// Drops terminal records from the working set, returning their ids
    ///
    /// Terminal records stay in the database for audit; only the in-memory
    /// registry is pruned. Failed records are kept so the failed-hold
    /// stays visible until acknowledged.
    pub fn prune_terminal(&mut self) -> Vec<Uuid> {
        let pruned: Vec<Uuid> = self
            .records
            .values()
            .filter(|r| r.state.is_terminal() && r.state != RunnerState::Failed)
            .map(|r| r.id)
            .collect();
        for id in &pruned {
            self.records.remove(id);
        }
        pruned
    }

    /// Drains the set of records mutated since the last persist
    pub fn take_dirty(&mut self) -> Vec<RunnerRecord> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|id| self.records.get(&id).cloned())
            .collect()
    }

    fn touch(&mut self, id: Uuid, now: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(&id) {
            record.last_observed_at = Some(now);
            self.dirty.insert(id);
        }
    }

    fn transition(&mut self, id: Uuid, to: RunnerState, reason: &str) -> Option<Transition> {
        let record = self.records.get_mut(&id)?;
        let from = record.state;

        if !from.can_transition(to) {
            tracing::error!(
                "Ignoring invalid transition {} -> {} for runner {}",
                from,
                to,
                record.runner_name()
            );
            return None;
        }

        record.state = to;
        if to.is_terminal() || to == RunnerState::Draining {
            record.active_job = None;
        }
        self.dirty.insert(id);

        Some(Transition {
            runner_id: id,
            from,
            to,
            reason: reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blazeci_core::domain::event::RepoRef;

    fn settings() -> ReconcilerSettings {
        ReconcilerSettings {
            provision_timeout: Duration::from_secs(120),
            max_launch_attempts: 3,
            launch_retry_base: Duration::from_secs(1),
            launch_retry_cap: Duration::from_secs(30),
        }
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(77, settings())
    }

    fn statuses(pairs: &[(&str, TaskStatus)]) -> HashMap<String, TaskStatus> {
        pairs
            .iter()
            .map(|(handle, status)| (handle.to_string(), *status))
            .collect()
    }

    /// Provisions a record and walks it to Active on handle `h`
    fn activate(rec: &mut Reconciler, handle: &str) -> Uuid {
        let id = rec.begin_provision(vec!["self-hosted".to_string()]);
        rec.attach_handle(id, handle.to_string());
        let transitions = rec.observe(&statuses(&[(handle, TaskStatus::Running)]), Utc::now());
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, RunnerState::Active);
        id
    }

    #[test]
    fn test_provisioning_activates_on_running() {
        let mut rec = reconciler();
        let id = activate(&mut rec, "task-0");
        assert_eq!(rec.record(id).unwrap().state, RunnerState::Active);
        assert_eq!(rec.live_count(), 1);
    }

    #[test]
    fn test_starting_task_stays_provisioning() {
        let mut rec = reconciler();
        let id = rec.begin_provision(vec![]);
        rec.attach_handle(id, "task-0".to_string());

        let transitions = rec.observe(&statuses(&[("task-0", TaskStatus::Starting)]), Utc::now());
        assert!(transitions.is_empty());
        assert_eq!(rec.record(id).unwrap().state, RunnerState::Provisioning);
        assert!(rec.record(id).unwrap().last_observed_at.is_some());
    }

    #[test]
    fn test_active_task_vanishing_is_orphaned_not_deleted() {
        let mut rec = reconciler();
        let id = activate(&mut rec, "task-0");

        let transitions = rec.observe(&statuses(&[("task-0", TaskStatus::NotFound)]), Utc::now());
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, RunnerState::Orphaned);

        // The record survives for audit but frees its capacity
        assert_eq!(rec.record(id).unwrap().state, RunnerState::Orphaned);
        assert_eq!(rec.live_count(), 0);
    }

    #[test]
    fn test_draining_confirms_to_terminated() {
        let mut rec = reconciler();
        let id = activate(&mut rec, "task-0");

        rec.mark_draining(id, "scale-down").unwrap();
        assert_eq!(rec.live_count(), 1); // still occupies capacity

        let transitions = rec.observe(&statuses(&[("task-0", TaskStatus::Exited)]), Utc::now());
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, RunnerState::Terminated);
        assert_eq!(rec.live_count(), 0);
    }

    #[test]
    fn test_active_clean_exit_terminates() {
        let mut rec = reconciler();
        let id = activate(&mut rec, "task-0");

        let transitions = rec.observe(&statuses(&[("task-0", TaskStatus::Exited)]), Utc::now());
        assert_eq!(transitions[0].to, RunnerState::Terminated);
        assert_eq!(rec.record(id).unwrap().state, RunnerState::Terminated);
    }

    #[test]
    fn test_mark_draining_is_idempotent() {
        let mut rec = reconciler();
        let id = activate(&mut rec, "task-0");

        assert!(rec.mark_draining(id, "scale-down").is_some());
        // Second request is a no-op, not an error
        assert!(rec.mark_draining(id, "scale-down").is_none());

        // And a terminated record is a no-op too
        rec.observe(&statuses(&[("task-0", TaskStatus::Exited)]), Utc::now());
        assert!(rec.mark_draining(id, "scale-down").is_none());
        // Unknown ids as well
        assert!(rec.mark_draining(Uuid::new_v4(), "scale-down").is_none());
    }

    #[test]
    fn test_busy_runner_never_selected_for_drain() {
        let mut rec = reconciler();
        let idle_a = activate(&mut rec, "task-0");
        let idle_b = activate(&mut rec, "task-1");
        let busy = activate(&mut rec, "task-2");

        // Attach a job to the busy runner via its runner name
        let busy_name = rec.record(busy).unwrap().runner_name();
        rec.note_job(&JobEvent {
            repo: RepoRef {
                id: 77,
                owner: "acme".to_string(),
                name: "widgets".to_string(),
            },
            job_id: 5,
            run_id: 9001,
            action: JobAction::InProgress,
            labels: vec![],
            runner_name: Some(busy_name),
            occurred_at: Utc::now(),
        });

        let selected = rec.select_idle(3);
        assert_eq!(selected.len(), 2);
        assert!(selected.contains(&idle_a));
        assert!(selected.contains(&idle_b));
        assert!(!selected.contains(&busy));
    }

    #[test]
    fn test_transient_launch_failures_exhaust_into_failed() {
        let mut rec = reconciler();
        let id = rec.begin_provision(vec![]);
        let now = Utc::now();

        assert!(rec.launch_failed(id, true, now).is_none());
        assert!(rec.record(id).unwrap().next_retry_at.is_some());
        assert!(rec.launch_failed(id, true, now).is_none());

        // Third failure exhausts the budget
        let transition = rec.launch_failed(id, true, now).unwrap();
        assert_eq!(transition.to, RunnerState::Failed);
        assert!(rec.has_failed_hold());
        assert_eq!(rec.live_count(), 0);
    }

    #[test]
    fn test_permanent_launch_failure_fails_immediately() {
        let mut rec = reconciler();
        let id = rec.begin_provision(vec![]);

        let transition = rec.launch_failed(id, false, Utc::now()).unwrap();
        assert_eq!(transition.to, RunnerState::Failed);
    }

    #[test]
    fn test_due_launches_respects_backoff() {
        let mut rec = reconciler();
        let id = rec.begin_provision(vec![]);
        let now = Utc::now();

        assert_eq!(rec.due_launches(now), vec![id]);

        rec.launch_failed(id, true, now);
        // Backoff pushes the retry into the future
        assert!(rec.due_launches(now).is_empty());
        assert_eq!(rec.due_launches(now + ChronoDuration::seconds(2)), vec![id]);
    }

    #[test]
    fn test_provision_timeout_fails_record() {
        let mut rec = reconciler();
        let id = rec.begin_provision(vec![]);
        rec.attach_handle(id, "task-0".to_string());

        let later = Utc::now() + ChronoDuration::seconds(300);
        let transitions = rec.check_provision_timeouts(later);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, RunnerState::Failed);
        assert_eq!(rec.record(id).unwrap().state, RunnerState::Failed);
    }

    #[test]
    fn test_acknowledge_failed_releases_hold() {
        let mut rec = reconciler();
        let id = rec.begin_provision(vec![]);
        rec.launch_failed(id, false, Utc::now());
        assert!(rec.has_failed_hold());

        let transition = rec.acknowledge_failed(id).unwrap();
        assert_eq!(transition.to, RunnerState::Terminated);
        assert!(!rec.has_failed_hold());

        // Only Failed records can be acknowledged
        let other = rec.begin_provision(vec![]);
        assert!(rec.acknowledge_failed(other).is_none());
    }

    #[test]
    fn test_prune_drops_terminated_but_keeps_failed() {
        let mut rec = reconciler();
        let done = activate(&mut rec, "task-0");
        rec.observe(&statuses(&[("task-0", TaskStatus::Exited)]), Utc::now());

        let failed = rec.begin_provision(vec![]);
        rec.launch_failed(failed, false, Utc::now());

        let pruned = rec.prune_terminal();
        assert_eq!(pruned, vec![done]);
        assert!(rec.record(done).is_none());
        assert!(rec.record(failed).is_some());
    }

    #[test]
    fn test_draining_without_handle_terminates() {
        let mut rec = reconciler();
        let id = rec.begin_provision(vec![]);
        rec.mark_draining(id, "operator request").unwrap();

        let transitions = rec.observe(&HashMap::new(), Utc::now());
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, RunnerState::Terminated);
    }

    #[test]
    fn test_load_skips_terminal_records() {
        let mut rec = reconciler();
        let mut terminated = RunnerRecord::new(77, vec![]);
        terminated.state = RunnerState::Terminated;
        let live = RunnerRecord::new(77, vec![]);
        let live_id = live.id;

        rec.load(vec![terminated, live]);
        assert_eq!(rec.live_count(), 1);
        assert!(rec.record(live_id).is_some());
    }

    #[test]
    fn test_take_dirty_drains() {
        let mut rec = reconciler();
        let id = rec.begin_provision(vec![]);

        let dirty = rec.take_dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].id, id);
        assert!(rec.take_dirty().is_empty());
    }
}
