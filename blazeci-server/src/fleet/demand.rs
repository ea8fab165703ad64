//! Demand tracking for one repository
//!
//! Wraps the domain [`DemandCounter`] with label filtering and anomaly
//! bookkeeping. Lives inside the repository's worker, so all mutation is
//! serialized by construction.

use blazeci_core::domain::demand::{DemandAnomaly, DemandCounter};
use blazeci_core::domain::event::JobEvent;
use blazeci_core::domain::repo::RepoConfig;

/// Outcome of applying one job event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Counters updated cleanly
    Applied,

    /// Counters updated but a clamp fired; a resync is warranted
    AppliedWithAnomaly(DemandAnomaly),

    /// The job's labels are not served by this repository
    Skipped,
}

/// Per-repository demand tracker
#[derive(Debug, Default)]
pub struct DemandTracker {
    counter: DemandCounter,

    /// Run that produced the most recent anomaly, for the resync probe
    anomaly_run_id: Option<i64>,
}

impl DemandTracker {
    /// Applies a job event if its labels match the repository
    pub fn apply(&mut self, repo: Option<&RepoConfig>, event: &JobEvent) -> ApplyOutcome {
        // Before the first successful config load we count everything;
        // the policy never acts without a config, so overcounting is safe.
        if let Some(repo) = repo {
            if !repo.matches_labels(&event.labels) {
                tracing::debug!(
                    "Skipping job {} for {}: labels {:?} not served",
                    event.job_id,
                    event.repo.full_name(),
                    event.labels
                );
                return ApplyOutcome::Skipped;
            }
        }

        match self.counter.apply(event.action, event.occurred_at) {
            None => ApplyOutcome::Applied,
            Some(anomaly) => {
                tracing::warn!(
                    "Demand anomaly for {}: {} (job {}, action {})",
                    event.repo.full_name(),
                    anomaly,
                    event.job_id,
                    event.action
                );
                self.anomaly_run_id = Some(event.run_id);
                ApplyOutcome::AppliedWithAnomaly(anomaly)
            }
        }
    }

    /// Current counters, side-effect free
    pub fn snapshot(&self) -> &DemandCounter {
        &self.counter
    }

    /// Takes the run id of the most recent anomaly, if one is pending
    pub fn take_anomaly_run(&mut self) -> Option<i64> {
        self.anomaly_run_id.take()
    }

    /// Overwrites the counters with authoritative numbers from GitHub
    pub fn resync(&mut self, queued: u32, in_progress: u32) {
        tracing::info!(
            "Demand resync: queued {} -> {}, in_progress {} -> {}",
            self.counter.queued_jobs,
            queued,
            self.counter.in_progress_jobs,
            in_progress
        );
        self.counter.queued_jobs = queued;
        self.counter.in_progress_jobs = in_progress;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blazeci_core::domain::event::{JobAction, RepoRef};
    use chrono::Utc;

    fn repo() -> RepoConfig {
        RepoConfig {
            id: 77,
            owner: "acme".to_string(),
            name: "widgets".to_string(),
            installation_id: Some(42),
            max_runners: 2,
            allowed_labels: vec!["self-hosted".to_string(), "blazeci-small".to_string()],
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn job_event(action: JobAction, labels: &[&str]) -> JobEvent {
        JobEvent {
            repo: RepoRef {
                id: 77,
                owner: "acme".to_string(),
                name: "widgets".to_string(),
            },
            job_id: 118,
            run_id: 9001,
            action,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            runner_name: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_matching_job_is_counted() {
        let repo = repo();
        let mut tracker = DemandTracker::default();

        let outcome = tracker.apply(Some(&repo), &job_event(JobAction::Queued, &["self-hosted"]));
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(tracker.snapshot().queued_jobs, 1);
    }

    #[test]
    fn test_foreign_labels_are_skipped() {
        let repo = repo();
        let mut tracker = DemandTracker::default();

        let outcome = tracker.apply(Some(&repo), &job_event(JobAction::Queued, &["gpu-large"]));
        assert_eq!(outcome, ApplyOutcome::Skipped);
        assert_eq!(tracker.snapshot().total(), 0);
    }

    #[test]
    fn test_anomaly_records_run_for_resync() {
        let repo = repo();
        let mut tracker = DemandTracker::default();

        // completed with nothing in progress clamps and flags the run
        let outcome = tracker.apply(
            Some(&repo),
            &job_event(JobAction::Completed, &["self-hosted"]),
        );
        assert!(matches!(outcome, ApplyOutcome::AppliedWithAnomaly(_)));
        assert_eq!(tracker.take_anomaly_run(), Some(9001));
        assert_eq!(tracker.take_anomaly_run(), None);
    }

    #[test]
    fn test_resync_overwrites_counters() {
        let mut tracker = DemandTracker::default();
        tracker.resync(3, 1);

        assert_eq!(tracker.snapshot().queued_jobs, 3);
        assert_eq!(tracker.snapshot().in_progress_jobs, 1);
    }
}
