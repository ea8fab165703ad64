//! Notification egress
//!
//! State transitions and anomalies are surfaced through this seam for
//! external logging/alerting collaborators. The default sink emits
//! structured tracing events.

use blazeci_core::domain::runner::{RunnerRecord, RunnerState};

/// Observer of fleet state changes
pub trait Notifier: Send + Sync {
    /// A runner record changed state
    fn runner_transition(
        &self,
        record: &RunnerRecord,
        from: RunnerState,
        to: RunnerState,
        reason: &str,
    );

    /// Something drifted: counter clamps, failed holds, backend rejections
    fn anomaly(&self, repo_id: i64, message: &str);
}

/// Notifier that writes structured tracing events
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn runner_transition(
        &self,
        record: &RunnerRecord,
        from: RunnerState,
        to: RunnerState,
        reason: &str,
    ) {
        match to {
            RunnerState::Failed | RunnerState::Orphaned => {
                tracing::warn!(
                    "Runner {} ({} -> {}): {}",
                    record.runner_name(),
                    from,
                    to,
                    reason
                );
            }
            _ => {
                tracing::info!(
                    "Runner {} ({} -> {}): {}",
                    record.runner_name(),
                    from,
                    to,
                    reason
                );
            }
        }
    }

    fn anomaly(&self, repo_id: i64, message: &str) {
        tracing::warn!("Fleet anomaly for repo {}: {}", repo_id, message);
    }
}
