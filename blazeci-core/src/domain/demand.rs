//! Runner demand tracking
//!
//! Per-repository counters of workflow jobs awaiting or holding a runner,
//! derived from the normalized webhook event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event::JobAction;

/// Per-repository demand counters
///
/// Counters are unsigned by construction; decrements past zero are clamped
/// and reported as an anomaly rather than applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemandCounter {
    /// Jobs queued and waiting for a runner
    pub queued_jobs: u32,

    /// Jobs currently executing on a runner
    pub in_progress_jobs: u32,

    /// Timestamp of the last event applied
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Clamp applied where a decrement would have gone negative
///
/// Signals drift between the webhook stream and our counters, usually from
/// a missed or out-of-order delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemandAnomaly {
    /// An in_progress event arrived with no queued job to move
    QueuedUnderflow,

    /// A completed event arrived with no in-progress job to close
    InProgressUnderflow,
}

impl std::fmt::Display for DemandAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DemandAnomaly::QueuedUnderflow => write!(f, "queued_jobs underflow"),
            DemandAnomaly::InProgressUnderflow => write!(f, "in_progress_jobs underflow"),
        }
    }
}

impl DemandCounter {
    /// Total jobs that want runner capacity
    pub fn total(&self) -> u32 {
        self.queued_jobs + self.in_progress_jobs
    }

    /// Applies one job action to the counters
    ///
    /// Returns the anomaly if a clamp was necessary.
    pub fn apply(&mut self, action: JobAction, at: DateTime<Utc>) -> Option<DemandAnomaly> {
        self.last_event_at = Some(at);

        match action {
            JobAction::Queued => {
                self.queued_jobs += 1;
                None
            }
            JobAction::InProgress => {
                self.in_progress_jobs += 1;
                if self.queued_jobs == 0 {
                    Some(DemandAnomaly::QueuedUnderflow)
                } else {
                    self.queued_jobs -= 1;
                    None
                }
            }
            JobAction::Completed => {
                if self.in_progress_jobs == 0 {
                    Some(DemandAnomaly::InProgressUnderflow)
                } else {
                    self.in_progress_jobs -= 1;
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(counter: &mut DemandCounter, action: JobAction) -> Option<DemandAnomaly> {
        counter.apply(action, Utc::now())
    }

    #[test]
    fn test_queued_then_in_progress_then_completed() {
        let mut counter = DemandCounter::default();

        assert_eq!(apply(&mut counter, JobAction::Queued), None);
        assert_eq!(counter.queued_jobs, 1);
        assert_eq!(counter.total(), 1);

        assert_eq!(apply(&mut counter, JobAction::InProgress), None);
        assert_eq!(counter.queued_jobs, 0);
        assert_eq!(counter.in_progress_jobs, 1);
        assert_eq!(counter.total(), 1);

        assert_eq!(apply(&mut counter, JobAction::Completed), None);
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn test_in_progress_without_queued_is_clamped() {
        let mut counter = DemandCounter::default();

        let anomaly = apply(&mut counter, JobAction::InProgress);
        assert_eq!(anomaly, Some(DemandAnomaly::QueuedUnderflow));
        assert_eq!(counter.queued_jobs, 0);
        assert_eq!(counter.in_progress_jobs, 1);
    }

    #[test]
    fn test_completed_without_in_progress_is_clamped() {
        let mut counter = DemandCounter::default();

        let anomaly = apply(&mut counter, JobAction::Completed);
        assert_eq!(anomaly, Some(DemandAnomaly::InProgressUnderflow));
        assert_eq!(counter.in_progress_jobs, 0);
    }

    #[test]
    fn test_counters_never_negative_under_arbitrary_sequences() {
        // Exercise a hostile out-of-order sequence; the counters are u32 so
        // any underflow would panic in debug builds.
        let sequence = [
            JobAction::Completed,
            JobAction::InProgress,
            JobAction::Completed,
            JobAction::Completed,
            JobAction::Queued,
            JobAction::InProgress,
            JobAction::InProgress,
            JobAction::Queued,
            JobAction::Completed,
        ];

        let mut counter = DemandCounter::default();
        for action in sequence {
            apply(&mut counter, action);
        }

        assert!(counter.total() < 10);
    }
}
