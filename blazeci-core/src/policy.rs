//! Capacity policy
//!
//! Maps (demand, live runner count, configured maximum) to a scaling
//! decision. Pure: no clock, no I/O, no side effects, so every boundary
//! case is unit-testable with a tuple of inputs.
//!
//! Idle-only eligibility for scale-down is enforced by the reconciler when
//! it selects victims; the policy only decides how many runners the
//! repository should shed.

use crate::domain::demand::DemandCounter;

/// Scaling decision for one repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Provision this many new runners
    ScaleUp(u32),

    /// Drain up to this many idle runners
    ScaleDown(u32),

    /// Capacity matches demand
    Hold,
}

/// Computes the scaling decision for a repository
///
/// desired = min(queued + in_progress, max_runners); the decision is the
/// difference between desired and the current live count. Demand above
/// `max_runners` is silently capped; that is a policy boundary, not an
/// error.
pub fn decide(demand: &DemandCounter, live_runners: u32, max_runners: u32) -> ScaleDecision {
    let desired = demand.total().min(max_runners);

    if desired > live_runners {
        ScaleDecision::ScaleUp(desired - live_runners)
    } else if desired < live_runners {
        ScaleDecision::ScaleDown(live_runners - desired)
    } else {
        ScaleDecision::Hold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demand(queued: u32, in_progress: u32) -> DemandCounter {
        DemandCounter {
            queued_jobs: queued,
            in_progress_jobs: in_progress,
            last_event_at: None,
        }
    }

    #[test]
    fn test_scale_up_is_capped_at_max() {
        // demand=5, live=2, max=3 -> one more runner, not three
        assert_eq!(decide(&demand(5, 0), 2, 3), ScaleDecision::ScaleUp(1));
    }

    #[test]
    fn test_scale_down_when_demand_drops() {
        // demand=1, live=3, max=5 -> shed two runners
        assert_eq!(decide(&demand(1, 0), 3, 5), ScaleDecision::ScaleDown(2));
    }

    #[test]
    fn test_hold_at_equilibrium() {
        assert_eq!(decide(&demand(1, 1), 2, 5), ScaleDecision::Hold);
    }

    #[test]
    fn test_hold_when_saturated_above_max() {
        // Demand beyond the cap never provisions past max_runners
        assert_eq!(decide(&demand(10, 0), 3, 3), ScaleDecision::Hold);
    }

    #[test]
    fn test_zero_demand_drains_everything() {
        assert_eq!(decide(&demand(0, 0), 2, 5), ScaleDecision::ScaleDown(2));
    }

    #[test]
    fn test_in_progress_jobs_hold_capacity() {
        // A runner mid-job is still demanded even with nothing queued
        assert_eq!(decide(&demand(0, 2), 2, 5), ScaleDecision::Hold);
    }

    #[test]
    fn test_no_scale_up_from_zero_demand_and_zero_runners() {
        assert_eq!(decide(&demand(0, 0), 0, 5), ScaleDecision::Hold);
    }
}
