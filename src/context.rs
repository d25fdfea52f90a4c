//! Run-level control state: timepoint index, abort flag, progression policy.

use crate::config::ProgressionPolicy;
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

struct Inner {
    current_timepoint: u32,
    total_timepoints: u32,
    aborted: bool,
}

/// Tracks where a run is in its timepoint sequence and whether it has been
/// asked to stop. Holds no references to the state machine, runner, or
/// store it coordinates with; those are wired together by the worker.
pub struct AcquisitionContext {
    inner: Mutex<Inner>,
    progression_policy: ProgressionPolicy,
    /// Unique identifier for this run, stamped into log lines so a single
    /// run's events can be correlated across the worker and job runner.
    run_id: Uuid,
}

impl AcquisitionContext {
    /// Construct a new context for a run of `total_timepoints` timepoints.
    pub fn new(total_timepoints: u32, progression_policy: ProgressionPolicy) -> Self {
        assert!(total_timepoints >= 1, "a run must have at least one timepoint");
        let run_id = Uuid::new_v4();
        info!(%run_id, total_timepoints, "acquisition run starting");
        Self {
            inner: Mutex::new(Inner {
                current_timepoint: 0,
                total_timepoints,
                aborted: false,
            }),
            progression_policy,
            run_id,
        }
    }

    /// Unique identifier for this run.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Index of the timepoint currently in progress.
    pub fn current_timepoint(&self) -> u32 {
        self.inner.lock().current_timepoint
    }

    /// Total number of timepoints planned for this run.
    pub fn total_timepoints(&self) -> u32 {
        self.inner.lock().total_timepoints
    }

    /// Advance to the next timepoint.
    pub fn advance(&self) {
        let mut inner = self.inner.lock();
        inner.current_timepoint += 1;
        info!(timepoint = inner.current_timepoint, "advanced to next timepoint");
    }

    /// Request that the run stop as soon as it safely can.
    pub fn request_abort(&self) {
        let mut inner = self.inner.lock();
        if !inner.aborted {
            info!("run abort requested");
        }
        inner.aborted = true;
    }

    /// Whether the run has been asked to stop.
    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }

    /// Whether the run loop should keep going: not aborted and timepoints remain.
    pub fn should_continue(&self) -> bool {
        let inner = self.inner.lock();
        !inner.aborted && inner.current_timepoint < inner.total_timepoints
    }

    /// The configured progression policy for this run.
    pub fn progression_policy(&self) -> ProgressionPolicy {
        self.progression_policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_and_terminates() {
        let ctx = AcquisitionContext::new(2, ProgressionPolicy::Auto);
        assert!(ctx.should_continue());
        ctx.advance();
        assert_eq!(ctx.current_timepoint(), 1);
        assert!(ctx.should_continue());
        ctx.advance();
        assert_eq!(ctx.current_timepoint(), 2);
        assert!(!ctx.should_continue());
    }

    #[test]
    fn abort_stops_the_loop_immediately() {
        let ctx = AcquisitionContext::new(5, ProgressionPolicy::Auto);
        ctx.request_abort();
        assert!(ctx.is_aborted());
        assert!(!ctx.should_continue());
    }

    #[test]
    #[should_panic]
    fn zero_timepoints_rejected() {
        AcquisitionContext::new(0, ProgressionPolicy::Auto);
    }
}
