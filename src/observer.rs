//! Best-effort event stream for external observers (UI, logging sinks).

use crate::metrics::PolicyDecision;
use crate::state_machine::TimepointState;
use crate::types::{FovId, FovMetrics};
use crossbeam_channel::{Receiver, Sender};

/// An event emitted by the worker, state machine, or metrics store as a
/// run progresses. Delivery is best-effort: a slow or dropped observer
/// never blocks the emitter.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    /// The timepoint state machine transitioned.
    StateChanged {
        /// State before the transition.
        old: TimepointState,
        /// State after the transition.
        new: TimepointState,
    },
    /// A pause was requested but not yet applied.
    PauseRequested,
    /// The timepoint entered `Paused`.
    Paused,
    /// The timepoint resumed out of `Paused`.
    Resumed,
    /// A retake began for the given FOVs.
    RetakeStarted {
        /// FOVs queued for retake, in execution order.
        fovs: Vec<FovId>,
    },
    /// One FOV's retake completed.
    RetakeFovComplete {
        /// The FOV that was retaken.
        fov_id: FovId,
    },
    /// All queued retakes completed.
    RetakesComplete,
    /// One FOV's capture completed (hardware trigger and job dispatch done).
    FovCaptured {
        /// The FOV that was captured.
        fov_id: FovId,
    },
    /// All planned FOVs for a timepoint were captured.
    TimepointCaptured {
        /// Index of the timepoint that completed.
        timepoint: u32,
    },
    /// New QC metrics became available for one FOV.
    MetricsUpdated {
        /// The new metrics record.
        metrics: FovMetrics,
    },
    /// The QC policy evaluated a decision for a timepoint.
    PolicyDecided {
        /// Index of the timepoint the decision concerns.
        timepoint: u32,
        /// The decision itself.
        decision: PolicyDecision,
    },
    /// The run aborted due to a fatal error (hardware failure or a failed
    /// save job). Emitted once, after in-flight jobs have drained and the
    /// current timepoint's metrics store has been persisted.
    Aborted {
        /// Index of the timepoint that was in progress when the abort happened.
        timepoint: u32,
        /// Human-readable description of the fatal error.
        reason: String,
    },
}

/// Anything that can receive acquisition events. Implementations must not
/// block the emitter for long; a channel-backed implementation is provided
/// as [`ChannelObserver`].
pub trait Observer: Send + Sync {
    /// Handle one event. Errors are not propagated; an observer that fails
    /// to record an event should log internally and return.
    fn notify(&self, event: AcquisitionEvent);
}

/// An [`Observer`] that forwards every event onto an unbounded
/// `crossbeam_channel`, so tests and UIs can assert on exact event
/// sequences instead of only final state.
pub struct ChannelObserver {
    sender: Sender<AcquisitionEvent>,
}

impl ChannelObserver {
    /// Construct a paired observer and receiver.
    pub fn new() -> (Self, Receiver<AcquisitionEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { sender: tx }, rx)
    }
}

impl Observer for ChannelObserver {
    fn notify(&self, event: AcquisitionEvent) {
        // best-effort: a disconnected receiver just means nobody is listening.
        let _ = self.sender.send(event);
    }
}

/// An [`Observer`] that discards every event. Useful as a default when no
/// observer is configured.
pub struct NullObserver;

impl Observer for NullObserver {
    fn notify(&self, _event: AcquisitionEvent) {}
}
