//! Per-timepoint state machine: pause / resume / retake / abort control.

use crate::error::{AcqError, Result};
use crate::types::FovId;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// The four states a timepoint can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimepointState {
    /// Actively capturing FOVs.
    Acquiring,
    /// Suspended; no hardware activity, no job dispatch.
    Paused,
    /// Re-capturing a specific list of FOVs.
    Retaking,
    /// All planned FOVs for this timepoint have been captured.
    Captured,
}

impl TimepointState {
    fn label(self) -> &'static str {
        match self {
            TimepointState::Acquiring => "Acquiring",
            TimepointState::Paused => "Paused",
            TimepointState::Retaking => "Retaking",
            TimepointState::Captured => "Captured",
        }
    }
}

struct Inner {
    state: TimepointState,
    fovs_remaining: u32,
    pause_requested: bool,
    retake_list: Vec<FovId>,
}

/// Drives one timepoint's capture state. Single lock plus two condition
/// signals: one for the worker waiting on a pause request, one for the
/// worker waiting to resume out of `Paused`.
pub struct TimepointStateMachine {
    inner: Mutex<Inner>,
    pause_cv: Condvar,
    resume_cv: Condvar,
}

impl TimepointStateMachine {
    /// Construct a new state machine for a timepoint with `total_fovs` planned captures.
    pub fn new(total_fovs: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: TimepointState::Acquiring,
                fovs_remaining: total_fovs,
                pause_requested: false,
                retake_list: Vec::new(),
            }),
            pause_cv: Condvar::new(),
            resume_cv: Condvar::new(),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> TimepointState {
        self.inner.lock().state
    }

    /// Snapshot of outstanding FOV count.
    pub fn fovs_remaining(&self) -> u32 {
        self.inner.lock().fovs_remaining
    }

    /// Request a pause. Accepted only from `Acquiring` or `Captured`.
    /// Idempotent: a second call while already requested is a no-op that
    /// still returns `true`. Does not itself change state.
    pub fn request_pause(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            TimepointState::Acquiring | TimepointState::Captured => {
                if !inner.pause_requested {
                    debug!("pause requested");
                }
                inner.pause_requested = true;
                self.pause_cv.notify_all();
                true
            }
            _ => false,
        }
    }

    /// Block until a pause has been requested or `timeout` elapses.
    /// Returns whether a pause is pending when the call returns.
    pub fn wait_for_pause(&self, timeout: Option<Duration>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.pause_requested {
            match timeout {
                Some(t) => {
                    let _ = self.pause_cv.wait_for(&mut inner, t);
                }
                None => self.pause_cv.wait(&mut inner),
            }
        }
        inner.pause_requested
    }

    /// Transition to `Paused` iff a pause is pending. Clears the pending flag.
    /// Returns whether the transition occurred.
    pub fn complete_pause(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.pause_requested {
            inner.state = TimepointState::Paused;
            inner.pause_requested = false;
            info!("timepoint paused");
            self.resume_cv.notify_all();
            true
        } else {
            false
        }
    }

    /// Resume out of `Paused`. Transitions to `Acquiring` if FOVs remain,
    /// otherwise to `Captured`. No-op (rejected) from any other state.
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != TimepointState::Paused {
            return Err(AcqError::illegal("resume", inner.state.label()));
        }
        inner.state = if inner.fovs_remaining > 0 {
            TimepointState::Acquiring
        } else {
            TimepointState::Captured
        };
        info!(new_state = inner.state.label(), "resumed");
        self.resume_cv.notify_all();
        Ok(())
    }

    /// Block the caller until the state machine leaves `Paused`.
    pub fn wait_for_resume(&self, timeout: Option<Duration>) -> TimepointState {
        let mut inner = self.inner.lock();
        while inner.state == TimepointState::Paused {
            match timeout {
                Some(t) => {
                    let result = self.resume_cv.wait_for(&mut inner, t);
                    if result.timed_out() {
                        break;
                    }
                }
                None => self.resume_cv.wait(&mut inner),
            }
        }
        inner.state
    }

    /// Queue a retake list and transition to `Retaking`. Valid only from
    /// `Paused` with a non-empty list.
    pub fn retake(&self, fovs: Vec<FovId>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != TimepointState::Paused {
            return Err(AcqError::illegal("retake", inner.state.label()));
        }
        if fovs.is_empty() {
            return Err(AcqError::ConfigError("retake list must be non-empty".into()));
        }
        inner.retake_list = fovs;
        inner.state = TimepointState::Retaking;
        info!(count = inner.retake_list.len(), "retake started");
        self.resume_cv.notify_all();
        Ok(())
    }

    /// Snapshot of the pending retake list.
    pub fn get_retake_list(&self) -> Vec<FovId> {
        self.inner.lock().retake_list.clone()
    }

    /// Clear the retake list and transition back to `Paused`. Valid only
    /// from `Retaking`.
    pub fn complete_retakes(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != TimepointState::Retaking {
            return Err(AcqError::illegal("complete_retakes", inner.state.label()));
        }
        inner.retake_list.clear();
        inner.state = TimepointState::Paused;
        info!("retakes complete");
        self.resume_cv.notify_all();
        Ok(())
    }

    /// Record that one FOV finished capturing. Saturating decrement; no
    /// state transition effect by itself.
    pub fn mark_fov_captured(&self) {
        let mut inner = self.inner.lock();
        inner.fovs_remaining = inner.fovs_remaining.saturating_sub(1);
    }

    /// Transition `Acquiring -> Captured` once all FOVs are done.
    pub fn mark_all_captured(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != TimepointState::Acquiring {
            return Err(AcqError::illegal("mark_all_captured", inner.state.label()));
        }
        inner.state = TimepointState::Captured;
        info!("timepoint captured");
        self.resume_cv.notify_all();
        Ok(())
    }

    /// Request abort. Returns `(accepted, abort_whole_run)`.
    ///
    /// From `Retaking`: clears the retake list and falls back to `Paused`,
    /// leaving the rest of the run alive (`abort_whole_run == false`).
    /// From any other state: accepted, and the caller should propagate a
    /// full-run abort to the context.
    pub fn abort(&self) -> (bool, bool) {
        let mut inner = self.inner.lock();
        if inner.state == TimepointState::Retaking {
            inner.retake_list.clear();
            inner.state = TimepointState::Paused;
            info!("abort during retake: returning to paused, run continues");
            self.resume_cv.notify_all();
            (true, false)
        } else {
            info!(state = inner.state.label(), "abort: propagating to whole run");
            (true, true)
        }
    }
}
