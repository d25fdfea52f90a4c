//! Acquisition Worker: the single dedicated thread that drives the
//! per-FOV loop and mediates between hardware, state machine, job runner,
//! and metrics store.
//!
//! Shaped after `knhk-autonomic::controller::AutonomicController::execute_cycle`
//! (a component sequencing several sub-components per cycle, short-circuiting
//! on empty intermediate results), translated from its `tokio::time::interval`
//! async loop into a synchronous loop driven by one `std::thread`, per the
//! spec's explicit design note mapping coroutine-style pause/resume onto
//! condition variables plus a single-driver worker thread.

use crate::config::{AcquisitionConfig, ProgressionPolicy};
use crate::context::AcquisitionContext;
use crate::error::{AcqError, Result};
use crate::hardware::HardwareInterface;
use crate::job_runner::{Job, JobPayload, JobResult, JobRunner};
use crate::metrics::{check_timepoint, MetricsStore, PolicyDecision};
use crate::observer::{AcquisitionEvent, Observer};
use crate::persistence::{self, SummaryRollup, TimepointSummary};
use crate::state_machine::{TimepointState, TimepointStateMachine};
use crate::types::{CaptureInfo, FovId, StagePosition};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// One FOV's planned stage position within a region.
#[derive(Debug, Clone)]
pub struct PlannedFov {
    /// FOV identifier.
    pub fov_id: FovId,
    /// Stage position to move to for this FOV.
    pub position: StagePosition,
}

/// The fixed plan of FOVs and channels captured at every timepoint.
#[derive(Debug, Clone)]
pub struct AcquisitionPlan {
    /// Planned FOVs, in the order they should be captured. Callers are
    /// expected to supply these already sorted `(region_id, fov_index)`
    /// ascending, per the worker's ordering guarantee.
    pub fovs: Vec<PlannedFov>,
    /// Channels to trigger at every FOV, in order.
    pub channels: Vec<String>,
}

/// Shared control state reachable both from the worker thread and from
/// external callers issuing pause/resume/retake/abort/proceed.
struct RunControl {
    context: Arc<AcquisitionContext>,
    current_sm: Mutex<Option<Arc<TimepointStateMachine>>>,
    /// The in-progress timepoint's metrics store, so `WorkerHandle` can read
    /// back individual FOV metrics (e.g. after a retake) without waiting for
    /// the timepoint's CSV to be written.
    current_store: Mutex<Option<Arc<MetricsStore>>>,
    proceed_requested: Mutex<bool>,
    proceed_cv: Condvar,
    last_decision: Mutex<Option<PolicyDecision>>,
    observer: Arc<dyn Observer>,
    /// Set when a fatal `JobError` (a failed Save-image job) requests an
    /// abort, so the worker can distinguish "aborted by a fatal error,
    /// surface it" from "aborted by an external `abort()` call, just stop".
    fatal_reason: Mutex<Option<(FovId, String)>>,
    /// Shared with the worker's own copy so `WorkerHandle` can surface
    /// dispatch counts without waiting for the run to finish.
    runner: Arc<JobRunner>,
}

/// A handle external callers use to control a running worker. Cheap to
/// clone; every clone refers to the same run.
#[derive(Clone)]
pub struct WorkerHandle {
    control: Arc<RunControl>,
}

impl WorkerHandle {
    /// Request that the current timepoint pause. No-op if the timepoint is
    /// not currently in a state that accepts a pause request.
    pub fn pause(&self) -> bool {
        match self.control.current_sm.lock().as_ref() {
            Some(sm) => {
                let accepted = sm.request_pause();
                if accepted {
                    self.control.observer.notify(AcquisitionEvent::PauseRequested);
                }
                accepted
            }
            None => false,
        }
    }

    /// Resume the current timepoint out of `Paused`.
    pub fn resume(&self) -> Result<()> {
        match self.control.current_sm.lock().as_ref() {
            Some(sm) => sm.resume(),
            None => Err(AcqError::illegal("resume", "no active timepoint")),
        }
    }

    /// Queue a retake for the given FOVs.
    pub fn retake(&self, fovs: Vec<FovId>) -> Result<()> {
        match self.control.current_sm.lock().as_ref() {
            Some(sm) => sm.retake(fovs),
            None => Err(AcqError::illegal("retake", "no active timepoint")),
        }
    }

    /// Abort the run. Returns `(accepted, abort_whole_run)` mirroring
    /// `TimepointStateMachine::abort`; if there is no active timepoint the
    /// whole run is aborted directly on the context.
    pub fn abort(&self) -> (bool, bool) {
        match self.control.current_sm.lock().as_ref() {
            Some(sm) => {
                let (accepted, abort_whole_run) = sm.abort();
                if abort_whole_run {
                    self.control.context.request_abort();
                }
                (accepted, abort_whole_run)
            }
            None => {
                self.control.context.request_abort();
                (true, true)
            }
        }
    }

    /// Signal that the run may proceed past a `Manual` or `QcGated` pause
    /// point. Has no effect under `Auto`.
    pub fn proceed(&self) {
        let mut flag = self.control.proceed_requested.lock();
        *flag = true;
        self.control.proceed_cv.notify_all();
    }

    /// The most recent policy decision, if any timepoint has completed.
    pub fn last_policy_decision(&self) -> Option<PolicyDecision> {
        self.control.last_decision.lock().clone()
    }

    /// Whether the run has been asked to stop.
    pub fn is_aborted(&self) -> bool {
        self.control.context.is_aborted()
    }

    /// `(dispatched, completed)` job counts so far, across every job kind
    /// and every timepoint this run has gone through. Useful for asserting
    /// the literal dispatch counts the spec's scenarios call out.
    pub fn dispatched_count(&self) -> (usize, usize) {
        self.control.runner.metrics()
    }

    /// `(save_dispatched, qc_dispatched)` so far, independent of whether QC
    /// is enabled for this run.
    pub fn dispatched_count_by_kind(&self) -> (usize, usize) {
        self.control.runner.metrics_by_kind()
    }

    /// Read back one FOV's metrics from the timepoint currently (or most
    /// recently) in progress, straight from the in-memory store rather than
    /// the CSV snapshot. `None` if no timepoint has started yet or the FOV
    /// has no recorded metrics.
    pub fn current_metrics(&self, fov_id: &FovId) -> Option<crate::types::FovMetrics> {
        self.control
            .current_store
            .lock()
            .as_ref()
            .and_then(|store| store.get(fov_id))
    }
}

/// Drives the per-FOV loop for an entire run. Constructed once per run and
/// consumed by [`AcquisitionWorker::run`] on its dedicated thread.
pub struct AcquisitionWorker {
    config: AcquisitionConfig,
    hardware: Box<dyn HardwareInterface>,
    plan: AcquisitionPlan,
    runner: Arc<JobRunner>,
    observer: Arc<dyn Observer>,
    control: Arc<RunControl>,
    rollup: SummaryRollup,
    /// Z position of each FOV as of its most recent capture, carried across
    /// timepoints so z-drift can be computed relative to the previous one.
    previous_z: BTreeMap<FovId, f64>,
}

impl AcquisitionWorker {
    /// Construct a worker and a handle external callers use to control it.
    pub fn new(
        config: AcquisitionConfig,
        hardware: Box<dyn HardwareInterface>,
        plan: AcquisitionPlan,
        observer: Arc<dyn Observer>,
    ) -> (Self, WorkerHandle) {
        let context = Arc::new(AcquisitionContext::new(
            config.total_timepoints,
            config.progression_policy,
        ));
        let runner = Arc::new(JobRunner::new(config.job_worker_count));
        let control = Arc::new(RunControl {
            context,
            current_sm: Mutex::new(None),
            current_store: Mutex::new(None),
            proceed_requested: Mutex::new(false),
            proceed_cv: Condvar::new(),
            last_decision: Mutex::new(None),
            observer: Arc::clone(&observer),
            fatal_reason: Mutex::new(None),
            runner: Arc::clone(&runner),
        });
        let handle = WorkerHandle {
            control: Arc::clone(&control),
        };
        let worker = Self {
            config,
            hardware,
            plan,
            runner,
            observer,
            control,
            rollup: SummaryRollup::new(),
            previous_z: BTreeMap::new(),
        };
        (worker, handle)
    }

    /// Run the acquisition to completion or abort. Intended to be the body
    /// of the worker's dedicated thread.
    #[instrument(skip(self))]
    pub fn run(mut self) -> Result<()> {
        while self.control.context.should_continue() {
            let t = self.control.context.current_timepoint();
            self.run_timepoint(t)?;
            if self.control.context.is_aborted() {
                break;
            }
            self.control.context.advance();
        }
        self.runner.shutdown();
        self.rollup.flush(&self.config.experiment_path)?;
        info!("run finished");
        Ok(())
    }

    #[instrument(skip(self))]
    fn run_timepoint(&mut self, t: u32) -> Result<()> {
        let sm = Arc::new(TimepointStateMachine::new(self.plan.fovs.len() as u32));
        *self.control.current_sm.lock() = Some(Arc::clone(&sm));
        let store = Arc::new(MetricsStore::new(t));
        *self.control.current_store.lock() = Some(Arc::clone(&store));
        let images_dir = persistence::images_dir(&self.config.experiment_path, t);

        for planned in self.plan.fovs.clone() {
            if self.control.context.is_aborted() {
                break;
            }

            // Pause/retake checks happen only between FOVs: the worker
            // always finishes an in-progress capture and dispatches its
            // jobs before honoring a pause request. `settle` also absorbs
            // however many retake cycles are queued before the state
            // machine is resumed out of `Paused`.
            self.settle(&sm, t, &store, &images_dir)?;

            if sm.state() == TimepointState::Captured {
                break;
            }

            if let Err(err) = self.capture_one_fov(&planned, t, &store, &images_dir) {
                // HardwareError is fatal: abort the run, drain whatever is
                // already in flight, persist what was captured so far, and
                // propagate the error to the caller per the error taxonomy.
                self.control.context.request_abort();
                return self.abort_cleanup(t, &store, err);
            }
            sm.mark_fov_captured();
            self.observer.notify(AcquisitionEvent::FovCaptured {
                fov_id: planned.fov_id.clone(),
            });
            self.drain_into_store(&store);
        }

        for result in self.runner.drain() {
            self.apply_result(&store, result);
        }

        if let Some((fov, message)) = self.control.fatal_reason.lock().take() {
            let err = AcqError::JobError {
                kind: "save",
                fov,
                message,
            };
            return self.abort_cleanup(t, &store, err);
        }

        if sm.state() == TimepointState::Acquiring && !self.control.context.is_aborted() {
            let decision = check_timepoint(&store, &self.config.policy);
            self.observer.notify(AcquisitionEvent::PolicyDecided {
                timepoint: t,
                decision: decision.clone(),
            });
            *self.control.last_decision.lock() = Some(decision.clone());
            if decision.should_pause {
                if sm.request_pause() {
                    self.observer.notify(AcquisitionEvent::PauseRequested);
                }
                self.settle(&sm, t, &store, &images_dir)?;
            } else {
                sm.mark_all_captured()?;
            }
        }

        if sm.state() == TimepointState::Captured {
            self.observer
                .notify(AcquisitionEvent::TimepointCaptured { timepoint: t });
        }

        // `wait_for_progression` services any pause/retake cycles queued
        // against the now-`Captured` timepoint (scenario: a controller
        // retakes an FOV after the timepoint already finished), so the CSV
        // snapshot is written only once the worker is truly done with this
        // timepoint, not at the moment it first reaches `Captured`.
        if !self.control.context.is_aborted() {
            self.wait_for_progression(&sm, t, &store, &images_dir)?;
        }

        let csv_path = persistence::qc_metrics_path(&self.config.experiment_path, t);
        store.save(&csv_path)?;
        let decision = self.control.last_decision.lock().clone().unwrap_or_default();
        self.rollup.push(TimepointSummary {
            timepoint: t,
            fov_count: store.len(),
            flagged_count: decision.flagged.len(),
            should_pause: decision.should_pause,
        });

        Ok(())
    }

    /// Drain in-flight jobs, persist whatever metrics were collected before
    /// a fatal error, emit a final state-change event, and propagate the
    /// original error. Used when a `HardwareError` (or a fatal Save-image
    /// `JobError`) aborts a timepoint mid-capture.
    fn abort_cleanup(&mut self, timepoint: u32, store: &MetricsStore, err: AcqError) -> Result<()> {
        for result in self.runner.shutdown() {
            self.apply_result(store, result);
        }
        let csv_path = persistence::qc_metrics_path(&self.config.experiment_path, timepoint);
        let _ = store.save(&csv_path);
        self.observer.notify(AcquisitionEvent::Aborted {
            timepoint,
            reason: err.to_string(),
        });
        let _ = self.rollup.flush(&self.config.experiment_path);
        Err(err)
    }

    /// Apply a pending pause request, if any, then block while `Paused`,
    /// running any number of retake cycles a controller queues before
    /// finally resuming out of `Paused` into `Acquiring` or `Captured`.
    fn settle(
        &mut self,
        sm: &TimepointStateMachine,
        timepoint: u32,
        store: &MetricsStore,
        images_dir: &std::path::Path,
    ) -> Result<()> {
        if sm.wait_for_pause(Some(Duration::from_millis(0))) {
            for result in self.runner.drain() {
                self.apply_result(store, result);
            }
            let old_state = sm.state();
            if sm.complete_pause() {
                self.observer.notify(AcquisitionEvent::Paused);
                self.observer.notify(AcquisitionEvent::StateChanged {
                    old: old_state,
                    new: TimepointState::Paused,
                });
            }
        }

        while sm.state() == TimepointState::Paused {
            let old_state = sm.state();
            let new_state = sm.wait_for_resume(None);
            if new_state == old_state {
                // timed-out wait (no timeout configured here, so unreachable
                // in practice) or a spurious wake with no transition.
                continue;
            }
            self.observer.notify(AcquisitionEvent::StateChanged {
                old: old_state,
                new: new_state,
            });
            match new_state {
                TimepointState::Retaking => {
                    self.run_retakes(sm, timepoint, store, images_dir)?;
                    // run_retakes leaves the state machine back in Paused;
                    // loop around to wait for the next resume or retake.
                }
                _ => {
                    self.observer.notify(AcquisitionEvent::Resumed);
                }
            }
        }
        Ok(())
    }

    fn run_retakes(
        &mut self,
        sm: &TimepointStateMachine,
        timepoint: u32,
        store: &MetricsStore,
        images_dir: &std::path::Path,
    ) -> Result<()> {
        let retake_list = sm.get_retake_list();
        self.observer.notify(AcquisitionEvent::RetakeStarted {
            fovs: retake_list.clone(),
        });
        for fov_id in retake_list {
            // A whole-run abort stops immediately; an abort-from-Retaking
            // (see `TimepointStateMachine::abort`) has already transitioned
            // the state machine back to `Paused` without touching the
            // context's abort flag, so checking `sm.state()` here is what
            // actually detects it.
            if self.control.context.is_aborted() || sm.state() != TimepointState::Retaking {
                return Ok(());
            }
            let planned = self
                .plan
                .fovs
                .iter()
                .find(|p| p.fov_id == fov_id)
                .cloned()
                .ok_or_else(|| {
                    AcqError::ConfigError(format!("retake requested unknown fov {fov_id}"))
                })?;
            if let Err(err) = self.capture_one_fov(&planned, timepoint, store, images_dir) {
                self.control.context.request_abort();
                return self.abort_cleanup(timepoint, store, err);
            }
            self.observer
                .notify(AcquisitionEvent::RetakeFovComplete { fov_id });
        }
        if sm.state() == TimepointState::Retaking {
            sm.complete_retakes()?;
            self.observer.notify(AcquisitionEvent::RetakesComplete);
        }
        Ok(())
    }

    fn capture_one_fov(
        &mut self,
        planned: &PlannedFov,
        timepoint: u32,
        store: &MetricsStore,
        images_dir: &std::path::Path,
    ) -> Result<()> {
        let hardware = self.hardware.as_mut();

        hardware.move_to(planned.position.x_mm, planned.position.y_mm, planned.position.z_mm)?;

        for channel in &self.plan.channels {
            hardware.set_channel(channel)?;
            let image = hardware.trigger_capture().map_err(|e| match e {
                AcqError::HardwareError { message, .. } => AcqError::HardwareError {
                    fov: Some(planned.fov_id.clone()),
                    message,
                },
                other => other,
            })?;

            let info = CaptureInfo {
                fov_id: planned.fov_id.clone(),
                timepoint,
                timestamp: chrono::Utc::now(),
                position: planned.position,
                piezo_z_um: hardware.piezo_z_um(),
                channel_id: channel.clone(),
            };

            self.runner.dispatch(Job::SaveImage {
                image: image.clone(),
                info: info.clone(),
                output_dir: images_dir.to_path_buf(),
            });

            if self.config.qc.enabled {
                let focus_score_method = Some(self.config.qc.focus_score_method);
                let laser_af = if self.config.qc.laser_af_displacement {
                    hardware.piezo_z_um()
                } else {
                    None
                };
                let prev_z = if self.config.qc.z_drift {
                    self.previous_z.get(&planned.fov_id).copied()
                } else {
                    None
                };
                self.runner.dispatch(Job::QcMetrics {
                    image,
                    info,
                    focus_score_method,
                    laser_af_displacement_um: laser_af,
                    previous_z_um: prev_z,
                });
            }
        }

        let z_now = hardware.current_z_um();
        self.previous_z.insert(planned.fov_id.clone(), z_now);
        Ok(())
    }

    fn drain_into_store(&self, store: &MetricsStore) {
        for result in self.runner.poll_results() {
            self.apply_result(store, result);
        }
    }

    fn apply_result(&self, store: &MetricsStore, result: JobResult) {
        match result.outcome {
            Ok(JobPayload::Metrics(metrics)) => {
                self.observer.notify(AcquisitionEvent::MetricsUpdated {
                    metrics: metrics.clone(),
                });
                store.add(metrics);
            }
            Ok(JobPayload::Saved { .. }) => {}
            Err(message) => {
                warn!(fov = %result.fov_id, kind = ?result.kind, message, "job failed");
                match result.kind {
                    crate::job_runner::JobKind::QcMetrics => {
                        store.add(crate::types::FovMetrics {
                            fov_id: result.fov_id,
                            timestamp: chrono::Utc::now(),
                            z_position_um: 0.0,
                            focus_score: None,
                            laser_af_displacement_um: None,
                            z_diff_from_last_timepoint_um: None,
                            error: Some(message),
                        });
                    }
                    // Save-image failures are fatal to the run per the error
                    // taxonomy; propagate by requesting an abort and
                    // recording why, so run_timepoint can surface it after
                    // draining.
                    crate::job_runner::JobKind::SaveImage => {
                        *self.control.fatal_reason.lock() = Some((result.fov_id, message));
                        self.control.context.request_abort();
                    }
                }
            }
        }
    }

    /// Wait for the run to be cleared to advance past `Captured`, per the
    /// configured progression policy. A pause may be requested at any point
    /// during this wait (the timepoint is still `Captured`, which accepts
    /// `request_pause`); this polls for one between proceed-wait ticks so a
    /// controller can pause/retake/resume even after the timepoint has
    /// nominally finished capturing, same as it can mid-timepoint.
    fn wait_for_progression(
        &mut self,
        sm: &TimepointStateMachine,
        timepoint: u32,
        store: &MetricsStore,
        images_dir: &std::path::Path,
    ) -> Result<()> {
        loop {
            // Service any pause (and whatever retakes it carries) queued
            // against the now-`Captured` timepoint before re-checking
            // progression. `settle` always leaves the state machine back in
            // `Captured` here, since `resume()` with `fovs_remaining == 0`
            // (the only way this timepoint reached `Captured`) always lands
            // on `Captured`, never `Acquiring`.
            self.settle(sm, timepoint, store, images_dir)?;
            if self.control.context.is_aborted() {
                return Ok(());
            }

            match self.config.progression_policy {
                ProgressionPolicy::Auto => return Ok(()),
                ProgressionPolicy::Manual => {
                    if self.wait_for_proceed_tick() {
                        return Ok(());
                    }
                }
                ProgressionPolicy::QcGated => {
                    if self.wait_for_proceed_tick() {
                        let cleared = self
                            .control
                            .last_decision
                            .lock()
                            .as_ref()
                            .map(|d| !d.should_pause)
                            .unwrap_or(true);
                        if cleared {
                            return Ok(());
                        }
                        // proceed() was called but the last decision still
                        // requests a pause; reset and keep waiting.
                        *self.control.proceed_requested.lock() = false;
                    }
                }
            }
        }
    }

    /// Block for a short tick waiting for `proceed()`, so the caller can
    /// periodically re-check for a pause request in between. Returns
    /// whether `proceed()` was observed within the tick.
    fn wait_for_proceed_tick(&self) -> bool {
        let mut flag = self.control.proceed_requested.lock();
        if !*flag {
            let _ = self
                .control
                .proceed_cv
                .wait_for(&mut flag, Duration::from_millis(20));
        }
        if *flag {
            *flag = false;
            true
        } else {
            false
        }
    }
}
