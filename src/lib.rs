//! Acquisition Control Core: the two-level state machine that drives
//! FOV-by-FOV microscope acquisition across many timepoints.
//!
//! ```text
//!   AcquisitionContext (run-level: timepoint index, abort, progression)
//!        |
//!        v
//!   AcquisitionWorker ---- drives ----> TimepointStateMachine (per timepoint)
//!        |                                   (Acquiring/Paused/Retaking/Captured)
//!        |
//!        +--> HardwareInterface (stage/camera, trait + mock)
//!        +--> JobRunner (parallel Save/QC job dispatch)
//!        +--> MetricsStore + QcPolicy (per-timepoint QC evaluation)
//!        +--> Observer (best-effort event stream)
//! ```
//!
//! The worker owns exactly one dedicated thread per run; the job runner is
//! a separate bounded thread pool; external callers (UI, RPC) drive
//! pause/resume/retake/abort/proceed through a [`worker::WorkerHandle`].

#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod hardware;
pub mod job_runner;
pub mod metrics;
pub mod observability;
pub mod observer;
pub mod persistence;
pub mod state_machine;
pub mod types;
pub mod worker;

pub use config::{AcquisitionConfig, FocusScoreMethod, PolicyConfig, ProgressionPolicy, QcConfig};
pub use context::AcquisitionContext;
pub use error::{AcqError, Result};
pub use hardware::{HardwareInterface, MockHardware};
pub use job_runner::{Job, JobKind, JobPayload, JobResult, JobRunner};
pub use metrics::{check_timepoint, MetricsStore, PolicyDecision};
pub use observer::{AcquisitionEvent, ChannelObserver, NullObserver, Observer};
pub use state_machine::{TimepointState, TimepointStateMachine};
pub use types::{CaptureInfo, CapturedImage, FovId, FovMetrics, FovMetricsRow, StagePosition};
pub use worker::{AcquisitionPlan, AcquisitionWorker, PlannedFov, WorkerHandle};
