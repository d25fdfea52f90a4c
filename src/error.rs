//! Crate-wide error taxonomy.

use crate::types::FovId;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AcqError>;

/// The error taxonomy described by the control core's design: illegal state
/// transitions, hardware failures, job failures, and configuration errors.
#[derive(Debug, Error)]
pub enum AcqError {
    /// A state-machine operation was invoked in a state that does not accept it.
    #[error("illegal transition: {operation} not valid from state {state}")]
    IllegalTransition {
        /// The operation that was rejected.
        operation: &'static str,
        /// The state it was rejected from.
        state: &'static str,
    },

    /// A hardware interface call failed. Fatal to the run.
    #[error("hardware error on {fov:?}: {message}")]
    HardwareError {
        /// FOV being captured when the failure occurred, if any.
        fov: Option<FovId>,
        /// Human-readable failure description.
        message: String,
    },

    /// A background job failed. Save failures are fatal; QC failures are
    /// recorded at the metric level by the caller and not surfaced as this
    /// variant propagating an abort.
    #[error("job error ({kind}) on {fov:?}: {message}")]
    JobError {
        /// Which job kind failed.
        kind: &'static str,
        /// FOV the job was operating on.
        fov: FovId,
        /// Human-readable failure description.
        message: String,
    },

    /// Configuration failed to parse or validate. No run is started.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// YAML parsing failure, folded into configuration errors.
    #[error("invalid configuration yaml: {0}")]
    ConfigYaml(#[from] serde_yaml::Error),

    /// CSV writer/reader failure while persisting metrics.
    #[error("csv persistence error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON roll-up (de)serialization failure.
    #[error("json persistence error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O failure while writing persistence artifacts.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for failures originating outside this crate's own
    /// taxonomy (e.g. from a caller-supplied hardware or observer
    /// implementation that returns `anyhow::Error`).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AcqError {
    /// Build an `IllegalTransition` error.
    pub fn illegal(operation: &'static str, state: &'static str) -> Self {
        AcqError::IllegalTransition { operation, state }
    }
}
