//! Shared data model: FOV identity, capture records, images, and metrics.

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Identifies one addressable capture site: a region plus an index within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FovId {
    /// Name of the region (e.g. a well) this FOV belongs to.
    pub region_id: String,
    /// Index of this FOV within its region.
    pub fov_index: u32,
}

impl FovId {
    /// Construct a new FOV identifier.
    pub fn new(region_id: impl Into<String>, fov_index: u32) -> Self {
        Self {
            region_id: region_id.into(),
            fov_index,
        }
    }
}

impl std::fmt::Display for FovId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.region_id, self.fov_index)
    }
}

/// Stage position in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagePosition {
    /// X position, millimeters.
    pub x_mm: f64,
    /// Y position, millimeters.
    pub y_mm: f64,
    /// Z position, millimeters.
    pub z_mm: f64,
}

/// Immutable record produced at dispatch time for one captured frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureInfo {
    /// Which FOV this capture belongs to.
    pub fov_id: FovId,
    /// Index of the timepoint this capture belongs to.
    pub timepoint: u32,
    /// Wall-clock capture timestamp.
    pub timestamp: DateTime<Utc>,
    /// Stage position at capture time.
    pub position: StagePosition,
    /// Piezo-Z displacement, micrometers, if the system has a piezo stage.
    pub piezo_z_um: Option<f64>,
    /// Illumination/detection channel used for this frame.
    pub channel_id: String,
}

/// An opaque 2D intensity buffer. Internally a row-major `f64` grid, which
/// is sufficient for all focus-score algorithms and avoids committing to a
/// specific bit depth or pixel format at this layer.
///
/// Wrapped in `Arc` so that ownership among multiple jobs referencing the
/// same frame (e.g. Save and QC) ends automatically when the last job
/// holding a clone completes.
#[derive(Debug, Clone)]
pub struct CapturedImage(pub Arc<Array2<f64>>);

impl CapturedImage {
    /// Wrap a raw sample grid.
    pub fn new(samples: Array2<f64>) -> Self {
        Self(Arc::new(samples))
    }

    /// Image width in pixels.
    pub fn width(&self) -> usize {
        self.0.ncols()
    }

    /// Image height in pixels.
    pub fn height(&self) -> usize {
        self.0.nrows()
    }

    /// Borrow the underlying sample grid.
    pub fn samples(&self) -> &Array2<f64> {
        &self.0
    }
}

/// Per-FOV metrics record for one timepoint. Optional fields are `None`
/// when the corresponding metric was disabled or the QC job failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FovMetrics {
    /// FOV this record describes.
    pub fov_id: FovId,
    /// Capture timestamp.
    pub timestamp: DateTime<Utc>,
    /// Absolute Z position, micrometers.
    pub z_position_um: f64,
    /// Focus score from the configured algorithm, if QC focus scoring is enabled.
    pub focus_score: Option<f64>,
    /// Laser autofocus displacement, micrometers, if available.
    pub laser_af_displacement_um: Option<f64>,
    /// Difference in Z position from the same FOV at the previous timepoint.
    pub z_diff_from_last_timepoint_um: Option<f64>,
    /// Set when the QC job that would have produced this record failed.
    pub error: Option<String>,
}

/// A flattened row used by both the CSV writer and in-process analysis via
/// `MetricsStore::to_frame`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FovMetricsRow {
    /// Region component of the FOV identifier.
    pub region_id: String,
    /// FOV index component of the FOV identifier.
    pub fov_index: u32,
    /// Capture timestamp, RFC3339.
    pub timestamp: String,
    /// Absolute Z position, micrometers.
    pub z_position_um: f64,
    /// Focus score, empty string when absent.
    pub focus_score: Option<f64>,
    /// Laser AF displacement, micrometers, empty string when absent.
    pub laser_af_displacement_um: Option<f64>,
    /// Z drift from previous timepoint, micrometers, empty string when absent.
    pub z_diff_from_last_timepoint_um: Option<f64>,
    /// Error reason, empty string when absent.
    pub error: Option<String>,
}

impl From<&FovMetrics> for FovMetricsRow {
    fn from(m: &FovMetrics) -> Self {
        FovMetricsRow {
            region_id: m.fov_id.region_id.clone(),
            fov_index: m.fov_id.fov_index,
            timestamp: m.timestamp.to_rfc3339(),
            z_position_um: m.z_position_um,
            focus_score: m.focus_score,
            laser_af_displacement_um: m.laser_af_displacement_um,
            z_diff_from_last_timepoint_um: m.z_diff_from_last_timepoint_um,
            error: m.error.clone(),
        }
    }
}
