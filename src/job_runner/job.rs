//! Job kinds and their results.
//!
//! Heterogeneous jobs are represented as a single tagged enum with one
//! `run` dispatch rather than open-ended subtyping, per the design notes on
//! dynamic dispatch over job kinds.

use crate::error::AcqError;
use crate::metrics::focus::compute_focus_score;
use crate::types::{CaptureInfo, CapturedImage, FovId, FovMetrics};
use std::path::PathBuf;

use crate::config::FocusScoreMethod;

/// A unit of background work dispatched by the worker to the job runner.
pub enum Job {
    /// Persist a captured image and its capture info to disk.
    SaveImage {
        /// Image to persist.
        image: CapturedImage,
        /// Capture metadata for this frame.
        info: CaptureInfo,
        /// Destination directory (the timepoint's `images/` directory).
        output_dir: PathBuf,
    },
    /// Compute QC metrics for a captured image.
    QcMetrics {
        /// Image to analyze.
        image: CapturedImage,
        /// Capture metadata for this frame.
        info: CaptureInfo,
        /// Which focus-score algorithm to use, if focus scoring is enabled.
        focus_score_method: Option<FocusScoreMethod>,
        /// Whether to surface laser-AF displacement, if hardware reported one.
        laser_af_displacement_um: Option<f64>,
        /// Z position of the same FOV at the previous timepoint, if known.
        previous_z_um: Option<f64>,
    },
}

impl Job {
    /// Which FOV this job concerns.
    pub fn fov_id(&self) -> &FovId {
        match self {
            Job::SaveImage { info, .. } => &info.fov_id,
            Job::QcMetrics { info, .. } => &info.fov_id,
        }
    }

    /// A short label for logging and result tagging.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Job::SaveImage { .. } => "save_image",
            Job::QcMetrics { .. } => "qc_metrics",
        }
    }

    /// Execute the job synchronously on whichever worker thread picked it up.
    pub fn run(self) -> JobResult {
        let fov_id = self.fov_id().clone();
        match self {
            Job::SaveImage { image, info, output_dir } => {
                let outcome = run_save_image(&image, &info, &output_dir)
                    .map(|path| JobPayload::Saved { path })
                    .map_err(|e| e.to_string());
                JobResult {
                    fov_id,
                    kind: JobKind::SaveImage,
                    outcome,
                }
            }
            Job::QcMetrics {
                image,
                info,
                focus_score_method,
                laser_af_displacement_um,
                previous_z_um,
            } => {
                let metrics = run_qc_metrics(
                    &image,
                    &info,
                    focus_score_method,
                    laser_af_displacement_um,
                    previous_z_um,
                );
                JobResult {
                    fov_id,
                    kind: JobKind::QcMetrics,
                    outcome: Ok(JobPayload::Metrics(metrics)),
                }
            }
        }
    }
}

fn run_save_image(
    image: &CapturedImage,
    info: &CaptureInfo,
    output_dir: &std::path::Path,
) -> Result<PathBuf, AcqError> {
    std::fs::create_dir_all(output_dir)?;
    let filename = format!(
        "{}_{}_{}.bin",
        info.fov_id.region_id, info.fov_id.fov_index, info.channel_id
    );
    let path = output_dir.join(filename);
    let (h, w) = (image.height(), image.width());
    let mut buf = Vec::with_capacity(h * w * 8 + 16);
    buf.extend_from_slice(&(h as u32).to_le_bytes());
    buf.extend_from_slice(&(w as u32).to_le_bytes());
    for v in image.samples().iter() {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(&path, buf)?;
    Ok(path)
}

fn run_qc_metrics(
    image: &CapturedImage,
    info: &CaptureInfo,
    focus_score_method: Option<FocusScoreMethod>,
    laser_af_displacement_um: Option<f64>,
    previous_z_um: Option<f64>,
) -> FovMetrics {
    let focus_score = focus_score_method.map(|method| compute_focus_score(image, method));
    let z_position_um = info.position.z_mm * 1000.0;
    let z_diff_from_last_timepoint_um = previous_z_um.map(|prev| z_position_um - prev);
    FovMetrics {
        fov_id: info.fov_id.clone(),
        timestamp: info.timestamp,
        z_position_um,
        focus_score,
        laser_af_displacement_um,
        z_diff_from_last_timepoint_um,
        error: None,
    }
}

/// Which job kind produced a [`JobResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Result of a `SaveImage` job.
    SaveImage,
    /// Result of a `QcMetrics` job.
    QcMetrics,
}

/// The typed payload carried by a successful [`JobResult`].
#[derive(Debug, Clone)]
pub enum JobPayload {
    /// Path the image was written to.
    Saved {
        /// Destination path.
        path: PathBuf,
    },
    /// Computed metrics for one FOV.
    Metrics(FovMetrics),
}

/// The outcome of running one job, always surfaced via `poll_results`,
/// never by panicking the worker thread that ran it.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// FOV the job concerned.
    pub fov_id: FovId,
    /// Which job kind produced this result.
    pub kind: JobKind,
    /// `Ok` payload on success, or a human-readable error on failure.
    pub outcome: Result<JobPayload, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StagePosition;
    use chrono::Utc;
    use ndarray::Array2;

    fn sample_info() -> CaptureInfo {
        CaptureInfo {
            fov_id: FovId::new("A", 0),
            timepoint: 0,
            timestamp: Utc::now(),
            position: StagePosition { x_mm: 1.0, y_mm: 2.0, z_mm: 0.01 },
            piezo_z_um: None,
            channel_id: "DAPI".into(),
        }
    }

    #[test]
    fn qc_job_computes_z_position_in_micrometers() {
        let image = CapturedImage::new(Array2::from_elem((4, 4), 1.0));
        let job = Job::QcMetrics {
            image,
            info: sample_info(),
            focus_score_method: None,
            laser_af_displacement_um: None,
            previous_z_um: Some(5.0),
        };
        let result = job.run();
        match result.outcome.unwrap() {
            JobPayload::Metrics(m) => {
                assert_eq!(m.z_position_um, 10.0);
                assert_eq!(m.z_diff_from_last_timepoint_um, Some(5.0));
                assert!(m.focus_score.is_none());
            }
            _ => panic!("expected metrics payload"),
        }
    }

    #[test]
    fn save_job_writes_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = CapturedImage::new(Array2::from_elem((2, 2), 3.0));
        let job = Job::SaveImage {
            image,
            info: sample_info(),
            output_dir: dir.path().to_path_buf(),
        };
        let result = job.run();
        match result.outcome.unwrap() {
            JobPayload::Saved { path } => assert!(path.exists()),
            _ => panic!("expected saved payload"),
        }
    }
}
