//! YAML-shaped configuration surface for QC, policy, and run progression.

use crate::error::{AcqError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which focus-score algorithm to use, selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusScoreMethod {
    /// Variance of the discrete Laplacian.
    LaplacianVariance,
    /// Variance divided by mean.
    NormalizedVariance,
    /// Mean Sobel gradient magnitude.
    GradientMagnitude,
    /// Mean high-frequency FFT magnitude.
    FftHighFreq,
}

/// Governs advancement between timepoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressionPolicy {
    /// Advance immediately once a timepoint reaches `Captured`.
    Auto,
    /// Wait for an external `proceed()` call.
    Manual,
    /// Wait for an external `proceed()` call, additionally gated on the
    /// most recent policy decision not requesting a pause.
    QcGated,
}

/// Which QC metrics to compute and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QcConfig {
    /// Whether QC computation is enabled at all.
    pub enabled: bool,
    /// Which focus-score algorithm to use.
    #[serde(default = "default_focus_score_method")]
    pub focus_score_method: FocusScoreMethod,
    /// Whether to compute the laser-AF displacement field, if hardware reports it.
    #[serde(default)]
    pub laser_af_displacement: bool,
    /// Whether to compute Z drift from the previous timepoint.
    #[serde(default)]
    pub z_drift: bool,
}

fn default_focus_score_method() -> FocusScoreMethod {
    FocusScoreMethod::LaplacianVariance
}

/// Outlier-detection rule: flag an FOV whose metric deviates from the mean
/// by more than `std_threshold` standard deviations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutlierRule {
    /// Name of the metric field to evaluate (e.g. `"focus_score"`).
    pub metric_name: String,
    /// Standard-deviation multiple beyond which a value is flagged.
    pub std_threshold: f64,
}

/// QC policy thresholds evaluated once at the end of each timepoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Whether policy evaluation is enabled at all.
    pub enabled: bool,
    /// Minimum acceptable focus score; below this an FOV is flagged.
    #[serde(default)]
    pub focus_score_min: Option<f64>,
    /// Maximum acceptable Z drift magnitude, micrometers.
    #[serde(default)]
    pub z_drift_max_um: Option<f64>,
    /// Outlier-detection rule, if enabled.
    #[serde(default)]
    pub detect_outliers: Option<OutlierRule>,
    /// Whether any flagged FOV should request a pause.
    #[serde(default)]
    pub pause_if_any_flagged: bool,
}

/// Top-level run configuration, matching the YAML surface exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcquisitionConfig {
    /// Total number of timepoints to run.
    pub total_timepoints: u32,
    /// QC computation configuration.
    pub qc: QcConfig,
    /// QC policy configuration.
    pub policy: PolicyConfig,
    /// Governs advancement between timepoints.
    pub progression_policy: ProgressionPolicy,
    /// Root path under which per-timepoint directories are written.
    pub experiment_path: String,
    /// Worker pool size for the job runner. `None` means use the default
    /// (logical processor count).
    #[serde(default)]
    pub job_worker_count: Option<usize>,
}

impl AcquisitionConfig {
    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: AcquisitionConfig = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse and validate configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    fn validate(&self) -> Result<()> {
        if self.total_timepoints == 0 {
            return Err(AcqError::ConfigError(
                "total_timepoints must be at least 1".into(),
            ));
        }
        if let Some(min) = self.policy.focus_score_min {
            if !min.is_finite() {
                return Err(AcqError::ConfigError(
                    "policy.focus_score_min must be finite".into(),
                ));
            }
        }
        if let Some(max) = self.policy.z_drift_max_um {
            if !max.is_finite() || max < 0.0 {
                return Err(AcqError::ConfigError(
                    "policy.z_drift_max_um must be finite and non-negative".into(),
                ));
            }
        }
        if let Some(rule) = &self.policy.detect_outliers {
            if !(rule.std_threshold.is_finite() && rule.std_threshold > 0.0) {
                return Err(AcqError::ConfigError(
                    "policy.detect_outliers.std_threshold must be positive".into(),
                ));
            }
            if rule.metric_name.trim().is_empty() {
                return Err(AcqError::ConfigError(
                    "policy.detect_outliers.metric_name must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_YAML: &str = r#"
total_timepoints: 3
experiment_path: "/tmp/run"
qc:
  enabled: true
  focus_score_method: fft_high_freq
policy:
  enabled: true
  focus_score_min: 100.0
  pause_if_any_flagged: true
progression_policy: auto
"#;

    #[test]
    fn parses_valid_config() {
        let cfg = AcquisitionConfig::from_yaml_str(VALID_YAML).unwrap();
        assert_eq!(cfg.total_timepoints, 3);
        assert_eq!(cfg.qc.focus_score_method, FocusScoreMethod::FftHighFreq);
        assert_eq!(cfg.progression_policy, ProgressionPolicy::Auto);
    }

    #[test]
    fn rejects_unknown_fields() {
        let bad = VALID_YAML.replace("total_timepoints: 3", "total_timepoints: 3\nbogus_field: 1");
        assert!(AcquisitionConfig::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn rejects_zero_timepoints() {
        let bad = VALID_YAML.replace("total_timepoints: 3", "total_timepoints: 0");
        assert!(AcquisitionConfig::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn rejects_non_positive_outlier_threshold() {
        let bad = VALID_YAML.replace(
            "  pause_if_any_flagged: true",
            "  pause_if_any_flagged: true\n  detect_outliers:\n    metric_name: focus_score\n    std_threshold: -1.0",
        );
        assert!(AcquisitionConfig::from_yaml_str(&bad).is_err());
    }
}
