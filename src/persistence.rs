//! On-disk layout helpers: per-timepoint `qc_metrics.csv` and the run-level
//! `qc_summary.json` roll-up.

use crate::error::Result;
use crate::types::FovMetricsRow;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Write a CSV snapshot with the fixed column order:
/// `region_id, fov_index, timestamp, z_position_um, focus_score,
/// laser_af_displacement_um, z_diff_from_last_timepoint_um, error`.
/// Missing values are written as empty strings.
pub fn write_metrics_csv(rows: &[FovMetricsRow], path: impl AsRef<Path>) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "region_id",
        "fov_index",
        "timestamp",
        "z_position_um",
        "focus_score",
        "laser_af_displacement_um",
        "z_diff_from_last_timepoint_um",
        "error",
    ])?;
    for row in rows {
        writer.write_record(&[
            row.region_id.clone(),
            row.fov_index.to_string(),
            row.timestamp.clone(),
            row.z_position_um.to_string(),
            row.focus_score.map(|v| v.to_string()).unwrap_or_default(),
            row.laser_af_displacement_um
                .map(|v| v.to_string())
                .unwrap_or_default(),
            row.z_diff_from_last_timepoint_um
                .map(|v| v.to_string())
                .unwrap_or_default(),
            row.error.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Read back a `qc_metrics.csv` written by [`write_metrics_csv`]. Used by
/// the round-trip property tests.
pub fn read_metrics_csv(path: impl AsRef<Path>) -> Result<Vec<FovMetricsRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(FovMetricsRow {
            region_id: record[0].to_string(),
            fov_index: record[1].parse().unwrap_or_default(),
            timestamp: record[2].to_string(),
            z_position_um: record[3].parse().unwrap_or_default(),
            focus_score: record[4].parse().ok(),
            laser_af_displacement_um: record[5].parse().ok(),
            z_diff_from_last_timepoint_um: record[6].parse().ok(),
            error: if record[7].is_empty() {
                None
            } else {
                Some(record[7].to_string())
            },
        });
    }
    Ok(rows)
}

/// One timepoint's entry in the run-level roll-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimepointSummary {
    /// Timepoint index this entry describes.
    pub timepoint: u32,
    /// Number of FOVs recorded in this timepoint's store.
    pub fov_count: usize,
    /// Number of FOVs flagged by policy evaluation.
    pub flagged_count: usize,
    /// Whether policy evaluation requested a pause for this timepoint.
    pub should_pause: bool,
}

/// Accumulates per-timepoint summaries across a run and flushes them to
/// `qc_summary.json`. The one piece of cross-timepoint state this crate
/// keeps: a compact roll-up, not the full per-FOV metric history.
#[derive(Debug, Default)]
pub struct SummaryRollup {
    entries: Vec<TimepointSummary>,
}

impl SummaryRollup {
    /// Construct an empty roll-up.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one timepoint's summary.
    pub fn push(&mut self, entry: TimepointSummary) {
        self.entries.push(entry);
    }

    /// Write the accumulated roll-up to `{experiment_path}/qc_summary.json`.
    pub fn flush(&self, experiment_path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = experiment_path.as_ref().join("qc_summary.json");
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

/// The directory a given timepoint's artifacts live under.
pub fn timepoint_dir(experiment_path: impl AsRef<Path>, timepoint: u32) -> PathBuf {
    experiment_path.as_ref().join(format!("{timepoint:03}"))
}

/// The `images/` subdirectory for a given timepoint.
pub fn images_dir(experiment_path: impl AsRef<Path>, timepoint: u32) -> PathBuf {
    timepoint_dir(experiment_path, timepoint).join("images")
}

/// The `qc_metrics.csv` path for a given timepoint.
pub fn qc_metrics_path(experiment_path: impl AsRef<Path>, timepoint: u32) -> PathBuf {
    timepoint_dir(experiment_path, timepoint).join("qc_metrics.csv")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_round_trip_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qc_metrics.csv");
        let rows = vec![FovMetricsRow {
            region_id: "A".into(),
            fov_index: 1,
            timestamp: "2024-01-01T00:00:00Z".into(),
            z_position_um: 12.5,
            focus_score: Some(150.25),
            laser_af_displacement_um: None,
            z_diff_from_last_timepoint_um: Some(-3.0),
            error: None,
        }];
        write_metrics_csv(&rows, &path).unwrap();
        let read_back = read_metrics_csv(&path).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].region_id, "A");
        assert_eq!(read_back[0].focus_score, Some(150.25));
        assert_eq!(read_back[0].laser_af_displacement_um, None);
    }

    #[test]
    fn summary_rollup_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut rollup = SummaryRollup::new();
        rollup.push(TimepointSummary {
            timepoint: 0,
            fov_count: 3,
            flagged_count: 1,
            should_pause: true,
        });
        let path = rollup.flush(dir.path()).unwrap();
        assert!(path.exists());
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("\"flagged_count\": 1"));
    }
}
