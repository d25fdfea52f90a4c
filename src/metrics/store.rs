//! Thread-safe per-timepoint mapping from FOV identifier to its metrics.

use crate::error::Result;
use crate::types::{FovId, FovMetrics, FovMetricsRow};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Holds the metrics collected for one timepoint. Safe to share across the
/// thread that delivers job results and any thread reading a snapshot.
pub struct MetricsStore {
    timepoint: u32,
    entries: RwLock<BTreeMap<FovId, FovMetrics>>,
}

impl MetricsStore {
    /// Construct an empty store scoped to `timepoint`.
    pub fn new(timepoint: u32) -> Self {
        Self {
            timepoint,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Index of the timepoint this store is scoped to.
    pub fn timepoint(&self) -> u32 {
        self.timepoint
    }

    /// Insert or replace the metrics for one FOV.
    pub fn add(&self, metrics: FovMetrics) {
        debug!(fov = %metrics.fov_id, "metrics recorded");
        self.entries.write().insert(metrics.fov_id.clone(), metrics);
    }

    /// Look up one FOV's metrics.
    pub fn get(&self, fov_id: &FovId) -> Option<FovMetrics> {
        self.entries.read().get(fov_id).cloned()
    }

    /// Ordered snapshot of every entry (region ascending, then fov_index).
    pub fn get_all(&self) -> Vec<FovMetrics> {
        self.entries.read().values().cloned().collect()
    }

    /// Number of distinct FOVs recorded.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot map of non-null values for a named metric field.
    pub fn get_metric_values(&self, metric_name: &str) -> BTreeMap<FovId, f64> {
        let entries = self.entries.read();
        entries
            .values()
            .filter_map(|m| extract_field(m, metric_name).map(|v| (m.fov_id.clone(), v)))
            .collect()
    }

    /// Ordered rows, ready to hand to the CSV writer or in-process analysis.
    pub fn to_frame(&self) -> Vec<FovMetricsRow> {
        self.entries.read().values().map(FovMetricsRow::from).collect()
    }

    /// Write a CSV snapshot with one row per FOV, fixed column order.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        crate::persistence::write_metrics_csv(&self.to_frame(), path)
    }
}

fn extract_field(m: &FovMetrics, field: &str) -> Option<f64> {
    match field {
        "focus_score" => m.focus_score,
        "laser_af_displacement_um" => m.laser_af_displacement_um,
        "z_diff_from_last_timepoint_um" => m.z_diff_from_last_timepoint_um,
        "z_position_um" => Some(m.z_position_um),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(fov: FovId, focus: Option<f64>) -> FovMetrics {
        FovMetrics {
            fov_id: fov,
            timestamp: Utc::now(),
            z_position_um: 10.0,
            focus_score: focus,
            laser_af_displacement_um: None,
            z_diff_from_last_timepoint_um: None,
            error: None,
        }
    }

    #[test]
    fn add_replaces_existing_entry_for_same_fov() {
        let store = MetricsStore::new(0);
        let fov = FovId::new("A", 0);
        store.add(sample(fov.clone(), Some(10.0)));
        store.add(sample(fov.clone(), Some(20.0)));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&fov).unwrap().focus_score, Some(20.0));
    }

    #[test]
    fn get_metric_values_filters_nulls() {
        let store = MetricsStore::new(0);
        store.add(sample(FovId::new("A", 0), Some(5.0)));
        store.add(sample(FovId::new("A", 1), None));
        let values = store.get_metric_values("focus_score");
        assert_eq!(values.len(), 1);
    }
}
