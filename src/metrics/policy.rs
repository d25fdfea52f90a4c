//! QC policy evaluation: threshold, drift, and outlier rules over a store
//! snapshot.

use crate::config::PolicyConfig;
use crate::metrics::store::MetricsStore;
use crate::types::FovId;
use std::collections::BTreeMap;

/// Result of evaluating policy rules once at the end of a timepoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDecision {
    /// FOVs flagged by any rule, in first-flagged order.
    pub flagged: Vec<FovId>,
    /// Human-readable reasons per flagged FOV, in rule-evaluation order.
    pub reasons: BTreeMap<FovId, Vec<String>>,
    /// Whether the decision should trigger a pause.
    pub should_pause: bool,
}

impl PolicyDecision {
    fn flag(&mut self, fov: &FovId, reason: String) {
        if !self.flagged.contains(fov) {
            self.flagged.push(fov.clone());
        }
        self.reasons.entry(fov.clone()).or_default().push(reason);
    }
}

/// A pure function evaluating `config`'s rules over `store`. Never mutates
/// the store and never touches the state machine directly; the caller is
/// responsible for propagating `should_pause` to `request_pause()`.
pub fn check_timepoint(store: &MetricsStore, config: &PolicyConfig) -> PolicyDecision {
    let mut decision = PolicyDecision::default();
    if !config.enabled {
        return decision;
    }

    let entries = store.get_all();

    for metrics in &entries {
        if let Some(min) = config.focus_score_min {
            if let Some(score) = metrics.focus_score {
                if score < min {
                    decision.flag(
                        &metrics.fov_id,
                        format!("focus_score={score:.2} < {min:.1}"),
                    );
                }
            }
        }
        if let Some(max) = config.z_drift_max_um {
            if let Some(drift) = metrics.z_diff_from_last_timepoint_um {
                if drift.abs() > max {
                    decision.flag(
                        &metrics.fov_id,
                        format!("z_drift={drift:.2} um > {max:.1}"),
                    );
                }
            }
        }
    }

    if let Some(rule) = &config.detect_outliers {
        let values = store.get_metric_values(&rule.metric_name);
        if values.len() >= 3 {
            let n = values.len() as f64;
            let mean_val: f64 = values.values().sum::<f64>() / n;
            let variance: f64 =
                values.values().map(|v| (v - mean_val).powi(2)).sum::<f64>() / n;
            let stddev = variance.sqrt();
            let limit = rule.std_threshold * stddev;
            for entry in &entries {
                if let Some(v) = values.get(&entry.fov_id) {
                    if (v - mean_val).abs() > limit {
                        decision.flag(&entry.fov_id, format!("outlier in {}", rule.metric_name));
                    }
                }
            }
        }
    }

    decision.should_pause = config.pause_if_any_flagged && !decision.flagged.is_empty();
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutlierRule;
    use chrono::Utc;
    use crate::types::FovMetrics;

    fn metrics(fov: FovId, focus: Option<f64>, z_diff: Option<f64>) -> FovMetrics {
        FovMetrics {
            fov_id: fov,
            timestamp: Utc::now(),
            z_position_um: 0.0,
            focus_score: focus,
            laser_af_displacement_um: None,
            z_diff_from_last_timepoint_um: z_diff,
            error: None,
        }
    }

    #[test]
    fn flags_low_focus_score_with_exact_reason_text() {
        let store = MetricsStore::new(0);
        store.add(metrics(FovId::new("A", 0), Some(150.0), None));
        store.add(metrics(FovId::new("A", 1), Some(40.0), None));
        store.add(metrics(FovId::new("A", 2), Some(200.0), None));

        let cfg = PolicyConfig {
            enabled: true,
            focus_score_min: Some(100.0),
            z_drift_max_um: None,
            detect_outliers: None,
            pause_if_any_flagged: true,
        };
        let decision = check_timepoint(&store, &cfg);
        assert_eq!(decision.flagged, vec![FovId::new("A", 1)]);
        assert_eq!(
            decision.reasons[&FovId::new("A", 1)],
            vec!["focus_score=40.00 < 100.0".to_string()]
        );
        assert!(decision.should_pause);
    }

    #[test]
    fn disabled_policy_never_flags() {
        let store = MetricsStore::new(0);
        store.add(metrics(FovId::new("A", 0), Some(0.0), None));
        let cfg = PolicyConfig {
            enabled: false,
            focus_score_min: Some(100.0),
            z_drift_max_um: None,
            detect_outliers: None,
            pause_if_any_flagged: true,
        };
        let decision = check_timepoint(&store, &cfg);
        assert!(decision.flagged.is_empty());
        assert!(!decision.should_pause);
    }

    #[test]
    fn outlier_rule_uses_strict_greater_than() {
        // scores [100,100,100,100,400]; mean=160, stddev=120, threshold*stddev=240
        // deviation of 400 from mean is exactly 240 -> must NOT flag (strict >).
        let store = MetricsStore::new(0);
        for (i, v) in [100.0, 100.0, 100.0, 100.0, 400.0].iter().enumerate() {
            store.add(metrics(FovId::new("A", i as u32), Some(*v), None));
        }
        let cfg = PolicyConfig {
            enabled: true,
            focus_score_min: None,
            z_drift_max_um: None,
            detect_outliers: Some(OutlierRule {
                metric_name: "focus_score".into(),
                std_threshold: 2.0,
            }),
            pause_if_any_flagged: true,
        };
        let decision = check_timepoint(&store, &cfg);
        assert!(decision.flagged.is_empty());
    }

    #[test]
    fn outlier_rule_flags_clear_outlier() {
        let store = MetricsStore::new(0);
        for (i, v) in [100.0, 102.0, 98.0, 101.0, 900.0].iter().enumerate() {
            store.add(metrics(FovId::new("A", i as u32), Some(*v), None));
        }
        let cfg = PolicyConfig {
            enabled: true,
            focus_score_min: None,
            z_drift_max_um: None,
            detect_outliers: Some(OutlierRule {
                metric_name: "focus_score".into(),
                std_threshold: 1.0,
            }),
            pause_if_any_flagged: false,
        };
        let decision = check_timepoint(&store, &cfg);
        assert_eq!(decision.flagged, vec![FovId::new("A", 4)]);
        assert!(!decision.should_pause);
    }

    #[test]
    fn z_drift_flags_beyond_threshold() {
        let store = MetricsStore::new(0);
        store.add(metrics(FovId::new("A", 0), None, Some(2.0)));
        store.add(metrics(FovId::new("A", 1), None, Some(10.0)));
        let cfg = PolicyConfig {
            enabled: true,
            focus_score_min: None,
            z_drift_max_um: Some(5.0),
            detect_outliers: None,
            pause_if_any_flagged: true,
        };
        let decision = check_timepoint(&store, &cfg);
        assert_eq!(decision.flagged, vec![FovId::new("A", 1)]);
    }
}
