//! Publish gate: is a candidate model good enough to replace the current one?
//!
//! Pure decision function. The orchestrator looks up the previous metrics and
//! feeds them in; nothing here performs I/O.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::domain::ModelMetrics;

pub const REASON_INSUFFICIENT_ROWS: &str = "insufficient_rows_trainable";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// One metric the gate compares between candidate and baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedMetric {
    /// Name used in reasons and details, e.g. `overall.mdape`.
    pub name: String,
    /// Dotted path into the metrics document.
    pub path: String,
    /// Maximum allowed relative increase as a fraction (0.05 = 5%).
    pub max_degrade: f64,
}

impl TrackedMetric {
    pub fn new(name: &str, path: &str, max_degrade: f64) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            max_degrade,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    pub min_rows_trainable: u64,
    pub metrics: Vec<TrackedMetric>,
}

impl GateConfig {
    /// Default tracked set with the given overall and house-segment limits.
    pub fn with_limits(min_rows_trainable: u64, overall: [f64; 3], enebolig: [f64; 3]) -> Self {
        let stats = ["mdape", "ae_p90", "wape"];
        let mut metrics = Vec::with_capacity(6);
        for (stat, limit) in stats.iter().zip(overall) {
            metrics.push(TrackedMetric::new(
                &format!("overall.{stat}"),
                &format!("overall.{stat}"),
                limit,
            ));
        }
        for (stat, limit) in stats.iter().zip(enebolig) {
            metrics.push(TrackedMetric::new(
                &format!("enebolig.{stat}"),
                &format!("by_realestate_type.enebolig.{stat}"),
                limit,
            ));
        }
        Self {
            min_rows_trainable,
            metrics,
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::with_limits(500, [0.05; 3], [0.10; 3])
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Ok,
    Degraded,
    MissingMetric,
}

/// Per-metric audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricCheck {
    pub status: MetricStatus,
    pub new: Option<f64>,
    pub prev: Option<f64>,
    /// Relative change; absent for a missing metric, `null` when infinite.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "finite_or_null",
        deserialize_with = "null_as_infinite"
    )]
    pub degrade: Option<f64>,
    pub max_degrade: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateDetails {
    pub rows_trainable: u64,
    pub min_rows_trainable: u64,
    pub baseline_present: bool,
    /// `name -> max_degrade`.
    pub thresholds: BTreeMap<String, f64>,
    pub metrics: BTreeMap<String, MetricCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub passed: bool,
    pub reasons: Vec<String>,
    pub details: GateDetails,
}

/// Why a gate did not pass. Both are expected outcomes, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum GateRejection {
    InsufficientData { rows_trainable: u64, min_rows: u64 },
    MetricDegradation { metrics: Vec<String> },
}

impl GateDecision {
    pub fn rejection(&self) -> Option<GateRejection> {
        if self.passed {
            return None;
        }
        if self.reasons.iter().any(|r| r == REASON_INSUFFICIENT_ROWS) {
            return Some(GateRejection::InsufficientData {
                rows_trainable: self.details.rows_trainable,
                min_rows: self.details.min_rows_trainable,
            });
        }
        let metrics = self
            .details
            .metrics
            .iter()
            .filter(|(_, c)| c.status == MetricStatus::Degraded)
            .map(|(name, _)| name.clone())
            .collect();
        Some(GateRejection::MetricDegradation { metrics })
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Relative change `(new - prev) / prev`; `+inf` when `prev == 0 < new`,
/// `0` when `prev == 0` otherwise.
pub fn relative_change(new: f64, prev: f64) -> f64 {
    if prev == 0.0 {
        if new > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    } else {
        (new - prev) / prev
    }
}

fn base_details(cfg: &GateConfig, rows_trainable: u64, baseline_present: bool) -> GateDetails {
    GateDetails {
        rows_trainable,
        min_rows_trainable: cfg.min_rows_trainable,
        baseline_present,
        thresholds: cfg
            .metrics
            .iter()
            .map(|m| (m.name.clone(), m.max_degrade))
            .collect(),
        metrics: BTreeMap::new(),
    }
}

/// Rejection for a dataset too small to train or compare on. No metrics are
/// read, so `baseline_present` is reported as `false`.
pub fn insufficient_rows(cfg: &GateConfig, rows_trainable: u64) -> GateDecision {
    GateDecision {
        passed: false,
        reasons: vec![REASON_INSUFFICIENT_ROWS.to_string()],
        details: base_details(cfg, rows_trainable, false),
    }
}

/// Row-count check alone: `Some(rejection)` below the configured minimum.
pub fn check_rows(cfg: &GateConfig, rows_trainable: u64) -> Option<GateDecision> {
    (rows_trainable < cfg.min_rows_trainable).then(|| insufficient_rows(cfg, rows_trainable))
}

/// Decide whether `new` may replace the model that produced `prev`.
pub fn evaluate(
    cfg: &GateConfig,
    rows_trainable: u64,
    new: &ModelMetrics,
    prev: Option<&ModelMetrics>,
) -> GateDecision {
    if let Some(mut rejected) = check_rows(cfg, rows_trainable) {
        rejected.details.baseline_present = prev.is_some();
        return rejected;
    }

    let mut details = base_details(cfg, rows_trainable, prev.is_some());

    let Some(prev) = prev else {
        return GateDecision {
            passed: true,
            reasons: Vec::new(),
            details,
        };
    };

    let mut reasons = Vec::new();
    for tracked in &cfg.metrics {
        let new_v = new.lookup(&tracked.path);
        let prev_v = prev.lookup(&tracked.path);
        let check = match (new_v, prev_v) {
            (Some(n), Some(p)) => {
                let degrade = relative_change(n, p);
                let status = if degrade > tracked.max_degrade {
                    reasons.push(format!(
                        "degraded:{}:{:.4} > {:.4}",
                        tracked.name, degrade, tracked.max_degrade
                    ));
                    MetricStatus::Degraded
                } else {
                    MetricStatus::Ok
                };
                MetricCheck {
                    status,
                    new: new_v,
                    prev: prev_v,
                    degrade: Some(degrade),
                    max_degrade: tracked.max_degrade,
                }
            }
            _ => MetricCheck {
                status: MetricStatus::MissingMetric,
                new: new_v,
                prev: prev_v,
                degrade: None,
                max_degrade: tracked.max_degrade,
            },
        };
        details.metrics.insert(tracked.name.clone(), check);
    }

    GateDecision {
        passed: reasons.is_empty(),
        reasons,
        details,
    }
}

fn finite_or_null<S: Serializer>(v: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(x) if x.is_finite() => s.serialize_some(x),
        _ => s.serialize_none(),
    }
}

fn null_as_infinite<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(Some(Option::<f64>::deserialize(d)?.unwrap_or(f64::INFINITY)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metrics(mdape: f64, ae_p90: f64, wape: f64) -> ModelMetrics {
        ModelMetrics::new(json!({
            "overall": {"mdape": mdape, "ae_p90": ae_p90, "wape": wape},
            "by_realestate_type": {
                "enebolig": {"mdape": mdape, "ae_p90": ae_p90, "wape": wape}
            }
        }))
    }

    #[test]
    fn test_no_baseline_passes() {
        let d = evaluate(&GateConfig::default(), 500, &metrics(0.1, 1.0, 0.1), None);
        assert!(d.passed);
        assert!(d.reasons.is_empty());
        assert!(!d.details.baseline_present);
        assert_eq!(d.rejection(), None);
    }

    #[test]
    fn test_insufficient_rows_short_circuits() {
        let new = metrics(9.0, 9.0, 9.0);
        let prev = metrics(0.1, 0.1, 0.1);
        let d = evaluate(&GateConfig::default(), 499, &new, Some(&prev));
        assert!(!d.passed);
        assert_eq!(d.reasons, vec![REASON_INSUFFICIENT_ROWS.to_string()]);
        assert!(d.details.metrics.is_empty());
        assert_eq!(
            d.rejection(),
            Some(GateRejection::InsufficientData {
                rows_trainable: 499,
                min_rows: 500
            })
        );
    }

    #[test]
    fn test_identical_metrics_pass() {
        let m = metrics(0.12, 350_000.0, 0.15);
        let d = evaluate(&GateConfig::default(), 10_000, &m, Some(&m));
        assert!(d.passed, "{:?}", d.reasons);
        assert!(d
            .details
            .metrics
            .values()
            .all(|c| c.status == MetricStatus::Ok && c.degrade == Some(0.0)));
    }

    #[test]
    fn test_doubling_overall_metric_fails_naming_it() {
        let prev = metrics(0.10, 1.0, 0.10);
        let mut new = prev.clone();
        new.0["overall"]["mdape"] = json!(0.20);
        let d = evaluate(&GateConfig::default(), 1_000, &new, Some(&prev));
        assert!(!d.passed);
        assert_eq!(d.reasons.len(), 1);
        assert_eq!(d.reasons[0], "degraded:overall.mdape:1.0000 > 0.0500");
        let check = &d.details.metrics["overall.mdape"];
        assert_eq!(check.new, Some(0.20));
        assert_eq!(check.prev, Some(0.10));
        assert_eq!(
            d.rejection(),
            Some(GateRejection::MetricDegradation {
                metrics: vec!["overall.mdape".to_string()]
            })
        );
    }

    #[test]
    fn test_segment_threshold_is_independent() {
        let prev = metrics(0.10, 1.0, 0.10);
        let mut new = prev.clone();
        // +8%: over the overall limit, under the house-segment limit.
        new.0["by_realestate_type"]["enebolig"]["wape"] = json!(0.108);
        let d = evaluate(&GateConfig::default(), 1_000, &new, Some(&prev));
        assert!(d.passed, "{:?}", d.reasons);

        new.0["overall"]["wape"] = json!(0.108);
        let d = evaluate(&GateConfig::default(), 1_000, &new, Some(&prev));
        assert!(!d.passed);
        assert!(d.reasons[0].starts_with("degraded:overall.wape:"));
    }

    #[test]
    fn test_improvement_passes() {
        let prev = metrics(0.2, 2.0, 0.2);
        let new = metrics(0.1, 1.0, 0.1);
        assert!(evaluate(&GateConfig::default(), 1_000, &new, Some(&prev)).passed);
    }

    #[test]
    fn test_missing_metric_is_recorded_not_failed() {
        let prev = ModelMetrics::new(json!({"overall": {"mdape": 0.1, "ae_p90": 1.0, "wape": 0.1}}));
        let new = metrics(0.1, 1.0, 0.1);
        let d = evaluate(&GateConfig::default(), 1_000, &new, Some(&prev));
        assert!(d.passed);
        let check = &d.details.metrics["enebolig.mdape"];
        assert_eq!(check.status, MetricStatus::MissingMetric);
        assert_eq!(check.prev, None);
        assert_eq!(check.new, Some(0.1));

        let v = serde_json::to_value(check).unwrap();
        assert!(v.get("degrade").is_none());
        let back: MetricCheck = serde_json::from_value(v).unwrap();
        assert_eq!(back.degrade, None);
    }

    #[test]
    fn test_zero_baseline() {
        assert_eq!(relative_change(0.5, 0.0), f64::INFINITY);
        assert_eq!(relative_change(0.0, 0.0), 0.0);
        assert!((relative_change(0.15, 0.10) - 0.5).abs() < 1e-9);

        let prev = metrics(0.0, 1.0, 0.1);
        let new = metrics(0.01, 1.0, 0.1);
        let d = evaluate(&GateConfig::default(), 1_000, &new, Some(&prev));
        assert!(!d.passed);
        assert!(d.reasons.iter().any(|r| r == "degraded:overall.mdape:inf > 0.0500"));
    }

    #[test]
    fn test_infinite_degrade_serialises_as_null() {
        let prev = metrics(0.0, 1.0, 0.1);
        let new = metrics(0.01, 1.0, 0.1);
        let d = evaluate(&GateConfig::default(), 1_000, &new, Some(&prev));
        let v = serde_json::to_value(&d).unwrap();
        assert!(v["details"]["metrics"]["overall.mdape"]["degrade"].is_null());
        assert_eq!(v["details"]["metrics"]["overall.wape"]["degrade"], 0.0);
        let back: GateDecision = serde_json::from_value(v).unwrap();
        assert_eq!(
            back.details.metrics["overall.mdape"].degrade,
            Some(f64::INFINITY)
        );
    }

    #[test]
    fn test_thresholds_recorded_in_details() {
        let d = evaluate(&GateConfig::default(), 0, &metrics(0.1, 1.0, 0.1), None);
        assert_eq!(d.details.thresholds.len(), 6);
        assert_eq!(d.details.thresholds["enebolig.ae_p90"], 0.10);
        assert_eq!(d.details.min_rows_trainable, 500);
    }

    #[test]
    fn test_check_rows_matches_evaluate() {
        let cfg = GateConfig::default();
        assert!(check_rows(&cfg, 500).is_none());

        let d = check_rows(&cfg, 1).unwrap();
        assert!(!d.passed);
        assert_eq!(d.reasons, vec![REASON_INSUFFICIENT_ROWS.to_string()]);
        assert!(d.details.metrics.is_empty());
        assert_eq!(
            d.rejection(),
            Some(GateRejection::InsufficientData {
                rows_trainable: 1,
                min_rows: 500
            })
        );

        let m = metrics(0.1, 1.0, 0.1);
        assert_eq!(evaluate(&cfg, 1, &m, None), d);
    }
}
