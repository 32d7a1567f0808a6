//! Trainer seam, error statistics, and the baseline trainer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::{ModelMetrics, PipelineError, RealEstateType, Result, TrainableRow};

/// What a trainer hands back: the opaque artifact plus its evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOutput {
    pub artifact: Vec<u8>,
    pub metrics: ModelMetrics,
    pub feature_schema: Value,
}

/// Fits a model on trainable rows.
#[async_trait]
pub trait Trainer: Send + Sync {
    /// Recorded as `type` in the published pointer.
    fn model_type(&self) -> &str;

    async fn train(&self, rows: &[TrainableRow]) -> Result<TrainOutput>;
}

// ---------------------------------------------------------------------------
// Error statistics
// ---------------------------------------------------------------------------

/// Error statistics over one evaluation set. Undefined values are NaN and
/// serialise as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    pub mae: f64,
    pub rmse: f64,
    /// Mean absolute percentage error (fraction).
    pub mape: f64,
    /// Median absolute percentage error (fraction).
    pub mdape: f64,
    /// 90th percentile of absolute error.
    pub ae_p90: f64,
    /// Weighted absolute percentage error: sum |err| / sum |y|.
    pub wape: f64,
}

pub fn compute_error_stats(y_true: &[f64], y_pred: &[f64]) -> ErrorStats {
    let n = y_true.len().min(y_pred.len());
    if n == 0 {
        return ErrorStats {
            mae: f64::NAN,
            rmse: f64::NAN,
            mape: f64::NAN,
            mdape: f64::NAN,
            ae_p90: f64::NAN,
            wape: f64::NAN,
        };
    }

    let abs_err: Vec<f64> = (0..n).map(|i| (y_true[i] - y_pred[i]).abs()).collect();
    let mae = abs_err.iter().sum::<f64>() / n as f64;
    let rmse = (abs_err.iter().map(|e| e * e).sum::<f64>() / n as f64).sqrt();

    let pct: Vec<f64> = (0..n)
        .filter(|&i| y_true[i].abs() > 1e-9)
        .map(|i| abs_err[i] / y_true[i].abs())
        .collect();
    let mape = if pct.is_empty() {
        f64::NAN
    } else {
        pct.iter().sum::<f64>() / pct.len() as f64
    };
    let mdape = quantile(&pct, 0.5);

    let denom: f64 = y_true[..n].iter().map(|y| y.abs()).sum();
    let wape = if denom > 0.0 {
        abs_err.iter().sum::<f64>() / denom
    } else {
        f64::NAN
    };

    ErrorStats {
        mae,
        rmse,
        mape,
        mdape,
        ae_p90: quantile(&abs_err, 0.9),
        wape,
    }
}

/// Linear-interpolated quantile; NaN for empty input.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

// ---------------------------------------------------------------------------
// Baseline trainer
// ---------------------------------------------------------------------------

pub const BASELINE_MODEL_TYPE: &str = "baseline_ppsqm";

/// Fewer rows cannot be split into a fit set and an evaluation set.
pub const MIN_TRAIN_ROWS: usize = 2;

/// Median price per square metre of usable area, per category.
///
/// Deterministic: rows are split 80/20 by a hash of the entity id, so the
/// same dataset always yields the same artifact and metrics.
#[derive(Debug, Clone, Default)]
pub struct BaselineTrainer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineModel {
    pub model_family: String,
    pub global_ppsqm: f64,
    pub ppsqm: BTreeMap<RealEstateType, f64>,
}

impl BaselineModel {
    pub fn fit(rows: &[&TrainableRow]) -> Self {
        let mut by_type: BTreeMap<RealEstateType, Vec<f64>> = BTreeMap::new();
        let mut all = Vec::with_capacity(rows.len());
        for r in rows {
            let v = r.price / r.bra;
            by_type.entry(r.realestate_type).or_default().push(v);
            all.push(v);
        }
        Self {
            model_family: BASELINE_MODEL_TYPE.to_string(),
            global_ppsqm: quantile(&all, 0.5),
            ppsqm: by_type
                .into_iter()
                .map(|(t, vs)| (t, quantile(&vs, 0.5)))
                .collect(),
        }
    }

    pub fn predict(&self, row: &TrainableRow) -> f64 {
        let rate = self
            .ppsqm
            .get(&row.realestate_type)
            .copied()
            .unwrap_or(self.global_ppsqm);
        rate * row.bra
    }
}

/// True for roughly one row in five.
fn in_holdout(id: i64) -> bool {
    let mut z = (id as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (z ^ (z >> 31)) % 5 == 0
}

#[async_trait]
impl Trainer for BaselineTrainer {
    fn model_type(&self) -> &str {
        BASELINE_MODEL_TYPE
    }

    async fn train(&self, rows: &[TrainableRow]) -> Result<TrainOutput> {
        if rows.len() < MIN_TRAIN_ROWS {
            return Err(PipelineError::InsufficientTrainingData {
                rows: rows.len(),
                min: MIN_TRAIN_ROWS,
            });
        }

        let (mut test, mut train): (Vec<&TrainableRow>, Vec<&TrainableRow>) =
            rows.iter().partition(|r| in_holdout(r.id));
        if train.is_empty() {
            std::mem::swap(&mut train, &mut test);
        }
        let in_sample = test.is_empty();
        if in_sample {
            test = train.clone();
        }

        let model = BaselineModel::fit(&train);

        let y_true: Vec<f64> = test.iter().map(|r| r.price).collect();
        let y_pred: Vec<f64> = test.iter().map(|r| model.predict(r)).collect();
        let overall = compute_error_stats(&y_true, &y_pred);

        let mut groups: BTreeMap<RealEstateType, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for (i, r) in test.iter().enumerate() {
            let g = groups.entry(r.realestate_type).or_default();
            g.0.push(y_true[i]);
            g.1.push(y_pred[i]);
        }
        let by_type: BTreeMap<String, ErrorStats> = groups
            .into_iter()
            .map(|(t, (yt, yp))| (t.to_string(), compute_error_stats(&yt, &yp)))
            .collect();

        let metrics = json!({
            "overall": overall,
            "by_realestate_type": by_type,
            "n_train": train.len(),
            "n_test": if in_sample { 0 } else { test.len() },
            "in_sample": in_sample,
            "model_family": BASELINE_MODEL_TYPE,
        });

        let feature_schema = json!({
            "categorical": ["realestate_type"],
            "numeric": ["bra"],
            "label": "price",
        });

        Ok(TrainOutput {
            artifact: serde_json::to_vec(&model)?,
            metrics: ModelMetrics::new(metrics),
            feature_schema,
        })
    }
}
