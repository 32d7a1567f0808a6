//! Blob store key layout.

use chrono::NaiveDate;

use crate::domain::MonthWindow;

/// The single published-model pointer.
pub const LATEST_POINTER: &str = "latest.json";

pub const ROWS_RAW: &str = "rows_raw.jsonl";
pub const DATASET: &str = "dataset.jsonl";
pub const MANIFEST: &str = "manifest.json";

pub const MODEL_ARTIFACT: &str = "model.bin";
pub const MODEL_METRICS: &str = "metrics.json";
pub const FEATURE_SCHEMA: &str = "feature_schema.json";
pub const TRAINING_MANIFEST: &str = "training_manifest.json";

pub fn month_prefix(window: &MonthWindow) -> String {
    format!("snapshots/{}", window.label())
}

pub fn month_rows_key(window: &MonthWindow) -> String {
    format!("{}/{ROWS_RAW}", month_prefix(window))
}

pub fn month_manifest_key(window: &MonthWindow) -> String {
    format!("{}/{MANIFEST}", month_prefix(window))
}

pub fn rolling_prefix(months: u32, start: NaiveDate, end: NaiveDate) -> String {
    format!("snapshots/rolling_{months}m/{start}_{end}")
}

pub fn model_prefix(model_version: &str) -> String {
    format!("models/{model_version}")
}

pub fn model_key(model_version: &str, file: &str) -> String {
    format!("{}/{file}", model_prefix(model_version))
}
