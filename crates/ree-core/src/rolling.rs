//! Rolling snapshot assembly: month snapshots -> merged, validated dataset.
//!
//! Rebuilt from scratch on every run. The result is persisted under
//! `snapshots/rolling_{N}m/{start}_{end}/` for the trainer and for audit,
//! but nothing in the pipeline reads it back.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ree_store::{get_jsonl, put_json, put_jsonl, BlobStore};

use crate::dataset;
use crate::dedup;
use crate::domain::manifest::SOURCE_ROLLING;
use crate::domain::{
    Period, RawRecord, Result, SnapshotManifest, SourceMonth, TrainableRow, WindowInfo,
};
use crate::keys;
use crate::snapshot::MonthSnapshot;
use crate::window::rolling_span;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingSnapshotRef {
    pub prefix: String,
    pub raw_rows_key: String,
    pub dataset_key: String,
    pub manifest_key: String,
}

impl RollingSnapshotRef {
    pub fn new(months: u32, start: NaiveDate, end: NaiveDate) -> Self {
        let prefix = keys::rolling_prefix(months, start, end);
        Self {
            raw_rows_key: format!("{prefix}/{}", keys::ROWS_RAW),
            dataset_key: format!("{prefix}/{}", keys::DATASET),
            manifest_key: format!("{prefix}/{}", keys::MANIFEST),
            prefix,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RollingSnapshot {
    pub reference: RollingSnapshotRef,
    pub manifest: SnapshotManifest,
    pub rows: Vec<TrainableRow>,
}

/// Merge `months` (oldest first), validate, and persist the result.
pub async fn build_rolling_snapshot(
    store: &dyn BlobStore,
    months: &[MonthSnapshot],
    as_of: NaiveDate,
    window_months: u32,
) -> Result<RollingSnapshot> {
    let (start, end) = rolling_span(as_of, window_months)?;
    let reference = RollingSnapshotRef::new(window_months, start, end);

    let mut batches: Vec<Vec<RawRecord>> = Vec::with_capacity(months.len());
    for m in months {
        batches.push(get_jsonl(store, &m.raw_rows_key).await?);
    }

    let (deduped, stats) = dedup::merge_with_stats(&batches);
    let built = dataset::build(&deduped);

    let mut manifest = SnapshotManifest::new(Period { start, end }, SOURCE_ROLLING, Utc::now());
    manifest.window = Some(WindowInfo {
        months: window_months,
        as_of,
    });
    manifest.set_count("rows_raw_total", stats.total as u64);
    manifest.set_count("rows_unparseable_date", stats.unparseable_date as u64);
    manifest.set_count("rows_raw_deduped", stats.deduped as u64);
    manifest.set_count("rows_trainable", built.trainable.len() as u64);
    manifest.dropped_reasons = built.dropped;
    manifest.source_months = months
        .iter()
        .map(|m| SourceMonth {
            start_date: m.window.start,
            end_date: m.window.end,
            raw_rows_key: m.raw_rows_key.clone(),
            manifest_key: m.manifest_key.clone(),
        })
        .collect();

    put_jsonl(store, &reference.raw_rows_key, &deduped).await?;
    put_jsonl(store, &reference.dataset_key, &built.trainable).await?;
    put_json(store, &reference.manifest_key, &manifest).await?;

    Ok(RollingSnapshot {
        reference,
        manifest,
        rows: built.trainable,
    })
}
