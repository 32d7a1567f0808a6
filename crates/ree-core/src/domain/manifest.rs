//! Snapshot manifests.
//!
//! Month snapshots and rolling snapshots share one manifest shape; the
//! rolling-only parts (`window`, `source_months`) are empty for a month.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::window::MonthWindow;

pub const SOURCE_MONTHLY: &str = "monthly_snapshot";
pub const SOURCE_ROLLING: &str = "rolling_snapshot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(alias = "start_date")]
    pub start: NaiveDate,
    #[serde(alias = "end_date")]
    pub end: NaiveDate,
}

impl From<MonthWindow> for Period {
    fn from(w: MonthWindow) -> Self {
        Self {
            start: w.start,
            end: w.end,
        }
    }
}

/// The trailing window a rolling snapshot was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub months: u32,
    pub as_of: NaiveDate,
}

/// One month snapshot consumed by a rolling build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMonth {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub raw_rows_key: String,
    pub manifest_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub period: Period,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowInfo>,
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub dropped_reasons: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_months: Vec<SourceMonth>,
    pub source: String,
    #[serde(alias = "fetched_at")]
    pub created_at: DateTime<Utc>,
}

impl SnapshotManifest {
    pub fn new(period: Period, source: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            period,
            window: None,
            counts: BTreeMap::new(),
            dropped_reasons: BTreeMap::new(),
            source_months: Vec::new(),
            source: source.to_string(),
            created_at,
        }
    }

    pub fn count(&self, name: &str) -> u64 {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn set_count(&mut self, name: &str, value: u64) {
        self.counts.insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_manifest_omits_rolling_fields() {
        let w = MonthWindow::for_month(2026, 1).unwrap();
        let mut m = SnapshotManifest::new(w.into(), SOURCE_MONTHLY, Utc::now());
        m.set_count("rows_raw", 12);
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["period"]["start"], "2026-01-01");
        assert_eq!(v["counts"]["rows_raw"], 12);
        assert!(v.get("window").is_none());
        assert!(v.get("source_months").is_none());
    }

    #[test]
    fn test_fetched_at_alias() {
        let json = r#"{
            "period": {"start_date": "2026-01-01", "end_date": "2026-01-31"},
            "counts": {"rows_raw": 3},
            "source": "monthly_snapshot",
            "fetched_at": "2026-02-01T03:05:00Z"
        }"#;
        let m: SnapshotManifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.count("rows_raw"), 3);
        assert_eq!(m.count("absent"), 0);
        assert!(m.dropped_reasons.is_empty());
    }
}
