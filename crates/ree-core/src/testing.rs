//! Test doubles: a scripted upstream source, a fixed trainer and record
//! builders. Used by unit tests here and by the integration tests.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Days;
use serde_json::{json, Map, Value};

use crate::domain::{
    ModelMetrics, MonthWindow, PipelineError, RawRecord, RealEstateType, Result, TrainableRow,
};
use crate::source::{ApiConfig, UpstreamSource};
use crate::trainer::{TrainOutput, Trainer};

const CADASTRAL_OFFSET: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A record that passes every dataset rule.
pub fn valid_record(id: i64, date: &str) -> RawRecord {
    RawRecord::new(id, date)
        .with("price", 3_000_000 + id * 1_000)
        .with("realestate_type", "enebolig")
        .with("municipality_number", 301)
        .with("lat", 59.91)
        .with("lon", 10.75)
        .with("built_year", 1990)
        .with("bra", 120.0)
        .with("total_area", 140.0)
}

/// Valid records for `ids`, dated inside `window`.
pub fn month_rows(window: MonthWindow, ids: Range<i64>) -> Vec<RawRecord> {
    ids.map(|id| {
        let offset = (id.rem_euclid(28)) as u64;
        let date = window
            .start
            .checked_add_days(Days::new(offset))
            .unwrap_or(window.start);
        valid_record(id, &date.to_string())
    })
    .collect()
}

pub fn trainable_row(id: i64) -> TrainableRow {
    let realestate_type = if id % 3 == 0 {
        RealEstateType::Rekkehus
    } else {
        RealEstateType::Enebolig
    };
    let bra = 60.0 + (id % 90) as f64;
    TrainableRow {
        id,
        turnover_date: Some("2026-01-15".to_string()),
        price: bra * (50_000.0 + ((id * 7919) % 20_000) as f64),
        realestate_type,
        municipality_number: json!(301),
        lat: 59.9,
        lon: 10.7,
        built_year: 1990,
        bra,
        total_area: bra + 10.0,
        floor: None,
        extra: Map::new(),
    }
}

/// A metrics document with the same stats overall and for houses.
pub fn metrics_doc(mdape: f64, ae_p90: f64, wape: f64) -> ModelMetrics {
    let stats = json!({"mdape": mdape, "ae_p90": ae_p90, "wape": wape});
    ModelMetrics::new(json!({
        "overall": stats,
        "by_realestate_type": {"enebolig": stats},
    }))
}

// ---------------------------------------------------------------------------
// ScriptedSource
// ---------------------------------------------------------------------------

/// Upstream fake serving scripted months.
///
/// `with_month` turns records into the three upstream responses (turnovers,
/// units, estimation params) so that acquisition reproduces them.
#[derive(Default)]
pub struct ScriptedSource {
    turnovers: Mutex<HashMap<MonthWindow, Vec<Value>>>,
    units: Mutex<Map<String, Value>>,
    params: Mutex<Map<String, Value>>,
    failures: Mutex<HashMap<MonthWindow, u32>>,
    calls: Mutex<HashMap<MonthWindow, u32>>,
    latency: Mutex<Option<Duration>>,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_month(self, window: MonthWindow, rows: Vec<RawRecord>) -> Self {
        self.set_month(window, rows);
        self
    }

    /// Replace the month's listing.
    pub fn set_month(&self, window: MonthWindow, rows: Vec<RawRecord>) {
        let mut turnovers = Vec::with_capacity(rows.len());
        let mut units = lock(&self.units);
        let mut params = lock(&self.params);
        for r in rows {
            let cadastral = CADASTRAL_OFFSET + r.id;
            let date = r.turnover_date.clone().unwrap_or_default();
            turnovers.push(json!({
                "attributes": {
                    "cadastral_unit_ids": [cadastral],
                    "price": r.field("price").cloned().unwrap_or(Value::Null),
                    "turnover_date": format!("{date}T12:00:00.000Z"),
                }
            }));
            units.insert(
                cadastral.to_string(),
                json!({"property_ids": [r.id], "full_unit": format!("0301-{}/1", r.id)}),
            );
            let mut p = r.fields.clone();
            p.remove("price");
            params.insert(r.id.to_string(), Value::Object(p));
        }
        lock(&self.turnovers).insert(window, turnovers);
    }

    /// Serve these listing items verbatim.
    pub fn with_raw_turnovers(self, window: MonthWindow, items: Vec<Value>) -> Self {
        lock(&self.turnovers).insert(window, items);
        self
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.latency) = Some(latency);
        self
    }

    /// Fail the next `times` listing calls for `window`.
    pub fn fail_times(&self, window: MonthWindow, times: u32) {
        lock(&self.failures).insert(window, times);
    }

    pub fn fail_always(&self, window: MonthWindow) {
        self.fail_times(window, u32::MAX);
    }

    /// Listing calls made for `window`, including failed ones.
    pub fn turnover_calls(&self, window: &MonthWindow) -> u32 {
        lock(&self.calls).get(window).copied().unwrap_or(0)
    }

    pub fn total_turnover_calls(&self) -> u32 {
        lock(&self.calls).values().sum()
    }

    /// Highest number of concurrent listing calls observed.
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamSource for ScriptedSource {
    async fn turnovers_page(
        &self,
        window: &MonthWindow,
        page: u32,
        cfg: &ApiConfig,
    ) -> Result<Vec<Value>> {
        *lock(&self.calls).entry(*window).or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *lock(&self.latency);
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = lock(&self.failures);
            if let Some(remaining) = failures.get_mut(window) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    return Err(PipelineError::Fetch(format!(
                        "scripted failure for {}",
                        window.label()
                    )));
                }
            }
        }

        let items = lock(&self.turnovers).get(window).cloned().unwrap_or_default();
        let per_page = cfg.per_page.max(1) as usize;
        let start = (page.saturating_sub(1) as usize).saturating_mul(per_page);
        Ok(items.into_iter().skip(start).take(per_page).collect())
    }

    async fn units(&self, cadastral_ids: &[i64]) -> Result<Map<String, Value>> {
        let units = lock(&self.units);
        Ok(cadastral_ids
            .iter()
            .filter_map(|id| {
                let key = id.to_string();
                units.get(&key).map(|v| (key, v.clone()))
            })
            .collect())
    }

    async fn estimation_params(&self, property_ids: &[i64]) -> Result<Map<String, Value>> {
        let params = lock(&self.params);
        Ok(property_ids
            .iter()
            .filter_map(|id| {
                let key = id.to_string();
                params.get(&key).map(|v| (key, v.clone()))
            })
            .collect())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// FixedTrainer
// ---------------------------------------------------------------------------

/// Trainer returning preset metrics, with optional failures and latency.
pub struct FixedTrainer {
    metrics: ModelMetrics,
    failures_left: AtomicU32,
    latency: Option<Duration>,
    calls: AtomicU32,
}

impl FixedTrainer {
    pub fn new(metrics: ModelMetrics) -> Self {
        Self {
            metrics,
            failures_left: AtomicU32::new(0),
            latency: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Fail the first `times` calls with a retryable training error.
    pub fn failing(self, times: u32) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Trainer for FixedTrainer {
    fn model_type(&self) -> &str {
        "fixed"
    }

    async fn train(&self, rows: &[TrainableRow]) -> Result<TrainOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PipelineError::Training("scripted trainer failure".to_string()));
        }
        Ok(TrainOutput {
            artifact: format!("fixed-model:{}", rows.len()).into_bytes(),
            metrics: self.metrics.clone(),
            feature_schema: json!({"label": "price"}),
        })
    }
}
