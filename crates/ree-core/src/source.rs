//! Upstream turnover source and month acquisition.
//!
//! A month is acquired in three steps: page through the turnover listing,
//! resolve each turnover's cadastral unit to a single property, then join the
//! property's estimation parameters. Every turnover that cannot be carried
//! through all three steps is dropped and counted.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::domain::{MonthWindow, PipelineError, RawRecord, Result};

pub const TURNOVERS_ENDPOINT: &str = "gbk_int/turnovers/valuer_formatted";
pub const UNITS_ENDPOINT: &str = "dc_int/units/valuer_formatted";
pub const PARAMS_ENDPOINT: &str = "mat_int/properties/estimation_params";

/// Ids per units / estimation-params request.
pub const LOOKUP_CHUNK: usize = 100;

/// Guard against a listing that never returns a short page.
pub const MAX_PAGES: u32 = 10_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    pub per_page: u32,
    pub turnover_type: u32,
    pub min_price: u64,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Attempts per HTTP request, including the first.
    pub attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            per_page: 100,
            turnover_type: 2,
            min_price: 1_000,
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Paged upstream API the snapshot cache acquires months from.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// One page (1-based) of the turnover listing for `window`. Items are the
    /// listing's raw `data` entries, each carrying an `attributes` object.
    async fn turnovers_page(
        &self,
        window: &MonthWindow,
        page: u32,
        cfg: &ApiConfig,
    ) -> Result<Vec<Value>>;

    /// Units keyed by cadastral id (as a string).
    async fn units(&self, cadastral_ids: &[i64]) -> Result<Map<String, Value>>;

    /// Estimation parameters keyed by property id (as a string).
    async fn estimation_params(&self, property_ids: &[i64]) -> Result<Map<String, Value>>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    attempts: u32,
    backoff_base_ms: u64,
}

impl HttpSource {
    pub fn new(cfg: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ree/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            attempts: cfg.attempts.max(1),
            backoff_base_ms: cfg.backoff_base_ms,
        })
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Map<String, Value>> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut last_err = None;

        for attempt in 1..=self.attempts {
            match self.attempt(method.clone(), &url, query, body).await {
                Ok(obj) => return Ok(obj),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transient(e)) => {
                    warn!(%url, attempt, error = %e, "upstream request failed");
                    last_err = Some(e);
                    if attempt < self.attempts {
                        let delay = self.backoff_base_ms.saturating_mul(1 << (attempt - 1).min(16));
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            PipelineError::Fetch(format!("{method} {url}: no attempts made"))
        }))
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> std::result::Result<Map<String, Value>, AttemptError> {
        let mut req = self
            .client
            .request(method.clone(), url)
            .header("Apikey", &self.api_key)
            .query(query);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.into()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(&method, url, status, &text));
        }

        match resp.json::<Value>().await {
            Ok(Value::Object(obj)) => Ok(obj),
            Ok(other) => Err(AttemptError::Transient(PipelineError::Fetch(format!(
                "{method} {url}: expected a JSON object, got {}",
                json_kind(&other)
            )))),
            Err(e) => Err(AttemptError::Transient(e.into())),
        }
    }
}

#[derive(Debug)]
enum AttemptError {
    Transient(PipelineError),
    Fatal(PipelineError),
}

/// 5xx is worth another attempt; any other non-success status is final.
fn classify_status(method: &Method, url: &str, status: StatusCode, body: &str) -> AttemptError {
    let detail = format!("{method} {url} -> {status}: {}", truncate(body, 200));
    if status.is_server_error() {
        AttemptError::Transient(PipelineError::Fetch(detail))
    } else {
        AttemptError::Fatal(PipelineError::UpstreamRejected(detail))
    }
}

#[async_trait]
impl UpstreamSource for HttpSource {
    async fn turnovers_page(
        &self,
        window: &MonthWindow,
        page: u32,
        cfg: &ApiConfig,
    ) -> Result<Vec<Value>> {
        let query = [
            ("start_date", window.start.to_string()),
            ("end_date", window.end.to_string()),
            ("type", cfg.turnover_type.to_string()),
            ("min_price", cfg.min_price.to_string()),
            ("page", page.to_string()),
            ("per_page", cfg.per_page.to_string()),
        ];
        let mut resp = self
            .request(Method::GET, TURNOVERS_ENDPOINT, &query, None)
            .await?;
        match resp.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(other) => Err(PipelineError::Fetch(format!(
                "turnovers page {page}: `data` is {}",
                json_kind(&other)
            ))),
        }
    }

    async fn units(&self, cadastral_ids: &[i64]) -> Result<Map<String, Value>> {
        let body = json!({ "cadastral_unit_gbk_ids": cadastral_ids });
        self.request(Method::POST, UNITS_ENDPOINT, &[], Some(&body))
            .await
    }

    async fn estimation_params(&self, property_ids: &[i64]) -> Result<Map<String, Value>> {
        let body = json!({ "ids": property_ids });
        self.request(Method::POST, PARAMS_ENDPOINT, &[], Some(&body))
            .await
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

/// A turnover that passed normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct Turnover {
    pub turnover_date: String,
    pub price: i64,
    pub cadastral_unit_id: i64,
}

/// Raw rows for one month plus the counters its manifest records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonthAcquisition {
    pub rows: Vec<RawRecord>,
    pub counts: BTreeMap<String, u64>,
    pub dropped: BTreeMap<String, u64>,
}

/// Page through the listing until a short page.
pub async fn fetch_turnovers(
    source: &dyn UpstreamSource,
    window: &MonthWindow,
    cfg: &ApiConfig,
) -> Result<Vec<Value>> {
    let per_page = cfg.per_page.max(1) as usize;
    let mut all = Vec::new();
    for page in 1..=MAX_PAGES {
        let batch = source.turnovers_page(window, page, cfg).await?;
        let short = batch.len() < per_page;
        debug!(window = %window.label(), page, items = batch.len(), "turnover page");
        all.extend(batch);
        if short {
            return Ok(all
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(mut obj) => Some(obj.remove("attributes").unwrap_or(json!({}))),
                    _ => None,
                })
                .collect());
        }
    }
    Err(PipelineError::Fetch(format!(
        "turnover listing for {} exceeded {MAX_PAGES} pages",
        window.label()
    )))
}

/// Keep turnovers with exactly one cadastral unit, a positive numeric price
/// and a `...Z` timestamp; dates are reduced to `YYYY-MM-DD`.
pub fn normalize_turnovers(
    raw: &[Value],
    dropped: &mut BTreeMap<String, u64>,
) -> Vec<Turnover> {
    let mut out = Vec::with_capacity(raw.len());
    for t in raw {
        let unit = match t.get("cadastral_unit_ids").and_then(Value::as_array) {
            Some(ids) if ids.len() == 1 => ids[0].as_i64(),
            _ => None,
        };
        let Some(cadastral_unit_id) = unit else {
            *dropped.entry("turnover:cadastral_unit_ids".to_string()).or_insert(0) += 1;
            continue;
        };

        let Some(price) = t
            .get("price")
            .and_then(Value::as_f64)
            .filter(|p| p.is_finite() && *p > 0.0)
        else {
            *dropped.entry("turnover:price".to_string()).or_insert(0) += 1;
            continue;
        };

        let Some(date) = t
            .get("turnover_date")
            .and_then(Value::as_str)
            .and_then(parse_turnover_timestamp)
        else {
            *dropped.entry("turnover:turnover_date".to_string()).or_insert(0) += 1;
            continue;
        };

        out.push(Turnover {
            turnover_date: date.format("%Y-%m-%d").to_string(),
            price: price.trunc() as i64,
            cadastral_unit_id,
        });
    }
    out
}

fn parse_turnover_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.fZ")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%SZ"))
        .ok()
}

/// Resolve cadastral units, keeping those that map to exactly one property.
pub async fn resolve_units(
    source: &dyn UpstreamSource,
    cadastral_ids: &[i64],
) -> Result<BTreeMap<i64, Map<String, Value>>> {
    let mut seen = HashSet::new();
    let unique: Vec<i64> = cadastral_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();

    let mut units = BTreeMap::new();
    for chunk in unique.chunks(LOOKUP_CHUNK) {
        for (key, data) in source.units(chunk).await? {
            let (Ok(cadastral_id), Value::Object(unit)) = (key.parse::<i64>(), data) else {
                continue;
            };
            if single_property_id(&unit).is_some() {
                units.insert(cadastral_id, unit);
            }
        }
    }
    Ok(units)
}

fn single_property_id(unit: &Map<String, Value>) -> Option<i64> {
    match unit.get("property_ids").and_then(Value::as_array) {
        Some(ids) if ids.len() == 1 => ids[0].as_i64(),
        _ => None,
    }
}

/// Acquire one month end to end.
pub async fn acquire_month(
    source: &dyn UpstreamSource,
    window: &MonthWindow,
    cfg: &ApiConfig,
) -> Result<MonthAcquisition> {
    let raw = fetch_turnovers(source, window, cfg).await?;

    let mut dropped = BTreeMap::new();
    let turnovers = normalize_turnovers(&raw, &mut dropped);
    let cadastral_ids: Vec<i64> = turnovers.iter().map(|t| t.cadastral_unit_id).collect();
    let units = resolve_units(source, &cadastral_ids).await?;

    let property_ids: Vec<i64> = units.values().filter_map(single_property_id).collect();
    let mut params = Map::new();
    for chunk in property_ids.chunks(LOOKUP_CHUNK) {
        params.extend(source.estimation_params(chunk).await?);
    }

    let mut rows = Vec::with_capacity(turnovers.len());
    for t in &turnovers {
        let Some(unit) = units.get(&t.cadastral_unit_id) else {
            *dropped.entry("join:unit".to_string()).or_insert(0) += 1;
            continue;
        };
        let Some(property_id) = single_property_id(unit) else {
            continue;
        };
        let Some(Value::Object(p)) = params.get(&property_id.to_string()) else {
            *dropped.entry("join:estimation_params".to_string()).or_insert(0) += 1;
            continue;
        };
        if p.is_empty() {
            *dropped.entry("join:estimation_params".to_string()).or_insert(0) += 1;
            continue;
        }

        let mut record = RawRecord::new(property_id, t.turnover_date.clone())
            .with("remote_id", property_id)
            .with("price", t.price)
            .with("cadastral_num", unit.get("full_unit").cloned().unwrap_or(Value::Null));
        for (k, v) in p {
            if !matches!(k.as_str(), "id" | "property_id" | "turnover_date") {
                record.fields.insert(k.clone(), v.clone());
            }
        }
        rows.push(record);
    }

    let counts = BTreeMap::from([
        ("turnovers_raw".to_string(), raw.len() as u64),
        ("turnovers_normalized".to_string(), turnovers.len() as u64),
        ("cadastral_unit_ids".to_string(), cadastral_ids.len() as u64),
        ("properties_matched".to_string(), units.len() as u64),
        ("rows_raw".to_string(), rows.len() as u64),
    ]);

    Ok(MonthAcquisition {
        rows,
        counts,
        dropped,
    })
}
