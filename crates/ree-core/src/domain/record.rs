//! Raw and trainable records.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One observed transaction for one real-estate entity.
///
/// `id` and `turnover_date` are the only fields the pipeline relies on before
/// validation; price and every feature column live in `fields` so that rows
/// from the upstream source round-trip through snapshots untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawRecord {
    /// Entity (property) id.
    #[serde(alias = "property_id")]
    pub id: i64,

    /// Observation date, `YYYY-MM-DD` or an ISO-8601 timestamp.
    #[serde(default)]
    pub turnover_date: Option<String>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new(id: i64, turnover_date: impl Into<String>) -> Self {
        Self {
            id,
            turnover_date: Some(turnover_date.into()),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Field value, treating JSON `null` as absent.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// Parsed observation timestamp, if the date is present and parseable.
    pub fn observed_at(&self) -> Option<NaiveDateTime> {
        self.turnover_date.as_deref().and_then(parse_observation)
    }
}

/// Parse an observation date.
///
/// Accepts `YYYY-MM-DD` (midnight), RFC 3339 timestamps, and naive
/// `YYYY-MM-DDTHH:MM:SS[.fff][Z]` timestamps.
pub fn parse_observation(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if !raw.contains('T') {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    let stripped = raw.strip_suffix('Z').unwrap_or(raw);
    NaiveDateTime::parse_from_str(stripped, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Real-estate category. Serialised with the upstream's Norwegian names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RealEstateType {
    Enebolig,
    Tomannsbolig,
    Rekkehus,
    Leilighet,
    #[serde(rename = "næringseiendom")]
    Naeringseiendom,
    Hytte,
}

impl RealEstateType {
    pub const ALL: [RealEstateType; 6] = [
        RealEstateType::Enebolig,
        RealEstateType::Tomannsbolig,
        RealEstateType::Rekkehus,
        RealEstateType::Leilighet,
        RealEstateType::Naeringseiendom,
        RealEstateType::Hytte,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RealEstateType::Enebolig => "enebolig",
            RealEstateType::Tomannsbolig => "tomannsbolig",
            RealEstateType::Rekkehus => "rekkehus",
            RealEstateType::Leilighet => "leilighet",
            RealEstateType::Naeringseiendom => "næringseiendom",
            RealEstateType::Hytte => "hytte",
        }
    }

    /// Exact match against the serialised names.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl std::fmt::Display for RealEstateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that passed every dataset rule; the only input a `Trainer` accepts.
///
/// Validated columns are typed; everything else the source supplied is kept
/// in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainableRow {
    pub id: i64,
    #[serde(default)]
    pub turnover_date: Option<String>,
    pub price: f64,
    pub realestate_type: RealEstateType,
    pub municipality_number: Value,
    pub lat: f64,
    pub lon: f64,
    pub built_year: i32,
    /// Usable area (BRA).
    pub bra: f64,
    /// Gross area.
    pub total_area: f64,
    #[serde(default)]
    pub floor: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
