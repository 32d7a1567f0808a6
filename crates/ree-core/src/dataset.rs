//! Dataset validation: raw records in, trainable rows plus a drop ledger out.
//!
//! Rules run in a fixed order and the first failing rule decides the drop
//! reason. Nothing here returns an error; every outcome is counted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{RawRecord, RealEstateType, TrainableRow};

/// Fields every record must carry, in reporting order.
pub const REQUIRED_FIELDS: [&str; 8] = [
    "price",
    "realestate_type",
    "municipality_number",
    "lat",
    "lon",
    "built_year",
    "bra",
    "total_area",
];

pub const MIN_BUILT_YEAR: i64 = 1800;
pub const MAX_BUILT_YEAR: i64 = 2100;

pub const REASON_TOTAL_AREA_LT_BRA: &str = "invalid:total_area_lt_bra";
pub const REASON_REALESTATE_TYPE: &str = "invalid:realestate_type";
pub const REASON_FLOOR_FOR_LEILIGHET: &str = "missing:floor_for_leilighet";
pub const REASON_LATLON: &str = "invalid:latlon";
pub const REASON_BUILT_YEAR: &str = "invalid:built_year";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetBuild {
    pub trainable: Vec<TrainableRow>,
    pub dropped: BTreeMap<String, u64>,
}

impl DatasetBuild {
    pub fn dropped_total(&self) -> u64 {
        self.dropped.values().sum()
    }
}

/// Validate `records`, preserving the order of those that pass.
pub fn build(records: &[RawRecord]) -> DatasetBuild {
    let mut out = DatasetBuild::default();
    for record in records {
        match validate(record) {
            Ok(row) => out.trainable.push(row),
            Err(reason) => *out.dropped.entry(reason).or_insert(0) += 1,
        }
    }
    out
}

/// Apply every rule to one record; `Err` carries the drop reason.
pub fn validate(r: &RawRecord) -> Result<TrainableRow, String> {
    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|f| r.field(f).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing:{}", missing.join(",")));
    }

    let price = positive_number(r, "price")?;
    let bra = positive_number(r, "bra")?;
    let total_area = positive_number(r, "total_area")?;

    if total_area < bra {
        return Err(REASON_TOTAL_AREA_LT_BRA.to_string());
    }

    let realestate_type = r
        .field("realestate_type")
        .and_then(Value::as_str)
        .and_then(RealEstateType::parse)
        .ok_or_else(|| REASON_REALESTATE_TYPE.to_string())?;

    let floor = r.field("floor").cloned();
    if realestate_type == RealEstateType::Leilighet && floor.is_none() {
        return Err(REASON_FLOOR_FOR_LEILIGHET.to_string());
    }

    let (lat, lon) = match (lenient_f64(r.field("lat")), lenient_f64(r.field("lon"))) {
        (Some(lat), Some(lon))
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) =>
        {
            (lat, lon)
        }
        _ => return Err(REASON_LATLON.to_string()),
    };

    let built_year = lenient_i64(r.field("built_year"))
        .filter(|y| (MIN_BUILT_YEAR..=MAX_BUILT_YEAR).contains(y))
        .ok_or_else(|| REASON_BUILT_YEAR.to_string())?;

    let municipality_number = r.field("municipality_number").cloned().unwrap_or(Value::Null);

    let mut extra = r.fields.clone();
    for f in REQUIRED_FIELDS.iter().chain(["floor"].iter()) {
        extra.remove(*f);
    }

    Ok(TrainableRow {
        id: r.id,
        turnover_date: r.turnover_date.clone(),
        price,
        realestate_type,
        municipality_number,
        lat,
        lon,
        built_year: built_year as i32,
        bra,
        total_area,
        floor,
        extra,
    })
}

/// A JSON number strictly greater than zero. Strings do not count.
fn positive_number(r: &RawRecord, name: &str) -> Result<f64, String> {
    r.field(name)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| format!("invalid:{name}"))
}

/// Numbers or numeric strings.
fn lenient_f64(v: Option<&Value>) -> Option<f64> {
    match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Integers, finite floats (truncated) or integer strings.
fn lenient_i64(v: Option<&Value>) -> Option<i64> {
    match v? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid(id: i64) -> RawRecord {
        RawRecord::new(id, "2026-01-10")
            .with("price", 4_500_000)
            .with("realestate_type", "enebolig")
            .with("municipality_number", 301)
            .with("lat", 59.91)
            .with("lon", 10.75)
            .with("built_year", 1987)
            .with("bra", 140.0)
            .with("total_area", 160.0)
    }

    fn only_reason(build: &DatasetBuild) -> (&str, u64) {
        assert!(build.trainable.is_empty());
        assert_eq!(build.dropped.len(), 1);
        let (k, v) = build.dropped.iter().next().unwrap();
        (k.as_str(), *v)
    }

    #[test]
    fn test_valid_house_is_kept() {
        let out = build(&[valid(1).with("rooms", 5)]);
        assert!(out.dropped.is_empty());
        assert_eq!(out.trainable.len(), 1);
        let row = &out.trainable[0];
        assert_eq!(row.realestate_type, RealEstateType::Enebolig);
        assert_eq!(row.built_year, 1987);
        assert_eq!(row.extra.get("rooms"), Some(&json!(5)));
        assert!(!row.extra.contains_key("price"));
    }

    #[test]
    fn test_apartment_without_floor() {
        let out = build(&[valid(1).with("realestate_type", "leilighet")]);
        assert_eq!(only_reason(&out), (REASON_FLOOR_FOR_LEILIGHET, 1));

        let ok = build(&[valid(1).with("realestate_type", "leilighet").with("floor", 3)]);
        assert_eq!(ok.trainable.len(), 1);
    }

    #[test]
    fn test_total_area_below_bra() {
        let out = build(&[valid(1).with("total_area", 50).with("bra", 55)]);
        assert_eq!(only_reason(&out), (REASON_TOTAL_AREA_LT_BRA, 1));
    }

    #[test]
    fn test_missing_fields_listed_in_required_order() {
        let mut r = valid(1);
        r.fields.remove("total_area");
        r.fields.remove("lat");
        r.fields.insert("price".to_string(), Value::Null);
        let out = build(&[r]);
        assert_eq!(only_reason(&out), ("missing:price,lat,total_area", 1));
    }

    #[test]
    fn test_numeric_checks_in_order() {
        assert_eq!(
            only_reason(&build(&[valid(1).with("price", 0)])),
            ("invalid:price", 1)
        );
        assert_eq!(
            only_reason(&build(&[valid(1).with("price", "100").with("bra", -1)])),
            ("invalid:price", 1)
        );
        assert_eq!(
            only_reason(&build(&[valid(1).with("bra", -1).with("total_area", 0)])),
            ("invalid:bra", 1)
        );
        assert_eq!(
            only_reason(&build(&[valid(1).with("total_area", "big")])),
            ("invalid:total_area", 1)
        );
    }

    #[test]
    fn test_unknown_category() {
        let out = build(&[valid(1).with("realestate_type", "slott")]);
        assert_eq!(only_reason(&out), (REASON_REALESTATE_TYPE, 1));
    }

    #[test]
    fn test_latlon_bounds_and_numeric_strings() {
        assert_eq!(
            only_reason(&build(&[valid(1).with("lat", 91.0)])),
            (REASON_LATLON, 1)
        );
        assert_eq!(
            only_reason(&build(&[valid(1).with("lon", "east")])),
            (REASON_LATLON, 1)
        );
        let out = build(&[valid(1).with("lat", "59.9").with("lon", "-180")]);
        assert_eq!(out.trainable.len(), 1);
        assert_eq!(out.trainable[0].lon, -180.0);
    }

    #[test]
    fn test_built_year_range() {
        assert_eq!(
            only_reason(&build(&[valid(1).with("built_year", 1799)])),
            (REASON_BUILT_YEAR, 1)
        );
        assert_eq!(
            only_reason(&build(&[valid(1).with("built_year", "recent")])),
            (REASON_BUILT_YEAR, 1)
        );
        assert_eq!(build(&[valid(1).with("built_year", "2100")]).trainable.len(), 1);
        assert_eq!(build(&[valid(1).with("built_year", 1800.0)]).trainable.len(), 1);
    }

    #[test]
    fn test_counts_accumulate_and_order_is_preserved() {
        let out = build(&[
            valid(3),
            valid(9).with("lat", 200),
            valid(1),
            valid(8).with("lat", -200),
            valid(2),
        ]);
        let ids: Vec<i64> = out.trainable.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        assert_eq!(out.dropped.get(REASON_LATLON), Some(&2));
        assert_eq!(out.dropped_total(), 2);
    }
}
