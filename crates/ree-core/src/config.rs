//! Pipeline configuration.
//!
//! Defaults suit a local run; every value can be overridden through `REE_*`
//! environment variables (binaries load `.env` first).

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{PipelineError, Result};
use crate::gate::GateConfig;
use crate::retry::{StagePolicies, StagePolicy};
use crate::source::ApiConfig;

pub const ENV_PREFIX: &str = "REE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of the filesystem blob store.
    pub store_root: PathBuf,
    pub api: ApiConfig,
    pub gate: GateConfig,
    /// Month fetches allowed in flight at once.
    pub max_concurrent_fetches: usize,
    /// Month snapshots older than this are re-fetched. `None` = never expire.
    pub snapshot_ttl_days: Option<u32>,
    pub stages: StagePolicies,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_root: PathBuf::from(".ree/store"),
            api: ApiConfig::default(),
            gate: GateConfig::default(),
            max_concurrent_fetches: 4,
            snapshot_ttl_days: None,
            stages: StagePolicies::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut cfg = Self::default();

        if let Some(root) = env.string("STORE_ROOT") {
            cfg.store_root = PathBuf::from(root);
        }

        if let Some(url) = env.string("API_BASE_URL") {
            cfg.api.base_url = url;
        }
        if let Some(key) = env.string("API_KEY") {
            cfg.api.api_key = key;
        }
        env.set(&mut cfg.api.per_page, "API_PER_PAGE")?;
        env.set(&mut cfg.api.turnover_type, "API_TURNOVER_TYPE")?;
        env.set(&mut cfg.api.min_price, "API_MIN_PRICE")?;

        env.set(&mut cfg.gate.min_rows_trainable, "TRAIN_MIN_ROWS")?;
        for tracked in cfg.gate.metrics.iter_mut() {
            let var = format!(
                "GATE_MAX_DEGRADE_{}",
                tracked.name.replace('.', "_").to_uppercase()
            );
            env.set(&mut tracked.max_degrade, &var)?;
        }

        env.set(&mut cfg.max_concurrent_fetches, "MAX_CONCURRENT_FETCHES")?;
        cfg.snapshot_ttl_days = env.parse("SNAPSHOT_TTL_DAYS")?;

        env.stage(&mut cfg.stages.short, "SHORT")?;
        env.stage(&mut cfg.stages.moderate, "MODERATE")?;
        env.stage(&mut cfg.stages.long, "LONG")?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fetches == 0 {
            return Err(PipelineError::Config(
                "max_concurrent_fetches must be > 0".to_string(),
            ));
        }
        if self.api.per_page == 0 {
            return Err(PipelineError::Config("api.per_page must be > 0".to_string()));
        }
        if let Some(bad) = self
            .gate
            .metrics
            .iter()
            .find(|m| !m.max_degrade.is_finite() || m.max_degrade < 0.0)
        {
            return Err(PipelineError::Config(format!(
                "gate threshold for {} must be a non-negative fraction",
                bad.name
            )));
        }
        Ok(())
    }

    pub fn snapshot_ttl(&self) -> Option<chrono::Duration> {
        self.snapshot_ttl_days
            .map(|d| chrono::Duration::days(i64::from(d)))
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, suffix: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{suffix}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, suffix: &str) -> Result<Option<T>> {
        match self.string(suffix) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                PipelineError::Config(format!("{ENV_PREFIX}{suffix}: cannot parse {raw:?}"))
            }),
        }
    }

    fn set<T: FromStr>(&self, slot: &mut T, suffix: &str) -> Result<()> {
        if let Some(v) = self.parse(suffix)? {
            *slot = v;
        }
        Ok(())
    }

    fn stage(&self, policy: &mut StagePolicy, class: &str) -> Result<()> {
        if let Some(secs) = self.parse::<u64>(&format!("STAGE_{class}_TIMEOUT_SECS"))? {
            policy.timeout_ms = secs.saturating_mul(1_000);
        }
        self.set(&mut policy.max_retries, &format!("STAGE_{class}_MAX_RETRIES"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = PipelineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.gate.min_rows_trainable, 500);
        assert_eq!(cfg.max_concurrent_fetches, 4);
        assert!(cfg.snapshot_ttl().is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = PipelineConfig::from_lookup(lookup(&[
            ("REE_STORE_ROOT", "/var/lib/ree"),
            ("REE_API_KEY", "k"),
            ("REE_TRAIN_MIN_ROWS", "1000"),
            ("REE_GATE_MAX_DEGRADE_ENEBOLIG_AE_P90", "0.2"),
            ("REE_MAX_CONCURRENT_FETCHES", "12"),
            ("REE_SNAPSHOT_TTL_DAYS", "30"),
            ("REE_STAGE_LONG_TIMEOUT_SECS", "60"),
            ("REE_STAGE_LONG_MAX_RETRIES", "1"),
        ]))
        .unwrap();
        assert_eq!(cfg.store_root, PathBuf::from("/var/lib/ree"));
        assert_eq!(cfg.api.api_key, "k");
        assert_eq!(cfg.gate.min_rows_trainable, 1000);
        let p90 = cfg
            .gate
            .metrics
            .iter()
            .find(|m| m.name == "enebolig.ae_p90")
            .unwrap();
        assert_eq!(p90.max_degrade, 0.2);
        assert_eq!(cfg.max_concurrent_fetches, 12);
        assert_eq!(cfg.snapshot_ttl(), Some(chrono::Duration::days(30)));
        assert_eq!(cfg.stages.long.timeout_ms, 60_000);
        assert_eq!(cfg.stages.long.max_retries, 1);
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        let err = PipelineConfig::from_lookup(lookup(&[("REE_TRAIN_MIN_ROWS", "many")]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref m) if m.contains("REE_TRAIN_MIN_ROWS")));

        let err = PipelineConfig::from_lookup(lookup(&[("REE_MAX_CONCURRENT_FETCHES", "0")]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = PipelineConfig::from_lookup(lookup(&[(
            "REE_GATE_MAX_DEGRADE_OVERALL_MDAPE",
            "-0.1",
        )]))
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
