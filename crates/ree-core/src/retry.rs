//! Per-stage timeout and retry policy.
//!
//! Stages are grouped in three classes: short bounded stages (merge, gate),
//! moderate I/O stages (month fetch, publish) and the long training stage.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::{PipelineError, Result};
use crate::metrics::METRICS;
use crate::obs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageClass {
    Short,
    Moderate,
    Long,
}

/// Timeout and retry settings for one stage class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Wall-clock limit for a single attempt (milliseconds).
    pub timeout_ms: u64,
    /// Retries after the first attempt (0 = run once).
    pub max_retries: u32,
    /// First backoff delay (milliseconds); doubles per retry.
    pub backoff_base_ms: u64,
    /// Backoff ceiling (milliseconds).
    pub backoff_max_ms: u64,
    /// Randomise each delay within `[delay/2, delay]`.
    pub jitter: bool,
}

impl StagePolicy {
    pub fn short() -> Self {
        Self {
            timeout_ms: 60_000,
            max_retries: 5,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            jitter: false,
        }
    }

    pub fn moderate() -> Self {
        Self {
            timeout_ms: 600_000,
            max_retries: 5,
            backoff_base_ms: 2_000,
            backoff_max_ms: 60_000,
            jitter: true,
        }
    }

    pub fn long() -> Self {
        Self {
            timeout_ms: 2 * 60 * 60 * 1_000,
            max_retries: 2,
            backoff_base_ms: 30_000,
            backoff_max_ms: 300_000,
            jitter: true,
        }
    }

    /// Delay before retry number `retry` (1-based), before jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .backoff_base_ms
            .saturating_mul(factor)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let full = self.backoff(retry);
        if !self.jitter {
            return full;
        }
        let half = full.as_millis() as u64 / 2;
        let extra = rand::thread_rng().gen_range(0..=half);
        Duration::from_millis(half + extra)
    }
}

/// Policies for all three classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePolicies {
    pub short: StagePolicy,
    pub moderate: StagePolicy,
    pub long: StagePolicy,
}

impl StagePolicies {
    pub fn for_class(&self, class: StageClass) -> &StagePolicy {
        match class {
            StageClass::Short => &self.short,
            StageClass::Moderate => &self.moderate,
            StageClass::Long => &self.long,
        }
    }
}

impl Default for StagePolicies {
    fn default() -> Self {
        Self {
            short: StagePolicy::short(),
            moderate: StagePolicy::moderate(),
            long: StagePolicy::long(),
        }
    }
}

/// Run `op` under `policy`.
///
/// Each attempt is bounded by the policy timeout (a timeout is itself
/// retryable). Non-retryable errors return at once; when retries run out the
/// last error is returned. `op` receives the 1-based attempt number.
pub async fn run_stage<T, F, Fut>(stage: &str, policy: &StagePolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let max_attempts = policy.max_retries + 1;
    let limit = Duration::from_millis(policy.timeout_ms);

    let mut attempt = 1;
    loop {
        let outcome = match tokio::time::timeout(limit, op(attempt)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(PipelineError::Timeout {
                stage: stage.to_string(),
                limit_ms: policy.timeout_ms,
            }),
        };

        match outcome {
            Ok(value) => {
                obs::emit_stage_completed(stage, attempt, started.elapsed().as_millis() as u64);
                return Ok(value);
            }
            Err(err) => {
                let will_retry = err.is_retryable() && attempt < max_attempts;
                obs::emit_stage_attempt_failed(stage, attempt, &err, will_retry);
                if !will_retry {
                    return Err(err);
                }
                METRICS.inc_stage_retries();
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}
