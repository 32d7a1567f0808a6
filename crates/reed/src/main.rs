use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn, Level};

use ree_core::{
    BaselineTrainer, HttpSource, MonthlySchedule, Orchestrator, PipelineConfig, RunReport,
    RunRequest,
};
use ree_store::FsBlobStore;

const ENV_SCHEDULE: &str = "REE_SCHEDULE";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let json = std::env::var("REE_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
    ree_core::init_tracing(json, Level::INFO);

    let cfg = PipelineConfig::from_env().context("invalid REE_* configuration")?;
    let schedule = match std::env::var(ENV_SCHEDULE) {
        Ok(raw) => parse_schedule(&raw)?,
        Err(_) => MonthlySchedule::default(),
    };

    let store = FsBlobStore::new(&cfg.store_root)
        .with_context(|| format!("failed to open store at {}", cfg.store_root.display()))?;
    let source = HttpSource::new(&cfg.api).context("failed to build upstream client")?;
    let orch = Orchestrator::new(&cfg, Arc::new(store), Arc::new(source), Arc::new(BaselineTrainer))
        .with_git_sha(ree_core::resolve_git_sha());

    info!(
        store_root = %cfg.store_root.display(),
        day = schedule.day,
        hour = schedule.hour,
        minute = schedule.minute,
        "reed started"
    );

    loop {
        let now = Utc::now();
        let next = schedule.next_after(now)?;
        info!(next_run = %next, "waiting for next scheduled run");

        tokio::select! {
            _ = tokio::time::sleep(until(now, next)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("reed stopping");
                return Ok(());
            }
        }

        let request = RunRequest::new(Utc::now().date_naive());
        match run_once(&orch, request).await {
            Ok(report) => info!(
                run_id = %report.run_id,
                published = report.published(),
                duration_ms = report.duration_ms,
                "scheduled run finished"
            ),
            Err(e) => error!(error = %e, "scheduled run failed"),
        }
    }
}

/// Run one pipeline pass, cancelling it if the process is interrupted.
async fn run_once(orch: &Orchestrator, request: RunRequest) -> Result<RunReport> {
    let mut handle = orch.trigger(request)?;
    let finished = tokio::select! {
        res = handle.join() => Some(res),
        _ = tokio::signal::ctrl_c() => None,
    };
    match finished {
        Some(res) => Ok(res?),
        None => {
            warn!(run_id = %handle.run_id(), "interrupted, cancelling run");
            handle.cancel();
            let _ = handle.join().await;
            anyhow::bail!("run {} interrupted", handle.run_id())
        }
    }
}

fn until(now: DateTime<Utc>, next: DateTime<Utc>) -> std::time::Duration {
    (next - now).to_std().unwrap_or_default()
}

/// `DAY HH:MM`, e.g. `1 03:05`.
fn parse_schedule(raw: &str) -> Result<MonthlySchedule> {
    let (day, time) = raw
        .trim()
        .split_once(' ')
        .with_context(|| format!("{ENV_SCHEDULE} must look like `DAY HH:MM`, got {raw:?}"))?;
    let (hour, minute) = time
        .trim()
        .split_once(':')
        .with_context(|| format!("{ENV_SCHEDULE}: bad time {time:?}"))?;
    Ok(MonthlySchedule::new(
        day.trim().parse().context("schedule day")?,
        hour.parse().context("schedule hour")?,
        minute.parse().context("schedule minute")?,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_schedule() {
        assert_eq!(parse_schedule("1 03:05").unwrap(), MonthlySchedule::default());
        assert_eq!(
            parse_schedule(" 31 23:59 ").unwrap(),
            MonthlySchedule::new(31, 23, 59).unwrap()
        );
        assert!(parse_schedule("03:05").is_err());
        assert!(parse_schedule("0 03:05").is_err());
        assert!(parse_schedule("1 24:00").is_err());
    }

    #[test]
    fn test_until_never_negative() {
        let now = Utc.with_ymd_and_hms(2026, 2, 1, 3, 5, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 2, 1, 3, 6, 0).unwrap();
        assert_eq!(until(now, later).as_secs(), 60);
        assert_eq!(until(later, now).as_secs(), 0);
    }
}
