//! REE - rolling snapshot training pipeline CLI
//!
//! The `ree` command drives the monthly snapshot, train and publish pipeline
//! against a filesystem blob store.
//!
//! ## Commands
//!
//! - `trigger`: Run the pipeline once and print the run report
//! - `windows`: List the month windows a run would use and whether each is cached
//! - `current`: Show the published model pointer
//! - `gate`: Evaluate the publish gate offline from two metrics files

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use ree_core::gate::{self, GateConfig, GateDecision};
use ree_core::keys;
use ree_core::trainer::BASELINE_MODEL_TYPE;
use ree_core::{
    month_windows, BaselineTrainer, HttpSource, ModelMetrics, ModelPointer, MonthWindow,
    Orchestrator, PipelineConfig, PublishOutcome, Publisher, RunReport, RunRequest,
};
use ree_store::{BlobStore, FsBlobStore};

#[derive(Parser)]
#[command(name = "ree")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Rolling snapshot pipeline and publish gate for the REE price estimator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    /// Blob store root (overrides REE_STORE_ROOT)
    #[arg(long, global = true)]
    store_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once
    Trigger {
        /// Reference date; the run covers the full months before it (default: today, UTC)
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Number of trailing months
        #[arg(long, default_value_t = 12)]
        months: u32,

        /// Re-fetch every month even when cached
        #[arg(long)]
        force_fetch: bool,

        /// Stop after the rolling snapshot is built
        #[arg(long)]
        no_train: bool,

        /// Train and evaluate the gate but never move the pointer
        #[arg(long)]
        no_publish: bool,

        /// Month fetches allowed in flight
        #[arg(long, env = "REE_MAX_CONCURRENT_FETCHES")]
        max_concurrent_fetches: Option<usize>,
    },

    /// List the month windows for a run
    Windows {
        #[arg(long)]
        as_of: Option<NaiveDate>,

        #[arg(long, default_value_t = 12)]
        months: u32,
    },

    /// Show the published model pointer
    Current,

    /// Evaluate the publish gate from metrics files
    Gate {
        /// Candidate metrics.json
        #[arg(long)]
        new: PathBuf,

        /// Baseline metrics.json (omit for a first publish)
        #[arg(long)]
        prev: Option<PathBuf>,

        /// Trainable row count of the candidate dataset
        #[arg(long)]
        rows: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ree_core::init_tracing(cli.json, level);

    let mut cfg = PipelineConfig::from_env().context("invalid REE_* configuration")?;
    if let Some(root) = cli.store_root {
        cfg.store_root = root;
    }

    match cli.command {
        Commands::Trigger {
            as_of,
            months,
            force_fetch,
            no_train,
            no_publish,
            max_concurrent_fetches,
        } => {
            if let Some(n) = max_concurrent_fetches {
                cfg.max_concurrent_fetches = n;
            }
            cfg.validate().context("invalid configuration")?;
            let request = build_request(as_of, months, force_fetch, no_train, no_publish);
            let orch = production_orchestrator(&cfg)?;
            let report = cmd_trigger(&orch, request, cli.json).await?;
            print_report(&report, cli.json)
        }
        Commands::Windows { as_of, months } => {
            let store = open_store(&cfg)?;
            let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());
            let windows = cmd_windows(store.as_ref(), as_of, months).await?;
            print_windows(&windows, cli.json)
        }
        Commands::Current => {
            let pointer = cmd_current(open_store(&cfg)?).await?;
            print_pointer(pointer.as_ref(), cli.json)
        }
        Commands::Gate { new, prev, rows } => {
            let decision = cmd_gate(&cfg.gate, &new, prev.as_deref(), rows)?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
            if !decision.passed {
                anyhow::bail!("gate rejected: {}", decision.reasons.join("; "));
            }
            Ok(())
        }
    }
}

fn open_store(cfg: &PipelineConfig) -> Result<Arc<dyn BlobStore>> {
    let store = FsBlobStore::new(&cfg.store_root)
        .with_context(|| format!("failed to open store at {}", cfg.store_root.display()))?;
    Ok(Arc::new(store))
}

fn production_orchestrator(cfg: &PipelineConfig) -> Result<Orchestrator> {
    let store = open_store(cfg)?;
    let source = HttpSource::new(&cfg.api).context("failed to build upstream client")?;
    Ok(
        Orchestrator::new(cfg, store, Arc::new(source), Arc::new(BaselineTrainer))
            .with_git_sha(ree_core::resolve_git_sha()),
    )
}

fn build_request(
    as_of: Option<NaiveDate>,
    months: u32,
    force_fetch: bool,
    no_train: bool,
    no_publish: bool,
) -> RunRequest {
    RunRequest {
        months,
        force_fetch,
        train: !no_train,
        publish: !no_train && !no_publish,
        ..RunRequest::new(as_of.unwrap_or_else(|| Utc::now().date_naive()))
    }
}

async fn cmd_trigger(orch: &Orchestrator, request: RunRequest, json: bool) -> Result<RunReport> {
    let mut handle = orch.trigger(request).context("run rejected")?;
    if !json {
        println!("run {}", handle.run_id());
    }
    info!(run_id = %handle.run_id(), "run triggered");

    let finished = tokio::select! {
        res = handle.join() => Some(res),
        _ = tokio::signal::ctrl_c() => None,
    };
    match finished {
        Some(res) => res.context("run failed"),
        None => {
            warn!(run_id = %handle.run_id(), "interrupted, cancelling run");
            handle.cancel();
            let _ = handle.join().await;
            anyhow::bail!("run {} interrupted", handle.run_id())
        }
    }
}

async fn cmd_windows(
    store: &dyn BlobStore,
    as_of: NaiveDate,
    months: u32,
) -> Result<Vec<(MonthWindow, bool)>> {
    let mut out = Vec::new();
    for w in month_windows(as_of, months)? {
        let cached = store.exists(&keys::month_rows_key(&w)).await?
            && store.exists(&keys::month_manifest_key(&w)).await?;
        out.push((w, cached));
    }
    Ok(out)
}

async fn cmd_current(store: Arc<dyn BlobStore>) -> Result<Option<ModelPointer>> {
    let publisher = Publisher::new(store, BASELINE_MODEL_TYPE);
    Ok(publisher.current_pointer().await?)
}

fn cmd_gate(
    cfg: &GateConfig,
    new: &Path,
    prev: Option<&Path>,
    rows: u64,
) -> Result<GateDecision> {
    let new = read_metrics(new)?;
    let prev = prev.map(read_metrics).transpose()?;
    Ok(gate::evaluate(cfg, rows, &new, prev.as_ref()))
}

fn read_metrics(path: &Path) -> Result<ModelMetrics> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("as_of:    {} ({} months)", report.as_of, report.months);
    for w in &report.windows {
        let state = if w.cache_hit { "cached" } else { "fetched" };
        println!("  {}  {state}", w.window.label());
    }
    println!("rolling:  {}", report.rolling.prefix);
    println!(
        "rows:     {} raw, {} deduped, {} trainable",
        report.manifest.count("rows_raw_total"),
        report.manifest.count("rows_raw_deduped"),
        report.manifest.count("rows_trainable"),
    );
    if let Some(t) = &report.training {
        println!("model:    {} ({})", t.model_version, t.model_type);
    }
    if let Some(g) = &report.gate {
        if g.passed {
            println!("gate:     passed");
        } else {
            println!("gate:     rejected");
            for r in &g.reasons {
                println!("  - {r}");
            }
        }
    }
    match &report.publish {
        Some(PublishOutcome::Published { pointer, .. }) => {
            println!("publish:  latest -> {}", pointer.model_version)
        }
        Some(PublishOutcome::Skipped { reason, .. }) => println!("publish:  skipped ({reason})"),
        None => {}
    }
    println!("took:     {}ms", report.duration_ms);
    Ok(())
}

fn print_windows(windows: &[(MonthWindow, bool)], json: bool) -> Result<()> {
    if json {
        let rows: Vec<_> = windows
            .iter()
            .map(|(w, cached)| {
                serde_json::json!({
                    "start_date": w.start,
                    "end_date": w.end,
                    "cached": cached,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    for (w, cached) in windows {
        let state = if *cached { "cached" } else { "missing" };
        println!("{}  {state}", w.label());
    }
    Ok(())
}

fn print_pointer(pointer: Option<&ModelPointer>, json: bool) -> Result<()> {
    match pointer {
        Some(p) if json => println!("{}", serde_json::to_string_pretty(p)?),
        Some(p) => {
            println!("model:    {} ({})", p.model_version, p.model_type);
            println!("artifact: {}", p.artifact_key);
            println!("snapshot: {}", p.snapshot_prefix);
            println!("created:  {}", p.created_at);
        }
        None if json => println!("null"),
        None => println!("No model published yet."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ree_core::testing::{metrics_doc, month_rows, FixedTrainer, ScriptedSource};

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 15).unwrap()
    }

    #[test]
    fn test_cli_parses_trigger_flags() {
        let cli = Cli::try_parse_from([
            "ree",
            "trigger",
            "--as-of",
            "2026-02-15",
            "--months",
            "6",
            "--force-fetch",
            "--no-publish",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Trigger {
                as_of: parsed,
                months,
                force_fetch,
                no_publish,
                no_train,
                ..
            } => {
                assert_eq!(parsed, Some(as_of()));
                assert_eq!(months, 6);
                assert!(force_fetch && no_publish && !no_train);
            }
            _ => panic!("expected trigger"),
        }
    }

    #[test]
    fn test_no_train_implies_no_publish() {
        let req = build_request(Some(as_of()), 12, false, true, false);
        assert!(!req.train && !req.publish);
        req.validate().unwrap();

        let req = build_request(Some(as_of()), 12, false, false, true);
        assert!(req.train && !req.publish);
    }

    #[tokio::test]
    async fn test_windows_reports_cached_months() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        let ws = month_windows(as_of(), 2).unwrap();
        store.put(&keys::month_rows_key(&ws[1]), b"").await.unwrap();
        store.put(&keys::month_manifest_key(&ws[1]), b"{}").await.unwrap();

        let listed = cmd_windows(&store, as_of(), 2).await.unwrap();
        assert_eq!(listed, vec![(ws[0], false), (ws[1], true)]);
    }

    #[test]
    fn test_gate_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let new = dir.path().join("new.json");
        let prev = dir.path().join("prev.json");
        std::fs::write(&new, serde_json::to_vec(&metrics_doc(0.12, 1.0, 0.1)).unwrap()).unwrap();
        std::fs::write(&prev, serde_json::to_vec(&metrics_doc(0.10, 1.0, 0.1)).unwrap()).unwrap();

        let cfg = GateConfig::default();
        let decision = cmd_gate(&cfg, &new, Some(&prev), 1_000).unwrap();
        assert!(!decision.passed);

        let first = cmd_gate(&cfg, &new, None, 1_000).unwrap();
        assert!(first.passed);

        assert!(cmd_gate(&cfg, &dir.path().join("missing.json"), None, 1_000).is_err());
    }

    #[tokio::test]
    async fn test_trigger_then_current_on_fs_store() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()).unwrap());
        let w = month_windows(as_of(), 1).unwrap()[0];
        let source = ScriptedSource::new().with_month(w, month_rows(w, 0..20));
        let mut cfg = PipelineConfig::default();
        cfg.gate.min_rows_trainable = 10;
        let orch = Orchestrator::new(
            &cfg,
            Arc::clone(&store),
            Arc::new(source),
            Arc::new(FixedTrainer::new(metrics_doc(0.1, 400_000.0, 0.12))),
        );

        assert!(cmd_current(Arc::clone(&store)).await.unwrap().is_none());

        let report = cmd_trigger(&orch, build_request(Some(as_of()), 1, false, false, false), true)
            .await
            .unwrap();
        assert!(report.published());

        let pointer = cmd_current(store).await.unwrap().unwrap();
        assert_eq!(
            Some(pointer.model_version),
            report.training.map(|t| t.model_version)
        );
    }
}
