//! Run orchestration: fan out month fetches, join, then merge, train, gate
//! and publish.
//!
//! Each month fetch runs as its own task under the moderate stage policy, so
//! a retry re-runs only that month. A barrier waits for every fetch before
//! the merge; one failed month fails the run. Only the publisher writes the
//! pointer, and only after a passed gate, so a cancelled or failed run leaves
//! the published model untouched.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{Instrument, Span};

use ree_store::BlobStore;

use crate::config::PipelineConfig;
use crate::domain::{
    ModelMetrics, MonthWindow, PipelineError, Result, SnapshotManifest,
};
use crate::gate::{self, GateConfig, GateDecision};
use crate::metrics::METRICS;
use crate::obs;
use crate::publish::{
    artifact_digest, ModelBundle, PublishOutcome, Publisher, TrainingManifest, SKIP_GATING_FAILED,
};
use crate::retry::{run_stage, StagePolicies};
use crate::rolling::{build_rolling_snapshot, RollingSnapshotRef};
use crate::snapshot::{MonthSnapshot, SnapshotCache};
use crate::source::UpstreamSource;
use crate::trainer::Trainer;
use crate::version::make_model_version;
use crate::window::month_windows;

pub const DEFAULT_MONTHS: u32 = 12;

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub as_of: NaiveDate,
    pub months: u32,
    pub force_fetch: bool,
    pub train: bool,
    /// Requires `train`.
    pub publish: bool,
}

impl RunRequest {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            months: DEFAULT_MONTHS,
            force_fetch: false,
            train: true,
            publish: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.months == 0 {
            return Err(PipelineError::InvalidArgument(
                "months must be > 0".to_string(),
            ));
        }
        if self.publish && !self.train {
            return Err(PipelineError::InvalidArgument(
                "publish requires train".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub model_version: String,
    pub model_type: String,
    pub artifact_sha256: String,
    pub artifact_bytes: usize,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub as_of: NaiveDate,
    pub months: u32,
    pub windows: Vec<MonthSnapshot>,
    pub rolling: RollingSnapshotRef,
    pub manifest: SnapshotManifest,
    pub training: Option<TrainingSummary>,
    pub gate: Option<GateDecision>,
    pub publish: Option<PublishOutcome>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn published(&self) -> bool {
        matches!(self.publish, Some(PublishOutcome::Published { .. }))
    }
}

/// A run spawned by [`Orchestrator::trigger`].
pub struct RunHandle {
    run_id: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<RunReport>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Ask the run to stop. Stages in flight are abandoned; publishing is
    /// never interrupted once it has started.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end. Call at most once to completion.
    pub async fn join(&mut self) -> Result<RunReport> {
        (&mut self.task)
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))?
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn BlobStore>,
    cache: SnapshotCache,
    trainer: Arc<dyn Trainer>,
    publisher: Publisher,
    gate: GateConfig,
    stages: StagePolicies,
    max_concurrent_fetches: usize,
    git_sha: String,
}

impl Orchestrator {
    pub fn new(
        cfg: &PipelineConfig,
        store: Arc<dyn BlobStore>,
        source: Arc<dyn UpstreamSource>,
        trainer: Arc<dyn Trainer>,
    ) -> Self {
        let cache = SnapshotCache::new(Arc::clone(&store), source, cfg.api.clone())
            .with_ttl(cfg.snapshot_ttl());
        let publisher = Publisher::new(Arc::clone(&store), trainer.model_type());
        Self {
            store,
            cache,
            trainer,
            publisher,
            gate: cfg.gate.clone(),
            stages: cfg.stages.clone(),
            max_concurrent_fetches: cfg.max_concurrent_fetches.max(1),
            git_sha: crate::version::LOCAL_SHA.to_string(),
        }
    }

    /// Revision embedded in model versions.
    pub fn with_git_sha(mut self, sha: impl Into<String>) -> Self {
        self.git_sha = sha.into();
        self
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Validate `request`, spawn the run, and return its handle at once.
    pub fn trigger(&self, request: RunRequest) -> Result<RunHandle> {
        request.validate()?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let (cancel, cancel_rx) = watch::channel(false);
        let this = self.clone();
        let id = run_id.clone();
        let task = tokio::spawn(async move { this.execute(id, request, cancel_rx).await });
        Ok(RunHandle {
            run_id,
            cancel,
            task,
        })
    }

    /// Run to completion on the current task.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        request.validate()?;
        let (_cancel, cancel_rx) = watch::channel(false);
        self.execute(uuid::Uuid::new_v4().to_string(), request, cancel_rx)
            .await
    }

    async fn execute(
        &self,
        run_id: String,
        request: RunRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport> {
        let span = obs::run_span(&run_id);
        async {
            let started = Instant::now();
            obs::emit_run_started(
                &run_id,
                &request.as_of.to_string(),
                request.months,
                request.force_fetch,
            );
            let result = self.run_stages(&run_id, &request, cancel, started).await;
            match &result {
                Ok(report) => {
                    obs::emit_run_finished(&run_id, report.duration_ms, report.published())
                }
                Err(e) => obs::emit_run_failed(&run_id, e),
            }
            METRICS.flush();
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        run_id: &str,
        request: &RunRequest,
        mut cancel: watch::Receiver<bool>,
        started: Instant,
    ) -> Result<RunReport> {
        let windows = month_windows(request.as_of, request.months)?;
        let snapshots = self
            .fetch_months(&windows, request.force_fetch, &cancel)
            .await?;

        let store = self.store.as_ref();
        let snaps = &snapshots;
        let (as_of, months) = (request.as_of, request.months);
        let rolling = cancellable(
            &mut cancel,
            run_stage("merge", &self.stages.short, move |_| {
                build_rolling_snapshot(store, snaps, as_of, months)
            }),
        )
        .await?;

        let mut report = RunReport {
            run_id: run_id.to_string(),
            as_of,
            months,
            windows: snapshots.clone(),
            rolling: rolling.reference.clone(),
            manifest: rolling.manifest.clone(),
            training: None,
            gate: None,
            publish: None,
            duration_ms: 0,
        };

        if request.train {
            let rows_trainable = rolling.rows.len() as u64;
            if let Some(rejected) = gate::check_rows(&self.gate, rows_trainable) {
                self.record_gated_out(run_id, &mut report, rejected, request.publish);
                report.duration_ms = started.elapsed().as_millis() as u64;
                return Ok(report);
            }

            let model_version = make_model_version(Utc::now(), &self.git_sha);
            let trainer = self.trainer.as_ref();
            let rows = &rolling.rows;
            let trained = match cancellable(
                &mut cancel,
                run_stage("train", &self.stages.long, move |_| trainer.train(rows)),
            )
            .await
            {
                Ok(trained) => trained,
                Err(PipelineError::InsufficientTrainingData { .. }) => {
                    let rejected = gate::insufficient_rows(&self.gate, rows_trainable);
                    self.record_gated_out(run_id, &mut report, rejected, request.publish);
                    report.duration_ms = started.elapsed().as_millis() as u64;
                    return Ok(report);
                }
                Err(e) => return Err(e),
            };

            let publisher = &self.publisher;
            let previous = cancellable(
                &mut cancel,
                run_stage("load_previous_metrics", &self.stages.short, move |_| {
                    publisher.load_previous_metrics()
                }),
            )
            .await?;

            let decision = gate::evaluate(
                &self.gate,
                rows_trainable,
                &trained.metrics,
                previous.as_ref(),
            );
            obs::emit_gate_evaluated(run_id, rows_trainable, decision.passed, &decision.reasons);
            if !decision.passed {
                METRICS.inc_runs_gated_out();
            }

            let artifact_sha256 = artifact_digest(&trained.artifact);
            report.training = Some(TrainingSummary {
                model_version: model_version.clone(),
                model_type: self.trainer.model_type().to_string(),
                artifact_sha256: artifact_sha256.clone(),
                artifact_bytes: trained.artifact.len(),
                metrics: trained.metrics.clone(),
            });

            if request.publish {
                if *cancel.borrow() {
                    return Err(PipelineError::Cancelled);
                }
                let bundle = ModelBundle {
                    training_manifest: TrainingManifest {
                        model_version: model_version.clone(),
                        model_type: self.trainer.model_type().to_string(),
                        snapshot_prefix: rolling.reference.prefix.clone(),
                        period: rolling.manifest.period,
                        counts: rolling.manifest.counts.clone(),
                        dropped_reasons: rolling.manifest.dropped_reasons.clone(),
                        metrics: trained.metrics.clone(),
                        gating: decision.clone(),
                        artifact_sha256,
                        created_at: Utc::now(),
                    },
                    model_version,
                    snapshot_prefix: rolling.reference.prefix.clone(),
                    artifact: trained.artifact,
                    metrics: trained.metrics,
                    feature_schema: trained.feature_schema,
                };
                let gate_ref = &decision;
                let bundle_ref = &bundle;
                let outcome = run_stage("publish", &self.stages.moderate, move |_| {
                    publisher.publish(gate_ref, bundle_ref)
                })
                .await?;

                match &outcome {
                    PublishOutcome::Skipped { reason, .. } => {
                        obs::emit_publish_skipped(run_id, reason)
                    }
                    PublishOutcome::Published {
                        model_version,
                        keys,
                        ..
                    } => {
                        obs::emit_publish_completed(run_id, model_version, &keys.model_key);
                        METRICS.inc_runs_published();
                    }
                }
                report.publish = Some(outcome);
            }
            report.gate = Some(decision);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Close out a run rejected before training: no model, nothing written.
    fn record_gated_out(
        &self,
        run_id: &str,
        report: &mut RunReport,
        decision: GateDecision,
        publish: bool,
    ) {
        obs::emit_gate_evaluated(
            run_id,
            decision.details.rows_trainable,
            decision.passed,
            &decision.reasons,
        );
        METRICS.inc_runs_gated_out();
        if publish {
            obs::emit_publish_skipped(run_id, SKIP_GATING_FAILED);
            report.publish = Some(PublishOutcome::Skipped {
                reason: SKIP_GATING_FAILED.to_string(),
                gating_reasons: decision.reasons.clone(),
            });
        }
        report.gate = Some(decision);
    }

    /// Fan out one fetch task per window and wait for all of them.
    async fn fetch_months(
        &self,
        windows: &[MonthWindow],
        force_fetch: bool,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Vec<MonthSnapshot>> {
        let sem = Arc::new(Semaphore::new(self.max_concurrent_fetches));
        let (fail_tx, _fail_rx) = watch::channel(false);
        let fail_flag = Arc::new(fail_tx);

        let mut tasks = Vec::with_capacity(windows.len());
        for &window in windows {
            let cache = self.cache.clone();
            let policy = self.stages.moderate.clone();
            let sem = Arc::clone(&sem);
            let fail_flag = Arc::clone(&fail_flag);
            let fail_rx = fail_flag.subscribe();
            let mut cancel = cancel.clone();

            let task = tokio::spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();

                    // A sibling already failed the run.
                    if *fail_rx.borrow() {
                        return Ok(None);
                    }

                    let stage = format!("fetch_month:{}", window.label());
                    let result = cancellable(
                        &mut cancel,
                        run_stage(&stage, &policy, |_| {
                            let cache = cache.clone();
                            async move { cache.ensure(window, force_fetch).await }
                        }),
                    )
                    .await;
                    if result.is_err() {
                        fail_flag.send_replace(true);
                    }
                    result.map(Some)
                }
                .instrument(Span::current()),
            );
            tasks.push(task);
        }

        // Barrier: every task is joined before the first error is reported.
        let mut snapshots = Vec::with_capacity(tasks.len());
        let mut first_err: Option<PipelineError> = None;
        for joined in join_all(tasks).await {
            match joined {
                Ok(Ok(Some(snapshot))) => snapshots.push(snapshot),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
                Err(join) => {
                    if first_err.is_none() {
                        first_err = Some(PipelineError::Join(join.to_string()));
                    }
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(snapshots),
        }
    }
}

/// Race `fut` against cancellation of the run.
async fn cancellable<T, F>(cancel: &mut watch::Receiver<bool>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if *cancel.borrow_and_update() {
        return Err(PipelineError::Cancelled);
    }
    tokio::select! {
        res = fut => res,
        _ = cancelled(cancel) => Err(PipelineError::Cancelled),
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if rx.changed().await.is_err() {
            // Sender gone: nobody can cancel any more.
            std::future::pending::<()>().await;
        }
        if *rx.borrow_and_update() {
            return;
        }
    }
}
