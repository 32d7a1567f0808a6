//! Structured observability hooks for pipeline run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via `run_span`
//! - Emission functions for stage attempts, snapshot cache outcomes, gate
//!   verdicts and publish results
//!
//! Events are emitted at `info!` level; failures at `warn!`/`error!`.

use tracing::{error, info, warn};

/// Span tagging every event of one run with its `run_id`.
///
/// Attach with `tracing::Instrument::instrument` so the span follows the run
/// across `.await` points and into spawned fetch tasks.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("ree.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, as_of: &str, months: u32, force_fetch: bool) {
    info!(
        event = "run.started",
        run_id = %run_id,
        as_of = %as_of,
        months = months,
        force_fetch = force_fetch,
    );
}

/// Emit event: one stage attempt failed.
pub fn emit_stage_attempt_failed(
    stage: &str,
    attempt: u32,
    error: &dyn std::fmt::Display,
    will_retry: bool,
) {
    warn!(
        event = "stage.attempt_failed",
        stage = %stage,
        attempt = attempt,
        error = %error,
        will_retry = will_retry,
    );
}

pub fn emit_stage_completed(stage: &str, attempts: u32, duration_ms: u64) {
    info!(
        event = "stage.completed",
        stage = %stage,
        attempts = attempts,
        duration_ms = duration_ms,
    );
}

/// Emit event: month snapshot served from the store without an upstream call.
pub fn emit_snapshot_cache_hit(window: &str) {
    info!(event = "snapshot.cache_hit", window = %window);
}

pub fn emit_snapshot_fetched(window: &str, rows_raw: u64, turnovers_raw: u64) {
    info!(
        event = "snapshot.fetched",
        window = %window,
        rows_raw = rows_raw,
        turnovers_raw = turnovers_raw,
    );
}

pub fn emit_gate_evaluated(run_id: &str, rows_trainable: u64, passed: bool, reasons: &[String]) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        rows_trainable = rows_trainable,
        passed = passed,
        reasons = %reasons.join("; "),
    );
}

pub fn emit_publish_skipped(run_id: &str, reason: &str) {
    info!(event = "publish.skipped", run_id = %run_id, reason = %reason);
}

pub fn emit_publish_completed(run_id: &str, model_version: &str, artifact_key: &str) {
    info!(
        event = "publish.completed",
        run_id = %run_id,
        model_version = %model_version,
        artifact_key = %artifact_key,
    );
}

/// Emit event: run finished (successfully, whether or not it published).
pub fn emit_run_finished(run_id: &str, duration_ms: u64, published: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        published = published,
    );
}

/// Emit event: run failed (error level).
pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    error!(event = "run.failed", run_id = %run_id, error = %error);
}
