//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    snapshots_fetched: AtomicU64,
    snapshot_cache_hits: AtomicU64,
    stage_retries: AtomicU64,
    runs_published: AtomicU64,
    runs_gated_out: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            snapshots_fetched: AtomicU64::new(0),
            snapshot_cache_hits: AtomicU64::new(0),
            stage_retries: AtomicU64::new(0),
            runs_published: AtomicU64::new(0),
            runs_gated_out: AtomicU64::new(0),
        }
    }

    pub fn inc_snapshots_fetched(&self) {
        self.snapshots_fetched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshots_fetched", "counter incremented");
    }

    pub fn inc_cache_hits(&self) {
        self.snapshot_cache_hits.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "snapshot_cache_hits", "counter incremented");
    }

    pub fn inc_stage_retries(&self) {
        self.stage_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stage_retries", "counter incremented");
    }

    pub fn inc_runs_published(&self) {
        self.runs_published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_published", "counter incremented");
    }

    pub fn inc_runs_gated_out(&self) {
        self.runs_gated_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "runs_gated_out", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            snapshots_fetched = self.snapshots_fetched(),
            snapshot_cache_hits = self.snapshot_cache_hits(),
            stage_retries = self.stage_retries(),
            runs_published = self.runs_published(),
            runs_gated_out = self.runs_gated_out(),
        );
    }

    pub fn snapshots_fetched(&self) -> u64 {
        self.snapshots_fetched.load(Ordering::Relaxed)
    }

    pub fn snapshot_cache_hits(&self) -> u64 {
        self.snapshot_cache_hits.load(Ordering::Relaxed)
    }

    pub fn stage_retries(&self) -> u64 {
        self.stage_retries.load(Ordering::Relaxed)
    }

    pub fn runs_published(&self) -> u64 {
        self.runs_published.load(Ordering::Relaxed)
    }

    pub fn runs_gated_out(&self) -> u64 {
        self.runs_gated_out.load(Ordering::Relaxed)
    }
}
