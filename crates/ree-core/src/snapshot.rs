//! Per-month idempotent snapshot cache.
//!
//! A month counts as cached when both its raw rows and its manifest exist.
//! The existence check and the write are not guarded by a lock: two
//! concurrent force-refreshes of one month both fetch and both write, and the
//! last writer wins. Rows are written before the manifest, so a reader that
//! sees the manifest sees a complete row set from one of the writers.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ree_store::{get_json, get_jsonl, put_json, put_jsonl, BlobStore};

use crate::domain::manifest::SOURCE_MONTHLY;
use crate::domain::{MonthWindow, RawRecord, Result, SnapshotManifest};
use crate::keys;
use crate::metrics::METRICS;
use crate::obs;
use crate::source::{acquire_month, ApiConfig, UpstreamSource};

/// Reference to a persisted month snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthSnapshot {
    pub window: MonthWindow,
    pub raw_rows_key: String,
    pub manifest_key: String,
    /// Served from the store without an upstream call.
    pub cache_hit: bool,
}

impl MonthSnapshot {
    fn for_window(window: MonthWindow, cache_hit: bool) -> Self {
        Self {
            window,
            raw_rows_key: keys::month_rows_key(&window),
            manifest_key: keys::month_manifest_key(&window),
            cache_hit,
        }
    }
}

#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn BlobStore>,
    source: Arc<dyn UpstreamSource>,
    api: ApiConfig,
    ttl: Option<Duration>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn BlobStore>, source: Arc<dyn UpstreamSource>, api: ApiConfig) -> Self {
        Self {
            store,
            source,
            api,
            ttl: None,
        }
    }

    /// Treat snapshots older than `ttl` as absent.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Return the snapshot for `window`, acquiring it from upstream only when
    /// it is absent, stale, or `force_refresh` is set.
    pub async fn ensure(&self, window: MonthWindow, force_refresh: bool) -> Result<MonthSnapshot> {
        let label = window.label();
        if !force_refresh && self.is_fresh(&window).await? {
            obs::emit_snapshot_cache_hit(&label);
            METRICS.inc_cache_hits();
            return Ok(MonthSnapshot::for_window(window, true));
        }

        let acquired = acquire_month(self.source.as_ref(), &window, &self.api).await?;
        let snapshot = MonthSnapshot::for_window(window, false);

        let mut manifest = SnapshotManifest::new(window.into(), SOURCE_MONTHLY, Utc::now());
        manifest.counts = acquired.counts;
        manifest.dropped_reasons = acquired.dropped;

        put_jsonl(self.store.as_ref(), &snapshot.raw_rows_key, &acquired.rows).await?;
        put_json(self.store.as_ref(), &snapshot.manifest_key, &manifest).await?;

        obs::emit_snapshot_fetched(
            &label,
            manifest.count("rows_raw"),
            manifest.count("turnovers_raw"),
        );
        METRICS.inc_snapshots_fetched();
        Ok(snapshot)
    }

    /// Both artifacts present.
    pub async fn exists(&self, window: &MonthWindow) -> Result<bool> {
        Ok(self.store.exists(&keys::month_rows_key(window)).await?
            && self.store.exists(&keys::month_manifest_key(window)).await?)
    }

    async fn is_fresh(&self, window: &MonthWindow) -> Result<bool> {
        if !self.exists(window).await? {
            return Ok(false);
        }
        let Some(ttl) = self.ttl else {
            return Ok(true);
        };
        match get_json::<SnapshotManifest>(self.store.as_ref(), &keys::month_manifest_key(window))
            .await
        {
            Ok(manifest) => {
                let fresh = manifest.created_at + ttl > Utc::now();
                if !fresh {
                    debug!(window = %window.label(), created_at = %manifest.created_at, "snapshot expired");
                }
                Ok(fresh)
            }
            Err(e) if !e.is_retryable() => {
                warn!(window = %window.label(), error = %e, "unreadable month manifest; refetching");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn load_records(&self, snapshot: &MonthSnapshot) -> Result<Vec<RawRecord>> {
        Ok(get_jsonl(self.store.as_ref(), &snapshot.raw_rows_key).await?)
    }

    pub async fn load_manifest(&self, snapshot: &MonthSnapshot) -> Result<SnapshotManifest> {
        Ok(get_json(self.store.as_ref(), &snapshot.manifest_key).await?)
    }
}
