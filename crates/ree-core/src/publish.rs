//! Model publication and the `latest.json` pointer.
//!
//! Publishing is two phases: upload the versioned artifact set, then replace
//! the pointer with a single object write. The pointer is only written once
//! every artifact is confirmed present, so a failure at any point leaves the
//! previous pointer in place. Orphaned artifacts under `models/` are
//! acceptable.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use ree_store::{get_json, put_json, BlobStore, StorageError};

use crate::domain::{ModelMetrics, ModelPointer, Period, PipelineError, Result};
use crate::gate::GateDecision;
use crate::keys;

pub const SKIP_GATING_FAILED: &str = "gating_failed";

/// Provenance stored next to every published model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub model_version: String,
    pub model_type: String,
    pub snapshot_prefix: String,
    pub period: Period,
    pub counts: BTreeMap<String, u64>,
    pub dropped_reasons: BTreeMap<String, u64>,
    pub metrics: ModelMetrics,
    pub gating: GateDecision,
    /// Hex SHA-256 of the model artifact.
    pub artifact_sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Everything written under `models/{version}/`.
#[derive(Debug, Clone)]
pub struct ModelBundle {
    pub model_version: String,
    pub snapshot_prefix: String,
    pub artifact: Vec<u8>,
    pub metrics: ModelMetrics,
    pub feature_schema: Value,
    pub training_manifest: TrainingManifest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactKeys {
    pub model_key: String,
    pub metrics_key: String,
    pub schema_key: String,
    pub manifest_key: String,
}

impl ArtifactKeys {
    pub fn for_version(model_version: &str) -> Self {
        Self {
            model_key: keys::model_key(model_version, keys::MODEL_ARTIFACT),
            metrics_key: keys::model_key(model_version, keys::MODEL_METRICS),
            schema_key: keys::model_key(model_version, keys::FEATURE_SCHEMA),
            manifest_key: keys::model_key(model_version, keys::TRAINING_MANIFEST),
        }
    }

    fn all(&self) -> [&str; 4] {
        [
            &self.model_key,
            &self.metrics_key,
            &self.schema_key,
            &self.manifest_key,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// Gate did not pass; an expected outcome, not an error.
    Skipped {
        reason: String,
        gating_reasons: Vec<String>,
    },
    Published {
        model_version: String,
        keys: ArtifactKeys,
        pointer: ModelPointer,
    },
}

impl PublishOutcome {
    pub fn skipped(&self) -> bool {
        matches!(self, PublishOutcome::Skipped { .. })
    }
}

pub fn artifact_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn BlobStore>,
    model_type: String,
}

impl Publisher {
    pub fn new(store: Arc<dyn BlobStore>, model_type: impl Into<String>) -> Self {
        Self {
            store,
            model_type: model_type.into(),
        }
    }

    /// Publish `bundle` if `gate` passed.
    ///
    /// Artifact upload failures surface as retryable storage errors. Once the
    /// artifacts are uploaded, a failed verification or pointer write is a
    /// `PipelineError::Publish`.
    pub async fn publish(&self, gate: &GateDecision, bundle: &ModelBundle) -> Result<PublishOutcome> {
        if !gate.passed {
            return Ok(PublishOutcome::Skipped {
                reason: SKIP_GATING_FAILED.to_string(),
                gating_reasons: gate.reasons.clone(),
            });
        }

        let keys = self.upload_artifacts(bundle).await?;
        self.verify_artifacts(&bundle.model_version, &keys).await?;

        let pointer = ModelPointer {
            model_version: bundle.model_version.clone(),
            model_type: self.model_type.clone(),
            artifact_key: keys.model_key.clone(),
            snapshot_prefix: bundle.snapshot_prefix.clone(),
            created_at: Utc::now(),
        };
        put_json(self.store.as_ref(), keys::LATEST_POINTER, &pointer)
            .await
            .map_err(|e| PipelineError::Publish {
                model_version: bundle.model_version.clone(),
                reason: format!("pointer write failed: {e}"),
            })?;

        Ok(PublishOutcome::Published {
            model_version: bundle.model_version.clone(),
            keys,
            pointer,
        })
    }

    async fn upload_artifacts(&self, bundle: &ModelBundle) -> Result<ArtifactKeys> {
        let keys = ArtifactKeys::for_version(&bundle.model_version);
        let store = self.store.as_ref();
        store.put(&keys.model_key, &bundle.artifact).await?;
        put_json(store, &keys.metrics_key, &bundle.metrics).await?;
        put_json(store, &keys.schema_key, &bundle.feature_schema).await?;
        put_json(store, &keys.manifest_key, &bundle.training_manifest).await?;
        debug!(model_version = %bundle.model_version, "artifacts uploaded");
        Ok(keys)
    }

    async fn verify_artifacts(&self, model_version: &str, keys: &ArtifactKeys) -> Result<()> {
        for key in keys.all() {
            let present = self.store.exists(key).await.map_err(|e| PipelineError::Publish {
                model_version: model_version.to_string(),
                reason: format!("verifying {key}: {e}"),
            })?;
            if !present {
                return Err(PipelineError::Publish {
                    model_version: model_version.to_string(),
                    reason: format!("artifact {key} missing after upload"),
                });
            }
        }
        Ok(())
    }

    /// The published pointer, or `None` if nothing has been published yet.
    pub async fn current_pointer(&self) -> Result<Option<ModelPointer>> {
        match get_json(self.store.as_ref(), keys::LATEST_POINTER).await {
            Ok(p) => Ok(Some(p)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Metrics of the published model, the gate's baseline.
    ///
    /// `None` when there is no pointer, when the pointer cannot be parsed, or
    /// when its metrics object is missing or unreadable. Transient storage
    /// errors propagate so the caller can retry.
    pub async fn load_previous_metrics(&self) -> Result<Option<ModelMetrics>> {
        let pointer = match self.current_pointer().await {
            Ok(Some(p)) => p,
            Ok(None) => return Ok(None),
            Err(PipelineError::Storage(e)) if !e.is_retryable() => {
                warn!(error = %e, "published pointer unreadable; gating without baseline");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if pointer.model_version.trim().is_empty() || pointer.model_type.trim().is_empty() {
            warn!("published pointer incomplete; gating without baseline");
            return Ok(None);
        }

        let key = keys::model_key(&pointer.model_version, keys::MODEL_METRICS);
        match get_json::<Value>(self.store.as_ref(), &key).await {
            Ok(doc @ Value::Object(_)) => Ok(Some(ModelMetrics::new(doc))),
            Ok(_) => {
                warn!(%key, "previous metrics are not an object; gating without baseline");
                Ok(None)
            }
            Err(e) if e.is_retryable() => Err(e.into()),
            Err(e) => {
                warn!(%key, error = %e, "previous metrics unavailable; gating without baseline");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{evaluate, GateConfig};
    use crate::testing::metrics_doc;
    use ree_store::fakes::{FaultyBlobStore, MemoryBlobStore};

    fn gate(passed: bool) -> GateDecision {
        let rows = if passed { 10_000 } else { 1 };
        evaluate(&GateConfig::default(), rows, &metrics_doc(0.1, 1.0, 0.1), None)
    }

    fn bundle(version: &str) -> ModelBundle {
        let artifact = b"weights".to_vec();
        ModelBundle {
            model_version: version.to_string(),
            snapshot_prefix: "snapshots/rolling_12m/2025-02-01_2026-01-31".to_string(),
            metrics: metrics_doc(0.1, 1.0, 0.1),
            feature_schema: serde_json::json!({"label": "price"}),
            training_manifest: TrainingManifest {
                model_version: version.to_string(),
                model_type: "test".to_string(),
                snapshot_prefix: "snapshots/rolling_12m/2025-02-01_2026-01-31".to_string(),
                period: Period {
                    start: chrono::NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
                    end: chrono::NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
                },
                counts: BTreeMap::new(),
                dropped_reasons: BTreeMap::new(),
                metrics: metrics_doc(0.1, 1.0, 0.1),
                gating: gate(true),
                artifact_sha256: artifact_digest(&artifact),
                created_at: Utc::now(),
            },
            artifact,
        }
    }

    #[tokio::test]
    async fn test_failed_gate_skips_without_writes() {
        let store = Arc::new(MemoryBlobStore::new());
        let publisher = Publisher::new(store.clone(), "test");
        let out = publisher.publish(&gate(false), &bundle("v1")).await.unwrap();
        assert!(out.skipped());
        match out {
            PublishOutcome::Skipped {
                reason,
                gating_reasons,
            } => {
                assert_eq!(reason, SKIP_GATING_FAILED);
                assert_eq!(gating_reasons, vec!["insufficient_rows_trainable".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_writes_artifacts_then_pointer() {
        let store = Arc::new(MemoryBlobStore::new());
        let publisher = Publisher::new(store.clone(), "test");
        let out = publisher.publish(&gate(true), &bundle("v1")).await.unwrap();
        assert!(!out.skipped());

        let pointer = publisher.current_pointer().await.unwrap().unwrap();
        assert_eq!(pointer.model_version, "v1");
        assert_eq!(pointer.artifact_key, "models/v1/model.bin");
        assert_eq!(pointer.model_type, "test");
        assert_eq!(store.keys_with_prefix("models/v1/").len(), 4);

        let prev = publisher.load_previous_metrics().await.unwrap().unwrap();
        assert_eq!(prev.lookup("overall.mdape"), Some(0.1));
    }

    #[tokio::test]
    async fn test_pointer_write_failure_keeps_previous_pointer() {
        let inner = Arc::new(MemoryBlobStore::new());
        let faulty = Arc::new(FaultyBlobStore::new(inner.clone()));
        let publisher = Publisher::new(faulty.clone(), "test");

        publisher.publish(&gate(true), &bundle("v1")).await.unwrap();
        let before = inner.get(keys::LATEST_POINTER).await.unwrap();

        faulty.fail_puts_always(keys::LATEST_POINTER);
        let err = publisher.publish(&gate(true), &bundle("v2")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Publish { ref model_version, .. } if model_version == "v2"));
        assert!(!err.is_retryable());

        assert_eq!(inner.get(keys::LATEST_POINTER).await.unwrap(), before);
        // v2 artifacts are orphaned, not referenced.
        assert_eq!(inner.keys_with_prefix("models/v2/").len(), 4);
    }

    #[tokio::test]
    async fn test_artifact_failure_is_retryable_and_leaves_pointer() {
        let inner = Arc::new(MemoryBlobStore::new());
        let faulty = Arc::new(FaultyBlobStore::new(inner.clone()));
        let publisher = Publisher::new(faulty.clone(), "test");

        faulty.fail_puts("metrics.json", 1);
        let err = publisher.publish(&gate(true), &bundle("v1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(publisher.current_pointer().await.unwrap().is_none());

        publisher.publish(&gate(true), &bundle("v1")).await.unwrap();
        assert!(publisher.current_pointer().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_previous_metrics_absent_or_malformed() {
        let store = Arc::new(MemoryBlobStore::new());
        let publisher = Publisher::new(store.clone(), "test");
        assert!(publisher.load_previous_metrics().await.unwrap().is_none());

        store.put(keys::LATEST_POINTER, b"{broken").await.unwrap();
        assert!(publisher.load_previous_metrics().await.unwrap().is_none());

        let pointer = ModelPointer {
            model_version: "gone".to_string(),
            model_type: "test".to_string(),
            artifact_key: "models/gone/model.bin".to_string(),
            snapshot_prefix: "snapshots/x".to_string(),
            created_at: Utc::now(),
        };
        put_json(store.as_ref(), keys::LATEST_POINTER, &pointer)
            .await
            .unwrap();
        assert!(publisher.load_previous_metrics().await.unwrap().is_none());
    }

    #[test]
    fn test_artifact_digest() {
        assert_eq!(
            artifact_digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
