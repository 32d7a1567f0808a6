//! Trait contract tests for BlobStore.
//!
//! Every backend must pass the same behavioural contract; each test runs
//! against the in-memory fake and the filesystem store.

use std::sync::Arc;

use ree_store::fakes::MemoryBlobStore;
use ree_store::{get_json, get_jsonl, put_json, put_jsonl, BlobStore, FsBlobStore, StorageError};
use serde::{Deserialize, Serialize};

fn backends() -> Vec<(&'static str, Arc<dyn BlobStore>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsBlobStore::new(dir.path()).unwrap();
    vec![
        ("memory", Arc::new(MemoryBlobStore::new()), None),
        ("fs", Arc::new(fs), Some(dir)),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pointer {
    model_version: String,
    artifact_key: String,
}

#[tokio::test]
async fn put_then_get_round_trip() {
    for (name, store, _guard) in backends() {
        store.put("models/v1/model.bin", b"weights").await.unwrap();
        assert_eq!(
            store.get("models/v1/model.bin").await.unwrap(),
            b"weights",
            "backend {name}"
        );
    }
}

#[tokio::test]
async fn get_missing_is_not_found() {
    for (name, store, _guard) in backends() {
        let err = store.get("latest.json").await.unwrap_err();
        assert!(
            matches!(err, StorageError::NotFound { .. }),
            "backend {name}: {err:?}"
        );
    }
}

#[tokio::test]
async fn exists_tracks_put_and_delete() {
    for (name, store, _guard) in backends() {
        assert!(!store.exists("a/b.json").await.unwrap(), "backend {name}");
        store.put("a/b.json", b"{}").await.unwrap();
        assert!(store.exists("a/b.json").await.unwrap(), "backend {name}");
        store.delete("a/b.json").await.unwrap();
        assert!(!store.exists("a/b.json").await.unwrap(), "backend {name}");
    }
}

#[tokio::test]
async fn overwrite_replaces_previous_bytes() {
    for (name, store, _guard) in backends() {
        store.put("latest.json", b"old-old-old").await.unwrap();
        store.put("latest.json", b"new").await.unwrap();
        assert_eq!(store.get("latest.json").await.unwrap(), b"new", "backend {name}");
    }
}

#[tokio::test]
async fn json_helpers_round_trip() {
    for (name, store, _guard) in backends() {
        let pointer = Pointer {
            model_version: "20260101-0305-abc1234".to_string(),
            artifact_key: "models/20260101-0305-abc1234/model.bin".to_string(),
        };
        put_json(store.as_ref(), "latest.json", &pointer).await.unwrap();
        let back: Pointer = get_json(store.as_ref(), "latest.json").await.unwrap();
        assert_eq!(back, pointer, "backend {name}");
    }
}

#[tokio::test]
async fn jsonl_helpers_skip_blank_lines() {
    for (name, store, _guard) in backends() {
        store
            .put("rows.jsonl", b"{\"id\":1}\n\n{\"id\":2}\n")
            .await
            .unwrap();
        let rows: Vec<serde_json::Value> = get_jsonl(store.as_ref(), "rows.jsonl").await.unwrap();
        assert_eq!(rows.len(), 2, "backend {name}");

        put_jsonl(store.as_ref(), "rows2.jsonl", &rows).await.unwrap();
        let raw = String::from_utf8(store.get("rows2.jsonl").await.unwrap()).unwrap();
        assert_eq!(raw, "{\"id\":1}\n{\"id\":2}\n", "backend {name}");
    }
}

#[tokio::test]
async fn malformed_json_is_serialization_error() {
    for (name, store, _guard) in backends() {
        store.put("latest.json", b"{not json").await.unwrap();
        let err = get_json::<Pointer>(store.as_ref(), "latest.json")
            .await
            .unwrap_err();
        assert!(
            matches!(err, StorageError::Serialization { .. }),
            "backend {name}: {err:?}"
        );
        assert!(!err.is_retryable());
    }
}

#[tokio::test]
async fn concurrent_readers_see_complete_objects() {
    for (name, store, _guard) in backends() {
        let payload = vec![42u8; 64 * 1024];
        store.put("big.bin", &payload).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move { store.get("big.bin").await }));
        }
        for task in tasks {
            let got = task.await.unwrap().unwrap();
            assert_eq!(got.len(), payload.len(), "backend {name}");
        }
    }
}
