use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::blob::{validate_key, BlobStore, StorageResult};
use crate::error::StorageError;

/// Filesystem-backed blob store.
///
/// Layout: `<root>/<key>`, with `/` in keys mapped to directories. Writes go
/// to a temp file in the destination directory and are renamed into place,
/// so a reader never observes a half-written object.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a new `FsBlobStore` rooted at `root`. Creates `root` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = path.parent().ok_or_else(|| StorageError::InvalidKey {
        key: path.display().to_string(),
    })?;
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    if let Err(e) = tmp.persist(path) {
        warn!(path = %path.display(), error = %e.error, "atomic rename failed; temp file discarded");
        return Err(e.error.into());
    }
    debug!(path = %path.display(), bytes = data.len(), "blob written");
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })
    }

    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.object_path(key)?;
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| StorageError::Backend(format!("write task failed: {e}")))?
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await? && path.is_file())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn make_store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn blob_roundtrip_nested_key() {
        let (dir, store) = make_store();
        let key = "snapshots/2025-01-01_2025-01-31/rows_raw.jsonl";
        store.put(key, b"{\"id\":1}\n").await.unwrap();

        assert_eq!(store.get(key).await.unwrap(), b"{\"id\":1}\n");
        assert!(dir
            .path()
            .join("snapshots/2025-01-01_2025-01-31/rows_raw.jsonl")
            .is_file());
    }

    #[tokio::test]
    #[traced_test]
    async fn failed_rename_is_logged_and_leaves_no_temp_file() {
        let (dir, store) = make_store();
        // A directory at the object path makes the final rename fail.
        fs::create_dir_all(dir.path().join("models/latest.json/occupied")).unwrap();

        let err = store.put("models/latest.json", b"{}").await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(logs_contain("atomic rename failed"));

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("models"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("latest.json")]);
    }

    #[tokio::test]
    async fn put_replaces_wholesale() {
        let (_dir, store) = make_store();
        store.put("latest.json", b"first version, longer").await.unwrap();
        store.put("latest.json", b"second").await.unwrap();
        assert_eq!(store.get("latest.json").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let (dir, store) = make_store();
        store.put("models/v1/model.bin", &[7u8; 4096]).await.unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("models/v1"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() {
        let (_dir, store) = make_store();
        match store.get("models/none/metrics.json").await {
            Err(StorageError::NotFound { key }) => assert_eq!(key, "models/none/metrics.json"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exists_is_false_for_directories() {
        let (_dir, store) = make_store();
        store.put("models/v1/model.bin", b"x").await.unwrap();
        assert!(store.exists("models/v1/model.bin").await.unwrap());
        assert!(!store.exists("models/v1").await.unwrap());
        assert!(!store.exists("models/v2/model.bin").await.unwrap());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = make_store();
        store.put("a/b", b"x").await.unwrap();
        store.delete("a/b").await.unwrap();
        store.delete("a/b").await.unwrap();
        assert!(!store.exists("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn escaping_key_rejected() {
        let (_dir, store) = make_store();
        let err = store.put("../outside", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }
}
