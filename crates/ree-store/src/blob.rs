//! Blob store trait and JSON helpers.
//!
//! A `BlobStore` is a flat key → bytes map with `/`-separated keys:
//! - `put` replaces the object wholesale and is atomic per key: readers see
//!   either the previous bytes or the new bytes, never a partial write.
//! - `exists` never reads the body.
//! - Concurrent reads are always safe.
//!
//! There is no conditional put and no locking. Two writers racing on the same
//! key both succeed and the last rename wins.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Key → bytes object store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Retrieve the object at `key`. Returns `StorageError::NotFound` if absent.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Store `data` at `key`, replacing any previous object atomically.
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Check whether an object exists at `key`.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete the object at `key`. No-op if absent.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Reject keys that are empty, absolute, or contain `..` segments.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.ends_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

/// Serialise `value` as pretty JSON and store it at `key`.
pub async fn put_json<T>(store: &dyn BlobStore, key: &str, value: &T) -> StorageResult<()>
where
    T: Serialize + ?Sized,
{
    let data = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.put(key, &data).await
}

/// Load and deserialise the JSON object at `key`.
pub async fn get_json<T>(store: &dyn BlobStore, key: &str) -> StorageResult<T>
where
    T: DeserializeOwned,
{
    let raw = store.get(key).await?;
    serde_json::from_slice(&raw).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Store `rows` as JSON Lines (one object per line, trailing newline).
pub async fn put_jsonl<T>(store: &dyn BlobStore, key: &str, rows: &[T]) -> StorageResult<()>
where
    T: Serialize,
{
    let mut data = Vec::new();
    for row in rows {
        serde_json::to_writer(&mut data, row).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        data.push(b'\n');
    }
    store.put(key, &data).await
}

/// Load a JSON Lines object. Blank lines are skipped.
pub async fn get_jsonl<T>(store: &dyn BlobStore, key: &str) -> StorageResult<Vec<T>>
where
    T: DeserializeOwned,
{
    let raw = store.get(key).await?;
    let text = String::from_utf8(raw).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row = serde_json::from_str(line).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: format!("line {}: {}", lineno + 1, e),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_key_accepts_nested_paths() {
        assert!(validate_key("snapshots/2025-01-01_2025-01-31/rows_raw.jsonl").is_ok());
        assert!(validate_key("latest.json").is_ok());
    }

    #[test]
    fn validate_key_rejects_escapes() {
        for key in ["", "/abs", "a//b", "a/../b", "./a", "trailing/"] {
            assert!(
                matches!(validate_key(key), Err(StorageError::InvalidKey { .. })),
                "key {key:?} should be rejected"
            );
        }
    }
}
