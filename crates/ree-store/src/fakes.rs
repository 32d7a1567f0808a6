//! In-memory fakes for the blob store (testing and dry runs)
//!
//! `MemoryBlobStore` satisfies the `BlobStore` contract without touching disk.
//! `FaultyBlobStore` wraps any store and fails writes to chosen keys, which is
//! how the publish fail-safe and retry paths are exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::blob::{validate_key, BlobStore, StorageResult};
use crate::error::StorageError;

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory blob store backed by a `BTreeMap<key, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    gets: AtomicU64,
    puts: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys currently stored, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    /// Keys under `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of `get` calls served so far.
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    /// Number of `put` calls served so far.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        self.gets.fetch_add(1, Ordering::Relaxed);
        let objects = self.objects.lock().unwrap();
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.puts.fetch_add(1, Ordering::Relaxed);
        let mut objects = self.objects.lock().unwrap();
        objects.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        let objects = self.objects.lock().unwrap();
        Ok(objects.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let mut objects = self.objects.lock().unwrap();
        objects.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FaultyBlobStore
// ---------------------------------------------------------------------------

/// Wraps a store and injects `Backend` errors on writes to matching keys.
///
/// Each rule fails the next `remaining` writes whose key ends with `suffix`;
/// `u32::MAX` means "always".
pub struct FaultyBlobStore<S> {
    inner: Arc<S>,
    rules: Mutex<HashMap<String, u32>>,
}

impl<S: BlobStore> FaultyBlobStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            rules: Mutex::new(HashMap::new()),
        }
    }

    /// Fail every write whose key ends with `suffix`.
    pub fn fail_puts_always(&self, suffix: &str) {
        self.rules
            .lock()
            .unwrap()
            .insert(suffix.to_string(), u32::MAX);
    }

    /// Fail the next `times` writes whose key ends with `suffix`.
    pub fn fail_puts(&self, suffix: &str, times: u32) {
        self.rules.lock().unwrap().insert(suffix.to_string(), times);
    }

    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    fn should_fail(&self, key: &str) -> bool {
        let mut rules = self.rules.lock().unwrap();
        for (suffix, remaining) in rules.iter_mut() {
            if key.ends_with(suffix.as_str()) && *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return true;
            }
        }
        false
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for FaultyBlobStore<S> {
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        if self.should_fail(key) {
            return Err(StorageError::Backend(format!(
                "injected write failure for {key}"
            )));
        }
        self.inner.put(key, data).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }
}
