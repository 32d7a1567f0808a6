//! ree-store: blob persistence for the REE training pipeline
//!
//! ## Layer 0 - Data/Persistence
//!
//! Month snapshots, rolling datasets, model artifacts and the `latest.json`
//! pointer all live in one key → bytes store. This crate owns that contract.
//!
//! ## Key Components
//!
//! - `BlobStore`: async get/put/exists/delete by key
//! - `FsBlobStore`: local filesystem backend with atomic rename-on-write
//! - `fakes::MemoryBlobStore`: in-memory backend for tests and dry runs
//! - JSON / JSON Lines helpers (`put_json`, `get_jsonl`, ...)

pub mod blob;
mod error;
pub mod fakes;
pub mod fs;

pub use blob::{get_json, get_jsonl, put_json, put_jsonl, validate_key, BlobStore, StorageResult};
pub use error::StorageError;
pub use fs::FsBlobStore;
