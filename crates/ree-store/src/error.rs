//! Error types for ree-store

use thiserror::Error;

/// Errors that can occur in the blob persistence layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The object does not exist under `key`.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Backend unreachable or refused the request.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Key is empty, absolute, or escapes the store root.
    #[error("invalid object key: {key}")]
    InvalidKey { key: String },

    /// Stored bytes could not be (de)serialised.
    #[error("serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether a retry of the same operation may succeed.
    ///
    /// `NotFound`, `InvalidKey` and `Serialization` are structural: the
    /// referenced object is absent or broken and retrying changes nothing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Backend(_) | StorageError::Io(_))
    }

    /// Whether this error means the object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_not_retryable() {
        let err = StorageError::NotFound {
            key: "latest.json".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.is_not_found());
        assert!(err.to_string().contains("latest.json"));
    }

    #[test]
    fn backend_and_io_are_retryable() {
        assert!(StorageError::Backend("connection reset".to_string()).is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::Interrupted, "interrupted");
        assert!(StorageError::from(io).is_retryable());
    }
}
