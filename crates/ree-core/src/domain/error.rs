//! Pipeline error taxonomy.
//!
//! Data-quality outcomes are not errors: dropped records are counted by the
//! dataset builder and gate rejections are carried in `GateDecision`. Only
//! conditions that stop a run surface here.

use ree_store::StorageError;

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Upstream source unreachable or returned a malformed response.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Upstream answered with a client error (4xx); retrying cannot help.
    #[error("upstream rejected request: {0}")]
    UpstreamRejected(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("training failed: {0}")]
    Training(String),

    /// The trainer cannot fit on this few rows. Deterministic, never retried.
    #[error("not enough rows to train: {rows} < {min}")]
    InsufficientTrainingData { rows: usize, min: usize },

    /// Artifact set or pointer write failed after the gate passed. The
    /// previous pointer is left in place.
    #[error("publish failed for model {model_version}: {reason}")]
    Publish {
        model_version: String,
        reason: String,
    },

    #[error("stage {stage} timed out after {limit_ms}ms")]
    Timeout { stage: String, limit_ms: u64 },

    #[error("run cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("task join error: {0}")]
    Join(String),
}

impl PipelineError {
    /// Whether the orchestrator may retry the stage that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Fetch(_) | PipelineError::Timeout { .. } => true,
            PipelineError::Training(_) => true,
            PipelineError::Storage(e) => e.is_retryable(),
            PipelineError::InvalidArgument(_)
            | PipelineError::UpstreamRejected(_)
            | PipelineError::InsufficientTrainingData { .. }
            | PipelineError::Publish { .. }
            | PipelineError::Cancelled
            | PipelineError::Config(_)
            | PipelineError::Serialization(_)
            | PipelineError::Join(_) => false,
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Fetch(err.to_string())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
