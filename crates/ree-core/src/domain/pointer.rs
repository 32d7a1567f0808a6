//! The published-model pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single reference to the model currently serving predictions.
///
/// Stored as one JSON object; only the publisher writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPointer {
    pub model_version: String,
    #[serde(rename = "type")]
    pub model_type: String,
    pub artifact_key: String,
    pub snapshot_prefix: String,
    pub created_at: DateTime<Utc>,
}
