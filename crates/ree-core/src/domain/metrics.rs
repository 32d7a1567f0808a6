//! Model evaluation metrics document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Nested error statistics produced by a trainer.
///
/// The shape is owned by the trainer, so the document is kept as JSON and
/// read through dotted paths such as `overall.mdape` or
/// `by_realestate_type.enebolig.wape`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelMetrics(pub Value);

impl ModelMetrics {
    pub fn new(doc: Value) -> Self {
        Self(doc)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Numeric value at `path`, or `None` if any segment is missing or the
    /// leaf is not a finite number.
    pub fn lookup(&self, path: &str) -> Option<f64> {
        let mut cur = &self.0;
        for segment in path.split('.') {
            cur = cur.get(segment)?;
        }
        cur.as_f64().filter(|v| v.is_finite())
    }
}

impl From<Value> for ModelMetrics {
    fn from(doc: Value) -> Self {
        Self(doc)
    }
}
