//! Domain types for the snapshot pipeline.

pub mod error;
pub mod manifest;
pub mod metrics;
pub mod pointer;
pub mod record;
pub mod window;

pub use error::{PipelineError, Result};
pub use manifest::{Period, SnapshotManifest, SourceMonth, WindowInfo};
pub use metrics::ModelMetrics;
pub use pointer::ModelPointer;
pub use record::{RawRecord, RealEstateType, TrainableRow};
pub use window::MonthWindow;
