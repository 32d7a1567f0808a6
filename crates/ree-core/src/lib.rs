//! REE Core Library
//!
//! Rolling snapshot pipeline and publish gate for the price estimator.
//!
//! A run partitions the rolling period into calendar months, fetches or
//! reuses one snapshot per month, merges them into a deduplicated rolling
//! dataset, trains a model, compares it against the published one, and moves
//! the `latest.json` pointer only when the gate passes.

pub mod config;
pub mod dataset;
pub mod dedup;
pub mod domain;
pub mod gate;
pub mod keys;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod publish;
pub mod retry;
pub mod rolling;
pub mod schedule;
pub mod snapshot;
pub mod source;
pub mod telemetry;
pub mod testing;
pub mod trainer;
pub mod version;
pub mod window;

pub use domain::{
    ModelMetrics, ModelPointer, MonthWindow, Period, PipelineError, RawRecord, RealEstateType,
    Result, SnapshotManifest, SourceMonth, TrainableRow, WindowInfo,
};

pub use config::PipelineConfig;
pub use dataset::DatasetBuild;
pub use dedup::MergeStats;
pub use gate::{GateConfig, GateDecision, GateRejection, MetricCheck, MetricStatus};
pub use orchestrator::{Orchestrator, RunHandle, RunReport, RunRequest, TrainingSummary};
pub use publish::{ArtifactKeys, ModelBundle, PublishOutcome, Publisher, TrainingManifest};
pub use retry::{run_stage, StageClass, StagePolicies, StagePolicy};
pub use rolling::{build_rolling_snapshot, RollingSnapshot, RollingSnapshotRef};
pub use schedule::MonthlySchedule;
pub use snapshot::{MonthSnapshot, SnapshotCache};
pub use source::{ApiConfig, HttpSource, UpstreamSource};
pub use telemetry::init_tracing;
pub use trainer::{BaselineTrainer, TrainOutput, Trainer};
pub use version::{make_model_version, resolve_git_sha};
pub use window::month_windows;
