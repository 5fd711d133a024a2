//! Shared data structures for the predictive-maintenance pipeline
//!
//! - Ingest: RawRecord, RawTable, TableSchema
//! - Features: FeatureVector and the declared FEATURE_SCHEMA
//! - Training: Solver, Penalty, ClassWeight, Hyperparameters
//! - Evaluation: ConfusionMatrix, EvaluationMetrics
//! - Registry: RunInfo, ModelSignature, RegisteredModelVersion, ArtifactBlob

mod records;
mod features;
mod model;
mod metrics;
mod registry;

pub use records::*;
pub use features::*;
pub use model::*;
pub use metrics::*;
pub use registry::*;
