//! predmaint: equipment failure classifier training pipeline
//!
//! Trains a binary "verge of failing" classifier from time-ordered sensor
//! logs, tunes and evaluates it, publishes it to a model registry and writes
//! the artifact to storage.
//!
//! ## Architecture
//!
//! - **Ingest**: delimited dataset loading and column typing
//! - **Features**: the seven engineered features and the forward-looking label
//! - **Training**: split, scaling, CV-regularized logistic regression, grid search
//! - **Evaluation**: confusion matrix, precision/recall/F1 with undefined handling
//! - **Registry**: tracked runs, model versions, tags and aliases (sled or MLflow)
//! - **Artifact**: compressed model persistence (filesystem or HTTP)

pub mod artifact;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod ingest;
pub mod pipeline;
pub mod registry;
pub mod training;
pub mod types;

use std::path::Path;

pub use config::PipelineConfig;
pub use error::{Classify, FailureKind, PipelineError};
pub use pipeline::{
    InferenceError, ModelSource, PipelineReport, PredictionSummary, Predictor, Stage,
    TrainingPipeline,
};
pub use training::TrainedModel;
pub use types::{EvaluationMetrics, FeatureVector, MetricValue, RegisteredModelVersion};

/// Run the full training pipeline with the configured backends.
pub fn train(config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    TrainingPipeline::new(config).run()
}

/// Score `input` with the aliased registry model (or the stored artifact)
/// and write `row,probability,prediction` rows to `output`.
pub fn predict(
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
    source: ModelSource,
) -> Result<PredictionSummary, InferenceError> {
    Predictor::new(config).predict(input, output, source)
}
