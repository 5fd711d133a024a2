//! Run orchestration.
//!
//! ```text
//! Idle -> DataLoaded -> FeaturesEngineered -> Split -> Scaled -> BaselineFit
//!      -> Tuned -> Evaluated -> Registered -> Persisted -> Done
//! ```
//!
//! Any stage failure moves the run to `Failed`; nothing is retried. With
//! `persist_before_register` the last two working stages swap.

pub mod inference;
mod runner;
mod state;

pub use inference::{InferenceError, ModelSource, PredictionSummary, Predictor};
pub use runner::{BaselineSummary, PipelineReport, SearchSummary, TrainingPipeline};
pub use state::{Stage, StageTiming, StageTracker, TransitionError};
