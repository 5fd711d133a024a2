//! Pipeline failure taxonomy.
//!
//! Each stage has its own error enum; every one of them classifies into a
//! `FailureKind`. The runner wraps a stage failure in `PipelineError` so the
//! caller sees which stage failed, what kind of failure it was, and the cause.

use std::fmt;

use crate::pipeline::Stage;

/// Failure categories shared by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    DataUnavailable,
    SchemaMismatch,
    FeatureComputation,
    TrainingFailed,
    RegistryUnavailable,
    ArtifactWrite,
    /// A published model could not be read back or decoded
    ModelUnavailable,
    /// Non-fatal: a ratio metric had a zero denominator
    UndefinedMetric,
}

impl FailureKind {
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::UndefinedMetric)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DataUnavailable => "DataUnavailable",
            Self::SchemaMismatch => "SchemaMismatch",
            Self::FeatureComputation => "FeatureComputationError",
            Self::TrainingFailed => "TrainingFailed",
            Self::RegistryUnavailable => "RegistryUnavailable",
            Self::ArtifactWrite => "ArtifactWriteError",
            Self::ModelUnavailable => "ModelUnavailable",
            Self::UndefinedMetric => "UndefinedMetric",
        })
    }
}

/// Errors that know their place in the taxonomy.
pub trait Classify {
    fn kind(&self) -> FailureKind;
}

/// A fatal stage failure.
#[derive(Debug, thiserror::Error)]
#[error("{kind} during {stage}: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub kind: FailureKind,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl PipelineError {
    pub fn at<E>(stage: Stage, err: E) -> Self
    where
        E: Classify + std::error::Error + Send + Sync + 'static,
    {
        Self {
            stage,
            kind: err.kind(),
            source: Box::new(err),
        }
    }
}
