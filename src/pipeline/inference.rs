//! Batch scoring with a published model.
//!
//! The model comes from the registry (configured alias) or straight from
//! the artifact store. Features for the scored rows are derived from the
//! scoring batch itself.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::artifact::{self, ArtifactError, ArtifactStore};
use crate::config::PipelineConfig;
use crate::error::{Classify, FailureKind};
use crate::features::{FeatureComputationError, FeatureEngineer};
use crate::ingest::{DataIngestor, IngestError, IngestMode};
use crate::registry::{ModelRegistryClient, RegistryError};
use crate::training::TrainedModel;

/// Where the scoring model is loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelSource {
    /// Version behind the configured alias
    #[default]
    Registry,
    /// Configured artifact path
    Artifact,
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registry => "registry",
            Self::Artifact => "artifact",
        })
    }
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("loading model from registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("loading model: {0}")]
    ModelLoad(ArtifactError),

    #[error("writing predictions: {0}")]
    Output(ArtifactError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Features(#[from] FeatureComputationError),
}

impl Classify for InferenceError {
    fn kind(&self) -> FailureKind {
        match self {
            Self::Registry(e) => e.kind(),
            Self::ModelLoad(_) => FailureKind::ModelUnavailable,
            Self::Output(e) => e.kind(),
            Self::Ingest(e) => e.kind(),
            Self::Features(e) => e.kind(),
        }
    }
}

/// What a scoring run produced.
#[derive(Debug, Clone)]
pub struct PredictionSummary {
    pub rows_scored: usize,
    pub positives: usize,
    /// Registry version, when the model came from the registry
    pub model_version: Option<u64>,
    pub source: ModelSource,
    pub output: PathBuf,
}

impl fmt::Display for PredictionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scored {} rows ({} predicted failing) with the {} model",
            self.rows_scored, self.positives, self.source
        )?;
        if let Some(v) = self.model_version {
            write!(f, " v{v}")?;
        }
        write!(f, " -> {}", self.output.display())
    }
}

/// Scores new records with a trained model.
pub struct Predictor {
    config: PipelineConfig,
    registry: Option<ModelRegistryClient>,
    store: Option<Box<dyn ArtifactStore>>,
}

impl Predictor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
            registry: None,
            store: None,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: ModelRegistryClient) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn with_artifact_store(mut self, store: Box<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Load the model and report which registry version it is, if any.
    pub fn load_model(
        &self,
        source: ModelSource,
    ) -> Result<(TrainedModel, Option<u64>), InferenceError> {
        match source {
            ModelSource::Registry => {
                let client = match &self.registry {
                    Some(client) => client.clone(),
                    None => ModelRegistryClient::connect(&self.config.registry)?,
                };
                let (version, bytes) = client.fetch_aliased()?;
                let model = artifact::decode_model(&bytes).map_err(InferenceError::ModelLoad)?;
                Ok((model, Some(version.version)))
            }
            ModelSource::Artifact => {
                let path = &self.config.artifact.path;
                let bytes = match &self.store {
                    Some(store) => store.read(path),
                    None => artifact::open(&self.config.artifact).and_then(|store| store.read(path)),
                }
                .map_err(InferenceError::ModelLoad)?;
                let model = artifact::decode_model(&bytes).map_err(InferenceError::ModelLoad)?;
                Ok((model, None))
            }
        }
    }

    pub fn predict(
        &self,
        input: &Path,
        output: &Path,
        source: ModelSource,
    ) -> Result<PredictionSummary, InferenceError> {
        let (model, model_version) = self.load_model(source)?;

        let table = DataIngestor::new(&self.config.data).load_path(input, IngestMode::Scoring)?;
        let frame = FeatureEngineer::new(&self.config.features).compute(&table)?;
        let mut csv = String::from("row,probability,prediction\n");
        let mut positives = 0;
        for (row, v) in frame.vectors.iter().enumerate() {
            let (p, label) = model.score(v);
            positives += usize::from(label);
            csv.push_str(&format!("{row},{p},{label}\n"));
        }
        artifact::write_atomic(output, csv.as_bytes()).map_err(InferenceError::Output)?;

        let summary = PredictionSummary {
            rows_scored: frame.vectors.len(),
            positives,
            model_version,
            source,
            output: output.to_path_buf(),
        };
        info!(
            rows = summary.rows_scored,
            positives = summary.positives,
            source = %source,
            version = ?model_version,
            output = %output.display(),
            "Predictions written"
        );
        Ok(summary)
    }
}
