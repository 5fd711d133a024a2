//! Model registry: tracked runs, logged models, versions, tags and aliases.
//!
//! Two backends implement `ModelRegistry`:
//! - `LocalRegistry`: embedded sled database
//! - `MlflowRegistry`: MLflow tracking server over REST
//!
//! `RunContext` owns one tracked run and closes it as FAILED when dropped
//! without `finish()`. `ModelRegistryClient::publish` drives a whole
//! registration: params, metrics, model, version, tags, alias.

pub mod local;
pub mod mlflow;
pub mod signature;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

pub use local::LocalRegistry;
pub use mlflow::MlflowRegistry;

use crate::config::{RegistryBackend, RegistryConfig};
use crate::error::{Classify, FailureKind};
use crate::types::{
    EvaluationMetrics, LoggedModel, ModelSignature, RegisteredModelVersion, RunInfo, RunStatus,
};

/// Run tag listing metrics that had a zero denominator.
pub const UNDEFINED_METRICS_TAG: &str = "undefined_metrics";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry database error: {0}")]
    Database(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {status}: {body}")]
    ServerError {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("not authorized (status {0})")]
    Unauthorized(reqwest::StatusCode),

    #[error("run '{0}' not found")]
    RunNotFound(String),

    #[error("run '{0}' is not active")]
    RunNotActive(String),

    #[error("model '{name}' version {version} not found")]
    VersionNotFound { name: String, version: u64 },

    #[error("alias '{alias}' is not set on model '{name}'")]
    AliasNotFound { name: String, alias: String },

    #[error("no artifact at '{0}'")]
    ArtifactNotFound(String),

    #[error("invalid model URI '{0}'")]
    InvalidModelUri(String),

    #[error("corrupt registry record: {0}")]
    Corrupt(String),

    #[error("invalid registry name '{0}': must be non-empty and contain no '/'")]
    InvalidName(String),
}

impl Classify for RegistryError {
    fn kind(&self) -> FailureKind {
        FailureKind::RegistryUnavailable
    }
}

/// Operations the pipeline consumes from a registry backend.
pub trait ModelRegistry: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    fn start_run(&self, experiment: &str, run_name: &str) -> Result<RunInfo, RegistryError>;

    fn get_run(&self, run_id: &str) -> Result<RunInfo, RegistryError>;

    fn log_params(
        &self,
        run_id: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<(), RegistryError>;

    fn log_metrics(&self, run_id: &str, metrics: &BTreeMap<String, f64>)
        -> Result<(), RegistryError>;

    fn set_run_tag(&self, run_id: &str, key: &str, value: &str) -> Result<(), RegistryError>;

    /// Store the serialized model under `artifact_path` in the run.
    fn log_model(
        &self,
        run_id: &str,
        artifact_path: &str,
        model_bytes: &[u8],
        signature: &ModelSignature,
        input_example: &[Vec<f64>],
    ) -> Result<LoggedModel, RegistryError>;

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<(), RegistryError>;

    /// Create the next version of `name` bound to `model_uri`.
    fn register_model(
        &self,
        name: &str,
        model_uri: &str,
        run_id: &str,
    ) -> Result<RegisteredModelVersion, RegistryError>;

    fn set_version_tag(
        &self,
        name: &str,
        version: u64,
        key: &str,
        value: &str,
    ) -> Result<(), RegistryError>;

    /// Point `alias` at `version`, moving it off any previous holder.
    fn set_alias(&self, name: &str, alias: &str, version: u64) -> Result<(), RegistryError>;

    fn get_version_by_alias(
        &self,
        name: &str,
        alias: &str,
    ) -> Result<RegisteredModelVersion, RegistryError>;

    /// Fetch the model bytes behind a `runs:/` URI.
    fn download_model(&self, model_uri: &str) -> Result<Vec<u8>, RegistryError>;
}

/// Open the configured backend.
pub fn open(config: &RegistryConfig) -> Result<Arc<dyn ModelRegistry>, RegistryError> {
    Ok(match config.backend {
        RegistryBackend::Local => Arc::new(LocalRegistry::open(&config.path)?),
        RegistryBackend::Mlflow => Arc::new(MlflowRegistry::connect(config)?),
    })
}

/// One tracked run. Dropping it unfinished closes the run as FAILED.
pub struct RunContext<'a> {
    registry: &'a dyn ModelRegistry,
    info: RunInfo,
    finished: bool,
}

impl<'a> RunContext<'a> {
    pub fn start(
        registry: &'a dyn ModelRegistry,
        experiment: &str,
        run_name: &str,
    ) -> Result<Self, RegistryError> {
        let info = registry.start_run(experiment, run_name)?;
        info!(
            backend = registry.backend(),
            run_id = %info.run_id,
            experiment,
            run_name,
            "Run started"
        );
        Ok(Self {
            registry,
            info,
            finished: false,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub const fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn log_params(&self, params: &BTreeMap<String, String>) -> Result<(), RegistryError> {
        self.registry.log_params(&self.info.run_id, params)
    }

    pub fn log_metrics(&self, metrics: &BTreeMap<String, f64>) -> Result<(), RegistryError> {
        self.registry.log_metrics(&self.info.run_id, metrics)
    }

    pub fn set_tag(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        self.registry.set_run_tag(&self.info.run_id, key, value)
    }

    pub fn log_model(
        &self,
        artifact_path: &str,
        model_bytes: &[u8],
        signature: &ModelSignature,
        input_example: &[Vec<f64>],
    ) -> Result<LoggedModel, RegistryError> {
        self.registry.log_model(
            &self.info.run_id,
            artifact_path,
            model_bytes,
            signature,
            input_example,
        )
    }

    /// Close the run as FINISHED.
    pub fn finish(mut self) -> Result<RunInfo, RegistryError> {
        self.registry
            .end_run(&self.info.run_id, RunStatus::Finished)?;
        self.finished = true;
        self.info.status = RunStatus::Finished;
        info!(run_id = %self.info.run_id, "Run finished");
        Ok(self.info.clone())
    }
}

impl Drop for RunContext<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.registry.end_run(&self.info.run_id, RunStatus::Failed) {
            Ok(()) => warn!(run_id = %self.info.run_id, "Run closed as FAILED"),
            Err(e) => warn!(run_id = %self.info.run_id, error = %e, "Could not close run as FAILED"),
        }
    }
}

/// Everything logged into the run for one trained model.
#[derive(Debug, Clone, Default)]
pub struct RunRecord {
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    /// Metric names with no numeric value
    pub undefined_metrics: Vec<String>,
    pub model_bytes: Vec<u8>,
    pub signature: Option<ModelSignature>,
    pub input_example: Vec<Vec<f64>>,
}

impl RunRecord {
    /// Add evaluation metrics under `prefix`; undefined ones are listed by
    /// name instead.
    pub fn add_evaluation(&mut self, prefix: &str, metrics: &EvaluationMetrics) {
        for (name, value) in metrics.defined_pairs() {
            self.metrics.insert(format!("{prefix}{name}"), value);
        }
        for name in metrics.undefined_names() {
            self.undefined_metrics.push(format!("{prefix}{name}"));
        }
    }
}

/// Result of a registration.
#[derive(Debug, Clone)]
pub struct RegistrationOutcome {
    pub model_name: String,
    pub version: u64,
    pub run_id: String,
    pub model_uri: String,
    pub alias: String,
    /// Tag and alias failures after the version was created
    pub warnings: Vec<String>,
}

/// Publishes trained models into a registry backend.
#[derive(Clone)]
pub struct ModelRegistryClient {
    registry: Arc<dyn ModelRegistry>,
    config: RegistryConfig,
}

impl ModelRegistryClient {
    pub fn new(registry: Arc<dyn ModelRegistry>, config: &RegistryConfig) -> Self {
        Self {
            registry,
            config: config.clone(),
        }
    }

    /// Open the configured backend.
    pub fn connect(config: &RegistryConfig) -> Result<Self, RegistryError> {
        Ok(Self::new(open(config)?, config))
    }

    pub fn registry(&self) -> &dyn ModelRegistry {
        self.registry.as_ref()
    }

    /// Log the run, register a new version, tag it and move the alias.
    ///
    /// Any failure up to and including version creation aborts and leaves
    /// the run FAILED. Tag and alias failures come back as warnings.
    pub fn publish(&self, record: &RunRecord) -> Result<RegistrationOutcome, RegistryError> {
        let cfg = &self.config;
        let run = RunContext::start(self.registry(), &cfg.experiment, &cfg.run_name)?;

        run.log_params(&record.params)?;
        run.log_metrics(&record.metrics)?;
        if !record.undefined_metrics.is_empty() {
            run.set_tag(UNDEFINED_METRICS_TAG, &record.undefined_metrics.join(","))?;
        }

        let signature = record
            .signature
            .clone()
            .unwrap_or_else(|| signature::infer_signature(&crate::types::feature_names()));
        let logged = run.log_model(
            &cfg.artifact_path,
            &record.model_bytes,
            &signature,
            &record.input_example,
        )?;
        let model_uri = logged.model_uri();

        let version = self
            .registry
            .register_model(&cfg.model_name, &model_uri, run.run_id())?;
        info!(
            model = %cfg.model_name,
            version = version.version,
            source = %model_uri,
            "Model version registered"
        );
        let run_info = run.finish()?;

        let mut warnings = Vec::new();
        for (key, value) in &cfg.tags {
            if let Err(e) = self
                .registry
                .set_version_tag(&cfg.model_name, version.version, key, value)
            {
                warn!(key = %key, error = %e, "Failed to tag model version");
                warnings.push(format!("tag '{key}': {e}"));
            }
        }
        if let Err(e) = self
            .registry
            .set_alias(&cfg.model_name, &cfg.alias, version.version)
        {
            warn!(alias = %cfg.alias, error = %e, "Failed to set model alias");
            warnings.push(format!("alias '{}': {e}", cfg.alias));
        } else {
            info!(alias = %cfg.alias, version = version.version, "Alias updated");
        }

        Ok(RegistrationOutcome {
            model_name: cfg.model_name.clone(),
            version: version.version,
            run_id: run_info.run_id,
            model_uri,
            alias: cfg.alias.clone(),
            warnings,
        })
    }

    /// Resolve the configured alias and download its model bytes.
    pub fn fetch_aliased(&self) -> Result<(RegisteredModelVersion, Vec<u8>), RegistryError> {
        let version = self
            .registry
            .get_version_by_alias(&self.config.model_name, &self.config.alias)?;
        let bytes = self.registry.download_model(&version.source)?;
        info!(
            model = %version.name,
            version = version.version,
            alias = %self.config.alias,
            bytes = bytes.len(),
            "Model downloaded"
        );
        Ok((version, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::metrics_from_confusion;
    use crate::types::ConfusionMatrix;

    fn client() -> ModelRegistryClient {
        let registry = LocalRegistry::open_temp().unwrap();
        ModelRegistryClient::new(Arc::new(registry), &RegistryConfig::default())
    }

    fn record() -> RunRecord {
        let mut record = RunRecord {
            params: BTreeMap::from([("solver".to_string(), "lbfgs".to_string())]),
            model_bytes: b"model".to_vec(),
            input_example: vec![vec![0.0; 7]],
            ..RunRecord::default()
        };
        record.add_evaluation(
            "",
            &metrics_from_confusion(ConfusionMatrix {
                tp: 0,
                fp: 0,
                tn: 4,
                fn_: 1,
            }),
        );
        record
    }

    #[test]
    fn undefined_metrics_are_listed_not_logged() {
        let r = record();
        assert!(r.undefined_metrics.contains(&"precision".to_string()));
        assert!(r.undefined_metrics.contains(&"f1score".to_string()));
        assert!(!r.metrics.contains_key("precision"));
        assert_eq!(r.metrics["recall"], 0.0);
        assert_eq!(r.metrics["tn"], 4.0);
    }

    #[test]
    fn publish_registers_tags_and_aliases() {
        let client = client();
        let first = client.publish(&record()).unwrap();
        let second = client.publish(&record()).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert!(second.warnings.is_empty());
        assert!(second.model_uri.starts_with("runs:/"));

        let (version, bytes) = client.fetch_aliased().unwrap();
        assert_eq!(version.version, 2);
        assert_eq!(version.tags["author"], "JP");
        assert_eq!(version.tags["stage"], "Dev");
        assert_eq!(bytes, b"model");
    }

    #[test]
    fn dropped_context_closes_run_failed() {
        let registry = LocalRegistry::open_temp().unwrap();
        let run_id = {
            let run = RunContext::start(&registry, "exp", "run").unwrap();
            run.run_id().to_string()
        };
        assert_eq!(registry.get_run(&run_id).unwrap().status, RunStatus::Failed);
    }

    #[test]
    fn finished_context_stays_finished() {
        let registry = LocalRegistry::open_temp().unwrap();
        let run = RunContext::start(&registry, "exp", "run").unwrap();
        let info = run.finish().unwrap();
        assert_eq!(registry.get_run(&info.run_id).unwrap().status, RunStatus::Finished);
    }

    #[test]
    fn undefined_metrics_tag_recorded_on_run() {
        let client = client();
        let outcome = client.publish(&record()).unwrap();
        let run = client.registry().get_run(&outcome.run_id).unwrap();
        assert_eq!(run.tags[UNDEFINED_METRICS_TAG], "precision,f1score");
        assert_eq!(run.params["solver"], "lbfgs");
        assert_eq!(run.status, RunStatus::Finished);
    }
}
