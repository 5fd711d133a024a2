//! The training run: load, engineer, split, scale, fit, tune, evaluate,
//! register and persist.

use std::fmt;

use tracing::{error, info, warn};

use super::state::{Stage, StageTiming, StageTracker};
use crate::artifact::{self, ArtifactStore};
use crate::config::PipelineConfig;
use crate::error::{Classify, PipelineError};
use crate::evaluation::Evaluator;
use crate::features::FeatureEngineer;
use crate::ingest::DataIngestor;
use crate::registry::{signature, ModelRegistryClient, RegistrationOutcome, RunRecord};
use crate::training::{ModelTrainer, TrainedModel};
use crate::types::{ArtifactBlob, EvaluationMetrics, Hyperparameters, RawTable};

/// Baseline estimator summary.
#[derive(Debug, Clone)]
pub struct BaselineSummary {
    pub c: f64,
    pub metrics: EvaluationMetrics,
}

/// Hyperparameter search summary.
#[derive(Debug, Clone)]
pub struct SearchSummary {
    pub evaluated: usize,
    pub failed: usize,
    pub best: Hyperparameters,
    pub best_cv_f1: f64,
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub rows_loaded: usize,
    pub rows_trainable: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub baseline: BaselineSummary,
    pub search: SearchSummary,
    pub final_metrics: EvaluationMetrics,
    pub model: TrainedModel,
    pub registration: RegistrationOutcome,
    pub artifact: ArtifactBlob,
    pub timings: Vec<StageTiming>,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rows: {} loaded, {} trainable ({} train / {} test)",
            self.rows_loaded, self.rows_trainable, self.train_rows, self.test_rows
        )?;
        writeln!(f, "baseline: C={:.6} {}", self.baseline.c, self.baseline.metrics)?;
        writeln!(
            f,
            "search: {} candidates, {} failed, best {} (cv f1 {:.4})",
            self.search.evaluated, self.search.failed, self.search.best, self.search.best_cv_f1
        )?;
        writeln!(f, "final: C={:.6} {}", self.model.c, self.final_metrics)?;
        writeln!(
            f,
            "registered: {} v{} (alias '{}') from {}",
            self.registration.model_name,
            self.registration.version,
            self.registration.alias,
            self.registration.model_uri
        )?;
        for warning in &self.registration.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        writeln!(
            f,
            "artifact: {} ({} bytes, md5 {})",
            self.artifact.location, self.artifact.size_bytes, self.artifact.md5
        )?;
        let timings: Vec<String> = self
            .timings
            .iter()
            .map(|t| format!("{}={}ms", t.stage, t.elapsed_ms))
            .collect();
        write!(f, "timings: {}", timings.join(" "))
    }
}

/// Run work belonging to `stage`; a failure marks the run failed and
/// carries the stage.
fn attempt<T, E>(
    tracker: &mut StageTracker,
    stage: Stage,
    f: impl FnOnce() -> Result<T, E>,
) -> Result<T, PipelineError>
where
    E: Classify + std::error::Error + Send + Sync + 'static,
{
    f().map_err(|e| {
        error!(stage = %stage, kind = %e.kind(), error = %e, "Stage failed");
        tracker.fail(stage);
        PipelineError::at(stage, e)
    })
}

/// Like `attempt`, then move the tracker to `stage`.
fn step<T, E>(
    tracker: &mut StageTracker,
    stage: Stage,
    f: impl FnOnce() -> Result<T, E>,
) -> Result<T, PipelineError>
where
    E: Classify + std::error::Error + Send + Sync + 'static,
{
    let value = attempt(tracker, stage, f)?;
    reach(tracker, stage);
    Ok(value)
}

fn reach(tracker: &mut StageTracker, stage: Stage) {
    if let Err(e) = tracker.advance(stage) {
        warn!(error = %e, "Unexpected stage order");
    }
}

/// One configured training run.
pub struct TrainingPipeline {
    config: PipelineConfig,
    registry: Option<ModelRegistryClient>,
    store: Option<Box<dyn ArtifactStore>>,
}

impl TrainingPipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.clone(),
            registry: None,
            store: None,
        }
    }

    /// Use this registry client instead of opening the configured backend.
    #[must_use]
    pub fn with_registry(mut self, registry: ModelRegistryClient) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use this store instead of opening the configured backend.
    #[must_use]
    pub fn with_artifact_store(mut self, store: Box<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run on the configured data source.
    pub fn run(&self) -> Result<PipelineReport, PipelineError> {
        let mut tracker = StageTracker::new(self.config.artifact.persist_before_register);
        info!(source = %self.config.data.source.display(), "Training run started");
        let table = step(&mut tracker, Stage::DataLoaded, || {
            DataIngestor::new(&self.config.data).load()
        })?;
        self.run_from(tracker, &table)
    }

    /// Run on a table that is already loaded.
    pub fn run_on(&self, table: &RawTable) -> Result<PipelineReport, PipelineError> {
        let mut tracker = StageTracker::new(self.config.artifact.persist_before_register);
        reach(&mut tracker, Stage::DataLoaded);
        self.run_from(tracker, table)
    }

    fn run_from(
        &self,
        mut tracker: StageTracker,
        table: &RawTable,
    ) -> Result<PipelineReport, PipelineError> {
        let cfg = &self.config;

        let frame = step(&mut tracker, Stage::FeaturesEngineered, || {
            FeatureEngineer::new(&cfg.features).compute(table)
        })?;
        let labeled = frame.labeled();
        info!(
            rows = frame.len(),
            trainable = labeled.len(),
            positives = labeled.positives(),
            "Features engineered"
        );

        let trainer = ModelTrainer::new(&cfg.training);
        let split = step(&mut tracker, Stage::Split, || trainer.split(&labeled))?;
        let scaled = trainer.scale(&split);
        reach(&mut tracker, Stage::Scaled);

        let baseline = step(&mut tracker, Stage::BaselineFit, || {
            trainer.fit_baseline(&scaled)
        })?;
        let search = attempt(&mut tracker, Stage::Tuned, || trainer.tune(&scaled))?;
        let model = step(&mut tracker, Stage::Tuned, || {
            trainer.refit(&scaled, &search.best)
        })?;

        let evaluator = Evaluator;
        let baseline_metrics =
            evaluator.evaluate_named("baseline", &baseline.model, &scaled.x_test, &scaled.y_test);
        let final_metrics = evaluator.evaluate_named(
            "final",
            &model.classifier,
            &scaled.x_test,
            &scaled.y_test,
        );
        reach(&mut tracker, Stage::Evaluated);

        let mut record = RunRecord {
            params: model.logged_params(&cfg.training),
            signature: Some(signature::infer_signature(&model.feature_names)),
            input_example: signature::input_example(
                &scaled.x_test,
                cfg.registry.input_example_rows,
            ),
            ..RunRecord::default()
        };
        record.add_evaluation("", &final_metrics);
        record.add_evaluation("baseline_", &baseline_metrics);
        record.metrics.insert("cv_best_f1".to_string(), search.best_score);
        #[allow(clippy::cast_precision_loss)]
        {
            record.metrics.insert("search_candidates".to_string(), search.evaluated() as f64);
            record.metrics.insert("search_excluded".to_string(), search.failed() as f64);
        }

        let (registration, blob) = if cfg.artifact.persist_before_register {
            let blob = self.persist(&mut tracker, &model)?;
            let registration = self.register(&mut tracker, &model, record)?;
            (registration, blob)
        } else {
            let registration = self.register(&mut tracker, &model, record)?;
            let blob = self.persist(&mut tracker, &model)?;
            (registration, blob)
        };
        reach(&mut tracker, Stage::Done);

        let report = PipelineReport {
            rows_loaded: table.len(),
            rows_trainable: labeled.len(),
            train_rows: split.train.len(),
            test_rows: split.test.len(),
            baseline: BaselineSummary {
                c: baseline.c,
                metrics: baseline_metrics,
            },
            search: SearchSummary {
                evaluated: search.evaluated(),
                failed: search.failed(),
                best: search.best,
                best_cv_f1: search.best_score,
            },
            final_metrics,
            model,
            registration,
            artifact: blob,
            timings: tracker.timings().to_vec(),
        };
        info!(
            version = report.registration.version,
            f1 = %report.final_metrics.f1,
            "Training run complete"
        );
        Ok(report)
    }

    fn register(
        &self,
        tracker: &mut StageTracker,
        model: &TrainedModel,
        mut record: RunRecord,
    ) -> Result<RegistrationOutcome, PipelineError> {
        record.model_bytes =
            attempt(tracker, Stage::Registered, || artifact::encode_model(model))?;
        let client = match &self.registry {
            Some(client) => client.clone(),
            None => attempt(tracker, Stage::Registered, || {
                ModelRegistryClient::connect(&self.config.registry)
            })?,
        };
        step(tracker, Stage::Registered, || client.publish(&record))
    }

    fn persist(
        &self,
        tracker: &mut StageTracker,
        model: &TrainedModel,
    ) -> Result<ArtifactBlob, PipelineError> {
        let path = &self.config.artifact.path;
        match &self.store {
            Some(store) => step(tracker, Stage::Persisted, || {
                store.write(path, &artifact::encode_model(model)?)
            }),
            None => step(tracker, Stage::Persisted, || {
                let store = artifact::open(&self.config.artifact)?;
                store.write(path, &artifact::encode_model(model)?)
            }),
        }
    }
}
