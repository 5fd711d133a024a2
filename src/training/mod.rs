//! Model training: split, scale, baseline fit, hyperparameter search and
//! final refit.
//!
//! `ModelTrainer` exposes each step separately so the pipeline runner can
//! record a stage transition between them.

pub mod cv;
pub mod logistic;
pub mod matrix;
pub mod scaler;
pub mod search;
pub mod split;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub use cv::{CvFit, CvLogistic};
pub use logistic::{sigmoid, FitError, LogisticModel};
pub use matrix::Matrix;
pub use scaler::StandardScaler;
pub use search::{GridSearch, SearchOutcome};
pub use split::{train_test_split, TrainTestSplit};

use crate::config::TrainingConfig;
use crate::error::{Classify, FailureKind};
use crate::types::{
    feature_names, ClassWeight, FeatureVector, Hyperparameters, LabeledDataset, Penalty, Solver,
    NUM_FEATURES,
};

/// Bumped whenever the serialized layout of `TrainedModel` changes.
pub const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("insufficient training data: {0}")]
    InsufficientData(String),

    #[error("cannot build search folds: {0}")]
    Folds(FitError),

    #[error("baseline fit failed: {0}")]
    Baseline(FitError),

    #[error("all {candidates} search candidates failed")]
    AllCandidatesFailed { candidates: usize },

    #[error("refit of the best candidate failed: {0}")]
    Refit(FitError),

    #[error("worker pool: {0}")]
    WorkerPool(String),
}

impl Classify for TrainingError {
    fn kind(&self) -> FailureKind {
        FailureKind::TrainingFailed
    }
}

/// Fitted classifier with everything needed to score raw feature vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub format_version: u32,
    pub classifier: LogisticModel,
    pub scaler: StandardScaler,
    pub hyperparameters: Hyperparameters,
    /// Regularization strength chosen by cross-validation
    pub c: f64,
    pub feature_names: Vec<String>,
}

impl TrainedModel {
    /// Unscaled design matrix in feature-schema order.
    pub fn design_matrix(features: &[FeatureVector]) -> Matrix {
        let rows: Vec<[f64; NUM_FEATURES]> = features.iter().map(FeatureVector::as_array).collect();
        Matrix::from_rows(&rows)
    }

    /// Failure probability and predicted class of one unscaled vector.
    pub fn score(&self, features: &FeatureVector) -> (f64, u8) {
        let mut row = [0.0; NUM_FEATURES];
        self.scaler.transform_row(&features.as_array(), &mut row);
        let z = self.classifier.decision(&row);
        (sigmoid(z), u8::from(z > 0.0))
    }

    pub fn predict_proba(&self, features: &[FeatureVector]) -> Vec<f64> {
        features.iter().map(|v| self.score(v).0).collect()
    }

    pub fn predict(&self, features: &[FeatureVector]) -> Vec<u8> {
        features.iter().map(|v| self.score(v).1).collect()
    }

    /// Predict rows that are already scaled.
    pub fn predict_scaled(&self, x: &Matrix) -> Vec<u8> {
        self.classifier.predict(x)
    }

    /// Estimator parameters as logged with the run.
    pub fn logged_params(&self, config: &TrainingConfig) -> BTreeMap<String, String> {
        let mut params = self.hyperparameters.to_params();
        params.insert("C".to_string(), self.c.to_string());
        params.insert("cv".to_string(), config.cv_folds.to_string());
        params.insert("max_iter".to_string(), config.max_iter.to_string());
        params.insert("tol".to_string(), config.tol.to_string());
        params.insert("random_state".to_string(), config.seed.to_string());
        params.insert("scoring".to_string(), "accuracy".to_string());
        params
    }
}

/// Train/test rows after standardization. Train rows are shared with the
/// search workers.
#[derive(Debug, Clone)]
pub struct ScaledSplit {
    pub scaler: StandardScaler,
    pub x_train: Arc<Matrix>,
    pub y_train: Arc<Vec<u8>>,
    pub x_test: Matrix,
    pub y_test: Vec<u8>,
}

/// Runs each training step with one configuration.
#[derive(Debug, Clone)]
pub struct ModelTrainer {
    config: TrainingConfig,
}

impl ModelTrainer {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub const fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Seeded train/test partition. Both subsets must be non-empty and the
    /// train subset must contain both classes.
    pub fn split(&self, data: &LabeledDataset) -> Result<TrainTestSplit, TrainingError> {
        let split = train_test_split(data, self.config.test_ratio, self.config.seed);
        if split.train.is_empty() || split.test.is_empty() {
            return Err(TrainingError::InsufficientData(format!(
                "{} rows cannot be split into non-empty train and test subsets",
                data.len()
            )));
        }
        let positives = split.train.positives();
        if positives == 0 || positives == split.train.len() {
            return Err(TrainingError::InsufficientData(format!(
                "train subset has a single class ({positives} positives of {})",
                split.train.len()
            )));
        }
        info!(
            train = split.train.len(),
            test = split.test.len(),
            train_positives = positives,
            test_positives = split.test.positives(),
            seed = self.config.seed,
            "Dataset split"
        );
        Ok(split)
    }

    /// Fit the scaler on the train rows only and apply it to both subsets.
    pub fn scale(&self, split: &TrainTestSplit) -> ScaledSplit {
        let x_train = TrainedModel::design_matrix(&split.train.features);
        let x_test = TrainedModel::design_matrix(&split.test.features);
        let scaler = StandardScaler::fit(&x_train);
        info!(rows = scaler.count(), mean = ?scaler.mean(), "Scaler fitted");
        ScaledSplit {
            x_train: Arc::new(scaler.transform(&x_train)),
            y_train: Arc::new(split.train.labels.clone()),
            x_test: scaler.transform(&x_test),
            y_test: split.test.labels.clone(),
            scaler,
        }
    }

    /// Baseline: liblinear, L2, uniform class weights.
    pub fn fit_baseline(&self, scaled: &ScaledSplit) -> Result<CvFit, TrainingError> {
        let params = Hyperparameters {
            solver: Solver::Liblinear,
            penalty: Penalty::L2,
            c_path_size: self.config.baseline_c_path,
            class_weight: ClassWeight::UNIFORM,
        };
        let fit = CvLogistic::new(&params, &self.config)
            .fit(&scaled.x_train, &scaled.y_train)
            .map_err(TrainingError::Baseline)?;
        info!(c = fit.c, nnz = fit.model.nnz(), "Baseline fitted");
        Ok(fit)
    }

    pub fn tune(&self, scaled: &ScaledSplit) -> Result<SearchOutcome, TrainingError> {
        GridSearch::new(&self.config).run(Arc::clone(&scaled.x_train), Arc::clone(&scaled.y_train))
    }

    /// Refit the winning combination on the full scaled train subset.
    pub fn refit(
        &self,
        scaled: &ScaledSplit,
        best: &Hyperparameters,
    ) -> Result<TrainedModel, TrainingError> {
        let fit = CvLogistic::new(best, &self.config)
            .fit(&scaled.x_train, &scaled.y_train)
            .map_err(TrainingError::Refit)?;
        info!(params = %best, c = fit.c, nnz = fit.model.nnz(), "Final model refitted");
        Ok(TrainedModel {
            format_version: MODEL_FORMAT_VERSION,
            classifier: fit.model,
            scaler: scaled.scaler.clone(),
            hyperparameters: *best,
            c: fit.c,
            feature_names: feature_names(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> LabeledDataset {
        let features = (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = i as f64;
                FeatureVector {
                    sum_of_variables: t,
                    sum_of_variables_ma: t - 0.5,
                    n_equip_feats_abv_85_pct: f64::from(u8::from(i % 7 == 0)),
                    max_value_among_feat: (t * 0.3).sin() + 5.0,
                    sum_of_variables_std: 1.0 + (t * 0.1).cos(),
                    diff_median_preset: t - 40.0,
                    diff_median: t - 50.0,
                }
            })
            .collect();
        let labels = (0..n).map(|i| u8::from(i >= n * 2 / 3)).collect();
        LabeledDataset { features, labels }
    }

    #[test]
    fn split_rejects_tiny_dataset() {
        let trainer = ModelTrainer::new(&TrainingConfig::default());
        let err = trainer.split(&dataset(1)).unwrap_err();
        assert!(matches!(err, TrainingError::InsufficientData(_)));
        assert_eq!(err.kind(), FailureKind::TrainingFailed);
    }

    #[test]
    fn scaling_uses_train_rows_only() {
        let trainer = ModelTrainer::new(&TrainingConfig::default());
        let split = trainer.split(&dataset(60)).unwrap();
        let scaled = trainer.scale(&split);
        assert_eq!(scaled.x_train.rows(), split.train.len());
        assert_eq!(scaled.x_test.rows(), split.test.len());
        assert_eq!(scaled.scaler.count(), split.train.len() as u64);
        for j in 0..NUM_FEATURES {
            #[allow(clippy::cast_precision_loss)]
            let mean: f64 = (0..scaled.x_train.rows())
                .map(|i| scaled.x_train.get(i, j))
                .sum::<f64>()
                / scaled.x_train.rows() as f64;
            assert!(mean.abs() < 1e-9);
        }
    }

    #[test]
    fn baseline_and_refit_produce_usable_models() {
        let config = TrainingConfig {
            cv_folds: 3,
            ..TrainingConfig::default()
        };
        let trainer = ModelTrainer::new(&config);
        let data = dataset(90);
        let split = trainer.split(&data).unwrap();
        let scaled = trainer.scale(&split);

        let baseline = trainer.fit_baseline(&scaled).unwrap();
        assert_eq!(baseline.c_path.len(), config.baseline_c_path);

        let best = Hyperparameters {
            solver: Solver::Lbfgs,
            penalty: Penalty::L2,
            c_path_size: 3,
            class_weight: ClassWeight::from_negative(0.4),
        };
        let model = trainer.refit(&scaled, &best).unwrap();
        assert_eq!(model.feature_names.len(), NUM_FEATURES);
        assert_eq!(model.hyperparameters, best);

        let predicted = model.predict(&split.test.features);
        assert_eq!(predicted, model.predict_scaled(&scaled.x_test));
        let probs = model.predict_proba(&split.test.features);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));

        // Row-at-a-time scoring agrees with the batch matrix path
        let batch = model.classifier.predict_proba(&scaled.x_test);
        for (i, v) in split.test.features.iter().enumerate() {
            let (p, label) = model.score(v);
            assert!((p - batch[i]).abs() < 1e-12);
            assert_eq!(label, predicted[i]);
            assert_eq!(label == 1, p > 0.5);
        }

        let params = model.logged_params(&config);
        for key in ["solver", "penalty", "Cs", "C", "class_weight", "cv", "max_iter", "tol", "random_state", "scoring"] {
            assert!(params.contains_key(key), "missing {key}");
        }
        assert_eq!(params["cv"], "3");
    }
}
