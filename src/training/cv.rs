//! Cross-validated choice of the regularization strength.
//!
//! `CvLogistic` scans a log-spaced C path on stratified folds, keeps the C
//! with the best mean held-out accuracy and refits it on every row.

use tracing::debug;

use super::logistic::{self, FitError, FitSettings, LogisticModel};
use super::matrix::Matrix;
use crate::config::{defaults, TrainingConfig};
use crate::types::{ClassWeight, Hyperparameters, Penalty, Solver};

/// `logspace(lo, hi, size)` over the configured exponent range.
pub fn c_path(size: usize) -> Vec<f64> {
    let (lo, hi) = defaults::C_PATH_LOG10_RANGE;
    match size {
        0 => Vec::new(),
        1 => vec![10f64.powf(lo)],
        _ => {
            #[allow(clippy::cast_precision_loss)]
            let span = (size - 1) as f64;
            (0..size)
                .map(|i| {
                    #[allow(clippy::cast_precision_loss)]
                    let t = i as f64 / span;
                    10f64.powf(lo + (hi - lo) * t)
                })
                .collect()
        }
    }
}

/// One fold: (train row positions, held-out row positions).
pub type Fold = (Vec<usize>, Vec<usize>);

/// Stratified k-fold without shuffling.
///
/// Per-class fold sizes are found by dealing the sorted labels round-robin
/// over the folds; each class's rows are then assigned to folds in
/// contiguous runs, in original order.
pub fn stratified_kfold(y: &[u8], k: usize) -> Result<Vec<Fold>, FitError> {
    if k < 2 {
        return Err(FitError::DegenerateFolds {
            folds: k,
            detail: "at least two folds are required".to_string(),
        });
    }
    if y.len() < k {
        return Err(FitError::DegenerateFolds {
            folds: k,
            detail: format!("only {} rows", y.len()),
        });
    }

    let counts = [
        y.iter().filter(|&&l| l == 0).count(),
        y.iter().filter(|&&l| l == 1).count(),
    ];
    if counts.iter().all(|&c| c < k) {
        return Err(FitError::DegenerateFolds {
            folds: k,
            detail: format!("every class has fewer than {k} members ({counts:?})"),
        });
    }
    if counts.iter().any(|&c| c < k) {
        debug!(folds = k, ?counts, "Least populated class has fewer members than folds");
    }

    // allocation[fold][class] from the sorted labels y_sorted[fold::k]
    let mut sorted = y.to_vec();
    sorted.sort_unstable();
    let mut allocation = vec![[0usize; 2]; k];
    for (pos, &label) in sorted.iter().enumerate() {
        allocation[pos % k][usize::from(label.min(1))] += 1;
    }

    let mut test_fold = vec![0usize; y.len()];
    for class in 0..2u8 {
        let mut fold_of_rank = allocation
            .iter()
            .enumerate()
            .flat_map(|(fold, a)| std::iter::repeat(fold).take(a[usize::from(class)]));
        for (i, _) in y.iter().enumerate().filter(|&(_, &l)| l == class) {
            test_fold[i] = fold_of_rank.next().unwrap_or(k - 1);
        }
    }

    Ok((0..k)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..y.len()).partition(|&i| test_fold[i] == fold);
            (train, test)
        })
        .collect())
}

/// Fraction of matching labels.
pub fn accuracy(truth: &[u8], predicted: &[u8]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let hits = truth.iter().zip(predicted).filter(|(a, b)| a == b).count();
    #[allow(clippy::cast_precision_loss)]
    let acc = hits as f64 / truth.len() as f64;
    acc
}

/// Result of a cross-validated fit.
#[derive(Debug, Clone)]
pub struct CvFit {
    pub model: LogisticModel,
    /// Chosen regularization strength
    pub c: f64,
    pub c_path: Vec<f64>,
    /// Mean held-out accuracy per C; `None` where a fold fit failed
    pub mean_accuracy: Vec<Option<f64>>,
}

/// Logistic regression with built-in C selection.
#[derive(Debug, Clone, Copy)]
pub struct CvLogistic {
    pub solver: Solver,
    pub penalty: Penalty,
    pub c_path_size: usize,
    pub class_weight: ClassWeight,
    pub folds: usize,
    pub max_iter: usize,
    pub tol: f64,
}

impl CvLogistic {
    pub fn new(params: &Hyperparameters, config: &TrainingConfig) -> Self {
        Self {
            solver: params.solver,
            penalty: params.penalty,
            c_path_size: params.c_path_size,
            class_weight: params.class_weight,
            folds: config.cv_folds,
            max_iter: config.max_iter,
            tol: config.tol,
        }
    }

    fn settings(&self, c: f64) -> FitSettings {
        FitSettings {
            solver: self.solver,
            penalty: self.penalty,
            c,
            class_weight: self.class_weight,
            max_iter: self.max_iter,
            tol: self.tol,
        }
    }

    pub fn fit(&self, x: &Matrix, y: &[u8]) -> Result<CvFit, FitError> {
        if !self.solver.supports(self.penalty) {
            return Err(FitError::UnsupportedPenalty {
                solver: self.solver,
                penalty: self.penalty,
            });
        }
        let path = c_path(self.c_path_size);
        if path.is_empty() {
            return Err(FitError::DegenerateFolds {
                folds: self.folds,
                detail: "empty C path".to_string(),
            });
        }
        let folds = stratified_kfold(y, self.folds)?;

        let mut sums = vec![0.0; path.len()];
        let mut failed = vec![false; path.len()];
        let mut last_error = None;

        for (train, test) in &folds {
            let x_train = x.select_rows(train);
            let y_train: Vec<u8> = train.iter().map(|&i| y[i]).collect();
            let x_test = x.select_rows(test);
            let y_test: Vec<u8> = test.iter().map(|&i| y[i]).collect();

            let mut warm: Option<LogisticModel> = None;
            for (ci, &c) in path.iter().enumerate() {
                match logistic::fit(&x_train, &y_train, &self.settings(c), warm.as_ref()) {
                    Ok(model) => {
                        sums[ci] += accuracy(&y_test, &model.predict(&x_test));
                        warm = Some(model);
                    }
                    Err(e @ (FitError::SingleClass | FitError::Empty)) => return Err(e),
                    Err(e) => {
                        debug!(c, error = %e, "C path point failed on fold");
                        failed[ci] = true;
                        last_error = Some(e);
                    }
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let n_folds = folds.len() as f64;
        let mean_accuracy: Vec<Option<f64>> = sums
            .iter()
            .zip(&failed)
            .map(|(s, f)| (!f).then_some(s / n_folds))
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for (ci, score) in mean_accuracy.iter().enumerate() {
            if let Some(s) = *score {
                if best.map_or(true, |(_, b)| s > b) {
                    best = Some((ci, s));
                }
            }
        }
        let Some((best_idx, best_score)) = best else {
            return Err(last_error.unwrap_or(FitError::DegenerateFolds {
                folds: self.folds,
                detail: "no C value could be fitted".to_string(),
            }));
        };

        let c = path[best_idx];
        let model = logistic::fit(x, y, &self.settings(c), None)?;
        debug!(
            solver = %self.solver,
            penalty = %self.penalty,
            c,
            accuracy = best_score,
            "Cross-validated C selected"
        );

        Ok(CvFit {
            model,
            c,
            c_path: path,
            mean_accuracy,
        })
    }
}
