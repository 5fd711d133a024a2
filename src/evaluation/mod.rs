//! Held-out evaluation of a fitted classifier.
//!
//! Ratio metrics with a zero denominator come back as
//! `MetricValue::Undefined` and are reported with a warning, never as an
//! error.

use tracing::{info, warn};

use crate::error::FailureKind;
use crate::training::{LogisticModel, Matrix};
use crate::types::{ConfusionMatrix, EvaluationMetrics, MetricValue};

/// Precision, recall and F1 of the positive class from a confusion matrix.
#[allow(clippy::cast_precision_loss)]
pub fn metrics_from_confusion(confusion: ConfusionMatrix) -> EvaluationMetrics {
    let tp = confusion.tp as f64;
    let precision = MetricValue::ratio(tp, tp + confusion.fp as f64);
    let recall = MetricValue::ratio(tp, tp + confusion.fn_ as f64);
    let f1 = match (precision, recall) {
        (MetricValue::Defined(p), MetricValue::Defined(r)) => {
            MetricValue::ratio(2.0 * p * r, p + r)
        }
        _ => MetricValue::Undefined,
    };
    EvaluationMetrics {
        confusion,
        precision,
        recall,
        f1,
    }
}

/// F1 of the positive class; `Undefined` when there are no true positives
/// to balance.
pub fn f1_score(truth: &[u8], predicted: &[u8]) -> MetricValue {
    metrics_from_confusion(ConfusionMatrix::from_predictions(truth, predicted)).f1
}

/// Scores classifiers on the scaled held-out rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct Evaluator;

impl Evaluator {
    pub fn evaluate(&self, model: &LogisticModel, x_test: &Matrix, y_test: &[u8]) -> EvaluationMetrics {
        self.evaluate_named("model", model, x_test, y_test)
    }

    /// Same as `evaluate`, with `label` used in log events.
    pub fn evaluate_named(
        &self,
        label: &str,
        model: &LogisticModel,
        x_test: &Matrix,
        y_test: &[u8],
    ) -> EvaluationMetrics {
        let predicted = model.predict(x_test);
        let metrics = metrics_from_confusion(ConfusionMatrix::from_predictions(y_test, &predicted));

        for name in metrics.undefined_names() {
            warn!(
                model = label,
                metric = name,
                kind = %FailureKind::UndefinedMetric,
                "Metric undefined (zero denominator)"
            );
        }
        info!(
            model = label,
            rows = y_test.len(),
            tp = metrics.confusion.tp,
            fp = metrics.confusion.fp,
            tn = metrics.confusion.tn,
            fn_ = metrics.confusion.fn_,
            precision = %metrics.precision,
            recall = %metrics.recall,
            f1 = %metrics.f1,
            "Evaluation complete"
        );
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_undefined_without_positive_predictions() {
        let m = metrics_from_confusion(ConfusionMatrix {
            tp: 0,
            fp: 0,
            tn: 5,
            fn_: 3,
        });
        assert_eq!(m.precision, MetricValue::Undefined);
        assert_eq!(m.recall, MetricValue::Defined(0.0));
        assert_eq!(m.f1, MetricValue::Undefined);
    }

    #[test]
    fn f1_is_harmonic_mean() {
        let m = metrics_from_confusion(ConfusionMatrix {
            tp: 3,
            fp: 1,
            tn: 4,
            fn_: 2,
        });
        let (p, r) = (0.75, 0.6);
        assert_eq!(m.precision, MetricValue::Defined(p));
        assert_eq!(m.recall, MetricValue::Defined(r));
        let f1 = m.f1.value().unwrap();
        assert!((f1 - 2.0 * p * r / (p + r)).abs() < 1e-12);
    }

    #[test]
    fn zero_precision_and_recall_gives_undefined_f1() {
        let m = metrics_from_confusion(ConfusionMatrix {
            tp: 0,
            fp: 2,
            tn: 1,
            fn_: 2,
        });
        assert_eq!(m.precision, MetricValue::Defined(0.0));
        assert_eq!(m.f1, MetricValue::Undefined);
    }

    #[test]
    fn evaluator_scores_predictions() {
        let model = LogisticModel {
            coef: vec![1.0],
            intercept: 0.0,
        };
        let x = Matrix::from_rows(&[[1.0], [-1.0], [2.0], [-3.0]]);
        let m = Evaluator.evaluate(&model, &x, &[1, 0, 0, 1]);
        assert_eq!(
            m.confusion,
            ConfusionMatrix {
                tp: 1,
                fp: 1,
                tn: 1,
                fn_: 1
            }
        );
        assert_eq!(m.f1, MetricValue::Defined(0.5));
    }

    #[test]
    fn f1_score_helper() {
        assert_eq!(f1_score(&[1, 1], &[1, 1]), MetricValue::Defined(1.0));
        assert_eq!(f1_score(&[0, 0], &[0, 0]), MetricValue::Undefined);
    }
}
