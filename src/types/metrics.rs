//! Evaluation metric types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A ratio metric that may be undefined (zero denominator).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Defined(f64),
    Undefined,
}

impl MetricValue {
    /// `num / den`, or `Undefined` when `den` is zero.
    pub fn ratio(num: f64, den: f64) -> Self {
        if den == 0.0 {
            Self::Undefined
        } else {
            Self::Defined(num / den)
        }
    }

    pub const fn value(self) -> Option<f64> {
        match self {
            Self::Defined(v) => Some(v),
            Self::Undefined => None,
        }
    }

    pub const fn is_undefined(self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defined(v) => write!(f, "{v:.4}"),
            Self::Undefined => f.write_str("undefined"),
        }
    }
}

/// Binary confusion matrix, positive class = 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: u64,
    pub fp: u64,
    pub tn: u64,
    pub fn_: u64,
}

impl ConfusionMatrix {
    pub fn from_predictions(truth: &[u8], predicted: &[u8]) -> Self {
        let mut cm = Self::default();
        for (&t, &p) in truth.iter().zip(predicted) {
            match (t == 1, p == 1) {
                (true, true) => cm.tp += 1,
                (false, true) => cm.fp += 1,
                (false, false) => cm.tn += 1,
                (true, false) => cm.fn_ += 1,
            }
        }
        cm
    }

    pub const fn total(&self) -> u64 {
        self.tp + self.fp + self.tn + self.fn_
    }
}

/// Test-set scores of one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub confusion: ConfusionMatrix,
    pub precision: MetricValue,
    pub recall: MetricValue,
    pub f1: MetricValue,
}

impl EvaluationMetrics {
    /// Names of the undefined ratio metrics, as logged.
    pub fn undefined_names(&self) -> Vec<&'static str> {
        [
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1score", self.f1),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_undefined())
        .map(|(n, _)| n)
        .collect()
    }

    /// Defined metrics as `(name, value)` pairs, count metrics included.
    #[allow(clippy::cast_precision_loss)]
    pub fn defined_pairs(&self) -> Vec<(&'static str, f64)> {
        let mut out: Vec<(&'static str, f64)> = [
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1score", self.f1),
        ]
        .into_iter()
        .filter_map(|(n, v)| v.value().map(|x| (n, x)))
        .collect();
        out.extend([
            ("tp", self.confusion.tp as f64),
            ("fp", self.confusion.fp as f64),
            ("tn", self.confusion.tn as f64),
            ("fn", self.confusion.fn_ as f64),
        ]);
        out
    }
}

impl fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "precision={} recall={} f1={} (tp={} fp={} tn={} fn={})",
            self.precision,
            self.recall,
            self.f1,
            self.confusion.tp,
            self.confusion.fp,
            self.confusion.tn,
            self.confusion.fn_
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_denominator_is_undefined() {
        assert_eq!(MetricValue::ratio(0.0, 0.0), MetricValue::Undefined);
        assert_eq!(MetricValue::ratio(1.0, 4.0), MetricValue::Defined(0.25));
    }

    #[test]
    fn confusion_counts() {
        let cm = ConfusionMatrix::from_predictions(&[1, 1, 0, 0, 1], &[1, 0, 0, 1, 1]);
        assert_eq!((cm.tp, cm.fp, cm.tn, cm.fn_), (2, 1, 1, 1));
        assert_eq!(cm.total(), 5);
    }

    #[test]
    fn undefined_metrics_are_named_not_logged() {
        let m = EvaluationMetrics {
            confusion: ConfusionMatrix {
                tp: 0,
                fp: 0,
                tn: 3,
                fn_: 2,
            },
            precision: MetricValue::Undefined,
            recall: MetricValue::Defined(0.0),
            f1: MetricValue::Undefined,
        };
        assert_eq!(m.undefined_names(), vec!["precision", "f1score"]);
        let names: Vec<_> = m.defined_pairs().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["recall", "tp", "fp", "tn", "fn"]);
    }
}
