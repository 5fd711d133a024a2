//! Classifier hyperparameter types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Optimization algorithm for the logistic loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    /// Cyclic coordinate descent, L1 and L2
    Liblinear,
    /// Limited-memory BFGS, L2 only
    Lbfgs,
}

impl Solver {
    pub const fn supports(self, penalty: Penalty) -> bool {
        match self {
            Self::Liblinear => true,
            Self::Lbfgs => matches!(penalty, Penalty::L2),
        }
    }
}

impl fmt::Display for Solver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Liblinear => "liblinear",
            Self::Lbfgs => "lbfgs",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Penalty {
    L1,
    L2,
}

impl fmt::Display for Penalty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
        })
    }
}

/// Per-class sample weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeight {
    pub negative: f64,
    pub positive: f64,
}

impl ClassWeight {
    pub const UNIFORM: Self = Self {
        negative: 1.0,
        positive: 1.0,
    };

    /// `{0: w, 1: 1 - w}`
    pub fn from_negative(w: f64) -> Self {
        Self {
            negative: w,
            positive: 1.0 - w,
        }
    }

    pub fn for_label(&self, label: u8) -> f64 {
        if label == 1 {
            self.positive
        } else {
            self.negative
        }
    }
}

impl Default for ClassWeight {
    fn default() -> Self {
        Self::UNIFORM
    }
}

impl fmt::Display for ClassWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{0: {}, 1: {}}}", self.negative, self.positive)
    }
}

/// One point of the search grid, also the realized parameters of a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub solver: Solver,
    pub penalty: Penalty,
    /// Length of the log-spaced C path scanned by cross-validation
    pub c_path_size: usize,
    pub class_weight: ClassWeight,
}

impl Hyperparameters {
    /// Estimator-style parameter map for run logging.
    pub fn to_params(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("solver".to_string(), self.solver.to_string()),
            ("penalty".to_string(), self.penalty.to_string()),
            ("Cs".to_string(), self.c_path_size.to_string()),
            ("class_weight".to_string(), self.class_weight.to_string()),
        ])
    }
}

impl fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "solver={} penalty={} Cs={} class_weight={}",
            self.solver, self.penalty, self.c_path_size, self.class_weight
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lbfgs_rejects_l1() {
        assert!(!Solver::Lbfgs.supports(Penalty::L1));
        assert!(Solver::Lbfgs.supports(Penalty::L2));
        assert!(Solver::Liblinear.supports(Penalty::L1));
    }

    #[test]
    fn class_weight_complements() {
        let w = ClassWeight::from_negative(0.2);
        assert!((w.positive - 0.8).abs() < 1e-12);
        assert_eq!(w.for_label(0), 0.2);
        assert_eq!(w.to_string(), "{0: 0.2, 1: 0.8}");
    }

    #[test]
    fn params_use_estimator_names() {
        let hp = Hyperparameters {
            solver: Solver::Liblinear,
            penalty: Penalty::L1,
            c_path_size: 10,
            class_weight: ClassWeight::UNIFORM,
        };
        let params = hp.to_params();
        assert_eq!(params["solver"], "liblinear");
        assert_eq!(params["penalty"], "l1");
        assert_eq!(params["Cs"], "10");
    }
}
