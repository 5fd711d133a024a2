//! Regularized binary logistic regression.
//!
//! Objective over rows `i` with labels `y_i` in {0, 1} and per-sample weight
//! `c_i = C * class_weight(y_i)`:
//!
//! - L2: `0.5 * |w|^2 + sum_i c_i * log(1 + exp(-s_i * z_i))`
//! - L1: `|w|_1 + sum_i c_i * log(1 + exp(-s_i * z_i))`
//!
//! where `z_i = w . x_i + b` and `s_i = 2 * y_i - 1`. The intercept is not
//! penalized.
//!
//! Two solvers:
//! - `liblinear`: cyclic coordinate descent with a one-dimensional Newton
//!   step and backtracking line search per coordinate (L1 and L2).
//! - `lbfgs`: limited-memory BFGS with Armijo backtracking (L2 only).
//!
//! Both stop once the max-norm of the (sub)gradient falls below
//! `tol * max(1, |grad at zero|)`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::matrix::Matrix;
use crate::types::{ClassWeight, Penalty, Solver};

/// L-BFGS history length.
const LBFGS_MEMORY: usize = 10;

/// Sufficient decrease constant for every line search.
const ARMIJO_SIGMA: f64 = 1e-4;

/// Halvings before a line search gives up.
const MAX_BACKTRACKS: usize = 40;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FitError {
    #[error("solver {solver} does not support penalty {penalty}")]
    UnsupportedPenalty { solver: Solver, penalty: Penalty },

    #[error("no training rows")]
    Empty,

    #[error("training rows contain a single class")]
    SingleClass,

    #[error("cannot build {folds} folds: {detail}")]
    DegenerateFolds { folds: usize, detail: String },

    #[error("{solver} did not converge in {iterations} iterations (gradient {gradient:.3e})")]
    NotConverged {
        solver: Solver,
        iterations: usize,
        gradient: f64,
    },

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

/// Solver settings for a single fit at a fixed C.
#[derive(Debug, Clone, Copy)]
pub struct FitSettings {
    pub solver: Solver,
    pub penalty: Penalty,
    pub c: f64,
    pub class_weight: ClassWeight,
    pub max_iter: usize,
    pub tol: f64,
}

/// Fitted linear decision function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub coef: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    pub fn zeros(cols: usize) -> Self {
        Self {
            coef: vec![0.0; cols],
            intercept: 0.0,
        }
    }

    pub fn decision(&self, row: &[f64]) -> f64 {
        dot(&self.coef, row) + self.intercept
    }

    pub fn predict_proba(&self, x: &Matrix) -> Vec<f64> {
        x.iter_rows().map(|r| sigmoid(self.decision(r))).collect()
    }

    /// Class 1 when the decision function is positive.
    pub fn predict(&self, x: &Matrix) -> Vec<u8> {
        x.iter_rows()
            .map(|r| u8::from(self.decision(r) > 0.0))
            .collect()
    }

    /// Number of non-zero coefficients.
    pub fn nnz(&self) -> usize {
        self.coef.iter().filter(|c| **c != 0.0).count()
    }
}

/// Fit at one C, optionally warm-started from `init`.
pub fn fit(
    x: &Matrix,
    y: &[u8],
    settings: &FitSettings,
    init: Option<&LogisticModel>,
) -> Result<LogisticModel, FitError> {
    if !settings.solver.supports(settings.penalty) {
        return Err(FitError::UnsupportedPenalty {
            solver: settings.solver,
            penalty: settings.penalty,
        });
    }
    let problem = Problem::new(x, y, settings)?;
    let start = init
        .filter(|m| m.coef.len() == x.cols())
        .cloned()
        .unwrap_or_else(|| LogisticModel::zeros(x.cols()));

    match settings.solver {
        Solver::Liblinear => coordinate_descent(&problem, settings, start),
        Solver::Lbfgs => lbfgs(&problem, settings, start),
    }
}

// ============================================================================
// Shared objective pieces
// ============================================================================

struct Problem<'a> {
    x: &'a Matrix,
    y: &'a [u8],
    /// `C * class_weight(y_i)`
    weight: Vec<f64>,
}

impl<'a> Problem<'a> {
    fn new(x: &'a Matrix, y: &'a [u8], settings: &FitSettings) -> Result<Self, FitError> {
        if x.rows() == 0 || y.is_empty() {
            return Err(FitError::Empty);
        }
        let positives = y.iter().filter(|&&l| l == 1).count();
        if positives == 0 || positives == y.len() {
            return Err(FitError::SingleClass);
        }
        if !x.all_finite() {
            return Err(FitError::NonFinite("training matrix"));
        }
        let weight = y
            .iter()
            .map(|&l| settings.c * settings.class_weight.for_label(l))
            .collect();
        Ok(Self { x, y, weight })
    }

    fn decisions(&self, model: &LogisticModel) -> Vec<f64> {
        self.x.iter_rows().map(|r| model.decision(r)).collect()
    }

    /// Weighted data loss for the given decision values.
    fn loss(&self, z: &[f64]) -> f64 {
        z.iter()
            .zip(self.y)
            .zip(&self.weight)
            .map(|((&zi, &yi), &ci)| ci * log1pexp(-sign(yi) * zi))
            .sum()
    }

    /// `c_i * (sigma(z_i) - y_i)`, the derivative of the loss w.r.t. `z_i`.
    fn residuals(&self, z: &[f64]) -> Vec<f64> {
        z.iter()
            .zip(self.y)
            .zip(&self.weight)
            .map(|((&zi, &yi), &ci)| ci * (sigmoid(zi) - f64::from(yi)))
            .collect()
    }

    /// Data-term gradient: `(d/dw, d/db)`.
    fn data_gradient(&self, z: &[f64]) -> (Vec<f64>, f64) {
        let r = self.residuals(z);
        let mut gw = vec![0.0; self.x.cols()];
        for (row, ri) in self.x.iter_rows().zip(&r) {
            for (g, xj) in gw.iter_mut().zip(row) {
                *g += ri * xj;
            }
        }
        (gw, r.iter().sum())
    }
}

/// Max-norm of the optimality measure for the full objective.
fn optimality(penalty: Penalty, coef: &[f64], gw: &[f64], gb: f64) -> f64 {
    let mut worst = gb.abs();
    for (&w, &g) in coef.iter().zip(gw) {
        let v = match penalty {
            Penalty::L2 => (g + w).abs(),
            Penalty::L1 if w > 0.0 => (g + 1.0).abs(),
            Penalty::L1 if w < 0.0 => (g - 1.0).abs(),
            Penalty::L1 => (g.abs() - 1.0).max(0.0),
        };
        worst = worst.max(v);
    }
    worst
}

/// Stopping threshold, scaled by the data gradient at the origin.
fn stopping_threshold(problem: &Problem<'_>, tol: f64) -> f64 {
    let z0 = vec![0.0; problem.y.len()];
    let (gw, gb) = problem.data_gradient(&z0);
    let g0 = gw.iter().fold(gb.abs(), |m, g| m.max(g.abs()));
    tol * g0.max(1.0)
}

// ============================================================================
// Coordinate descent (liblinear)
// ============================================================================

fn regularizer(penalty: Penalty, w: f64) -> f64 {
    match penalty {
        Penalty::L1 => w.abs(),
        Penalty::L2 => 0.5 * w * w,
    }
}

fn coordinate_descent(
    problem: &Problem<'_>,
    settings: &FitSettings,
    mut model: LogisticModel,
) -> Result<LogisticModel, FitError> {
    let x = problem.x;
    let cols = x.cols();
    let threshold = stopping_threshold(problem, settings.tol);

    let mut z = problem.decisions(&model);
    let mut loss = problem.loss(&z);
    if !loss.is_finite() {
        return Err(FitError::NonFinite("initial loss"));
    }
    let mut gradient = f64::INFINITY;

    for _ in 0..settings.max_iter {
        // Coordinate `cols` is the intercept.
        for j in 0..=cols {
            let is_intercept = j == cols;
            let column = |i: usize| if is_intercept { 1.0 } else { x.get(i, j) };

            let mut g = 0.0;
            let mut h = 0.0;
            for (i, &zi) in z.iter().enumerate() {
                let p = sigmoid(zi);
                let xij = column(i);
                let ci = problem.weight[i];
                g += ci * (p - f64::from(problem.y[i])) * xij;
                h += ci * p * (1.0 - p) * xij * xij;
            }
            let h = h.max(1e-12);

            let wj = if is_intercept { model.intercept } else { model.coef[j] };
            let step = if is_intercept {
                -g / h
            } else {
                match settings.penalty {
                    Penalty::L2 => -(g + wj) / (h + 1.0),
                    Penalty::L1 => {
                        if g + 1.0 <= h * wj {
                            -(g + 1.0) / h
                        } else if g - 1.0 >= h * wj {
                            -(g - 1.0) / h
                        } else {
                            -wj
                        }
                    }
                }
            };
            if !step.is_finite() {
                return Err(FitError::NonFinite("coordinate step"));
            }
            if step == 0.0 {
                continue;
            }

            let reg = |v: f64| {
                if is_intercept {
                    0.0
                } else {
                    regularizer(settings.penalty, v)
                }
            };
            let predicted = g * step + reg(wj + step) - reg(wj);

            let mut lambda = 1.0;
            for _ in 0..MAX_BACKTRACKS {
                let s = lambda * step;
                let trial: Vec<f64> = z
                    .iter()
                    .enumerate()
                    .map(|(i, zi)| zi + s * column(i))
                    .collect();
                let trial_loss = problem.loss(&trial);
                let change = trial_loss - loss + reg(wj + s) - reg(wj);
                if change <= ARMIJO_SIGMA * lambda * predicted {
                    z = trial;
                    loss = trial_loss;
                    if is_intercept {
                        model.intercept += s;
                    } else {
                        model.coef[j] += s;
                    }
                    break;
                }
                lambda *= 0.5;
            }
        }

        let (gw, gb) = problem.data_gradient(&z);
        gradient = optimality(settings.penalty, &model.coef, &gw, gb);
        if !gradient.is_finite() || !loss.is_finite() {
            return Err(FitError::NonFinite("objective"));
        }
        if gradient <= threshold {
            return Ok(model);
        }
    }

    Err(FitError::NotConverged {
        solver: Solver::Liblinear,
        iterations: settings.max_iter,
        gradient,
    })
}

// ============================================================================
// L-BFGS
// ============================================================================

/// Parameter vector layout: `[w_0 .. w_{d-1}, b]`.
fn objective(problem: &Problem<'_>, theta: &[f64]) -> (f64, Vec<f64>) {
    let cols = problem.x.cols();
    let model = LogisticModel {
        coef: theta[..cols].to_vec(),
        intercept: theta[cols],
    };
    let z = problem.decisions(&model);
    let f = 0.5 * dot(&model.coef, &model.coef) + problem.loss(&z);
    let (mut gw, gb) = problem.data_gradient(&z);
    for (g, w) in gw.iter_mut().zip(&model.coef) {
        *g += w;
    }
    gw.push(gb);
    (f, gw)
}

fn lbfgs(
    problem: &Problem<'_>,
    settings: &FitSettings,
    start: LogisticModel,
) -> Result<LogisticModel, FitError> {
    let cols = problem.x.cols();
    let threshold = stopping_threshold(problem, settings.tol);

    let mut theta = start.coef;
    theta.push(start.intercept);
    let (mut f, mut g) = objective(problem, &theta);
    if !f.is_finite() {
        return Err(FitError::NonFinite("initial loss"));
    }

    let mut history: VecDeque<(Vec<f64>, Vec<f64>, f64)> = VecDeque::with_capacity(LBFGS_MEMORY);
    let mut gradient = max_abs(&g);

    for _ in 0..settings.max_iter {
        if gradient <= threshold {
            break;
        }

        let mut d = two_loop(&g, &history);
        let mut dg = dot(&d, &g);
        if dg >= 0.0 {
            history.clear();
            d = g.iter().map(|v| -v).collect();
            dg = -dot(&g, &g);
        }
        if history.is_empty() {
            // Unit-length first step
            let norm = dot(&d, &d).sqrt();
            if norm > 1.0 {
                for v in &mut d {
                    *v /= norm;
                }
                dg /= norm;
            }
        }

        let mut step = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let trial: Vec<f64> = theta.iter().zip(&d).map(|(t, di)| t + step * di).collect();
            let (ft, gt) = objective(problem, &trial);
            if ft.is_finite() && ft <= f + ARMIJO_SIGMA * step * dg {
                accepted = Some((trial, ft, gt));
                break;
            }
            step *= 0.5;
        }

        let Some((next, f_next, g_next)) = accepted else {
            if history.is_empty() {
                break;
            }
            history.clear();
            continue;
        };

        let s: Vec<f64> = next.iter().zip(&theta).map(|(a, b)| a - b).collect();
        let yv: Vec<f64> = g_next.iter().zip(&g).map(|(a, b)| a - b).collect();
        let sy = dot(&s, &yv);
        if sy > 1e-10 {
            if history.len() == LBFGS_MEMORY {
                history.pop_front();
            }
            history.push_back((s, yv, 1.0 / sy));
        }

        theta = next;
        f = f_next;
        g = g_next;
        gradient = max_abs(&g);
        if !gradient.is_finite() {
            return Err(FitError::NonFinite("gradient"));
        }
    }

    if gradient <= threshold {
        let intercept = theta[cols];
        theta.truncate(cols);
        Ok(LogisticModel {
            coef: theta,
            intercept,
        })
    } else {
        Err(FitError::NotConverged {
            solver: Solver::Lbfgs,
            iterations: settings.max_iter,
            gradient,
        })
    }
}

/// `-H * g` from the stored curvature pairs.
fn two_loop(g: &[f64], history: &VecDeque<(Vec<f64>, Vec<f64>, f64)>) -> Vec<f64> {
    let mut q = g.to_vec();
    let mut alpha = Vec::with_capacity(history.len());
    for (s, y, rho) in history.iter().rev() {
        let a = rho * dot(s, &q);
        for (qi, yi) in q.iter_mut().zip(y) {
            *qi -= a * yi;
        }
        alpha.push(a);
    }
    if let Some((s, y, _)) = history.back() {
        let gamma = dot(s, y) / dot(y, y).max(f64::MIN_POSITIVE);
        for qi in &mut q {
            *qi *= gamma;
        }
    }
    for ((s, y, rho), a) in history.iter().zip(alpha.iter().rev()) {
        let b = rho * dot(y, &q);
        for (qi, si) in q.iter_mut().zip(s) {
            *qi += (a - b) * si;
        }
    }
    q.iter().map(|v| -v).collect()
}

// ============================================================================
// Numerics
// ============================================================================

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |m, x| m.max(x.abs()))
}

fn sign(label: u8) -> f64 {
    if label == 1 {
        1.0
    } else {
        -1.0
    }
}

/// `log(1 + exp(t))` without overflow.
fn log1pexp(t: f64) -> f64 {
    if t > 0.0 {
        t + (-t).exp().ln_1p()
    } else {
        t.exp().ln_1p()
    }
}

pub fn sigmoid(t: f64) -> f64 {
    if t >= 0.0 {
        1.0 / (1.0 + (-t).exp())
    } else {
        let e = t.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two overlapping clusters along the first feature.
    fn toy() -> (Matrix, Vec<u8>) {
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let t = f64::from(i) / 10.0;
            rows.push([t - 2.0, (t * 1.7).sin()]);
            y.push(u8::from((i >= 18 && i != 25) || i == 12));
        }
        (Matrix::from_rows(&rows), y)
    }

    fn settings(solver: Solver, penalty: Penalty, c: f64) -> FitSettings {
        FitSettings {
            solver,
            penalty,
            c,
            class_weight: ClassWeight::UNIFORM,
            max_iter: 1000,
            tol: 1e-6,
        }
    }

    #[test]
    fn solvers_agree_on_l2() {
        let (x, y) = toy();
        let a = fit(&x, &y, &settings(Solver::Liblinear, Penalty::L2, 1.0), None).unwrap();
        let b = fit(&x, &y, &settings(Solver::Lbfgs, Penalty::L2, 1.0), None).unwrap();
        for (ca, cb) in a.coef.iter().zip(&b.coef) {
            assert!((ca - cb).abs() < 1e-3, "{a:?} vs {b:?}");
        }
        assert!((a.intercept - b.intercept).abs() < 1e-3);
        assert!(a.coef[0] > 0.0);
    }

    #[test]
    fn separates_toy_data() {
        let (x, y) = toy();
        let m = fit(&x, &y, &settings(Solver::Liblinear, Penalty::L2, 10.0), None).unwrap();
        let pred = m.predict(&x);
        let correct = pred.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(correct >= 36, "only {correct}/40 correct");
    }

    #[test]
    fn strong_l1_zeroes_coefficients() {
        let (x, y) = toy();
        let m = fit(&x, &y, &settings(Solver::Liblinear, Penalty::L1, 1e-4), None).unwrap();
        assert_eq!(m.nnz(), 0);
    }

    #[test]
    fn lbfgs_rejects_l1() {
        let (x, y) = toy();
        let err = fit(&x, &y, &settings(Solver::Lbfgs, Penalty::L1, 1.0), None).unwrap_err();
        assert!(matches!(err, FitError::UnsupportedPenalty { .. }));
    }

    #[test]
    fn single_class_is_rejected() {
        let x = Matrix::from_rows(&[[1.0], [2.0]]);
        let err = fit(&x, &[0, 0], &settings(Solver::Liblinear, Penalty::L2, 1.0), None);
        assert_eq!(err.unwrap_err(), FitError::SingleClass);
    }

    #[test]
    fn warm_start_reaches_same_solution() {
        let (x, y) = toy();
        let s = settings(Solver::Liblinear, Penalty::L2, 5.0);
        let cold = fit(&x, &y, &s, None).unwrap();
        let seed = fit(&x, &y, &settings(Solver::Liblinear, Penalty::L2, 1.0), None).unwrap();
        let warm = fit(&x, &y, &s, Some(&seed)).unwrap();
        for (a, b) in cold.coef.iter().zip(&warm.coef) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn class_weight_shifts_decisions_toward_heavier_class() {
        let (x, y) = toy();
        let mut s = settings(Solver::Lbfgs, Penalty::L2, 1.0);
        s.class_weight = ClassWeight::from_negative(0.2);
        let favour_pos = fit(&x, &y, &s, None).unwrap();
        s.class_weight = ClassWeight::from_negative(0.8);
        let favour_neg = fit(&x, &y, &s, None).unwrap();
        let pos = |m: &LogisticModel| m.predict(&x).iter().filter(|&&p| p == 1).count();
        assert!(pos(&favour_pos) >= pos(&favour_neg));
    }

    #[test]
    fn sigmoid_is_stable() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-15);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!((sigmoid(800.0) - 1.0).abs() < 1e-15);
        assert!(log1pexp(800.0).is_finite());
    }
}
