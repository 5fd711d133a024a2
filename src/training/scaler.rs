//! Zero-mean unit-variance feature scaling.
//!
//! Statistics are accumulated with Welford's algorithm over the training
//! rows only, then frozen and applied to any matrix with the same width.

use serde::{Deserialize, Serialize};

use super::matrix::Matrix;

/// Per-column standardizer fitted on training rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    count: u64,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl StandardScaler {
    pub fn new(cols: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; cols],
            m2: vec![0.0; cols],
        }
    }

    /// Fit on every row of `x`.
    pub fn fit(x: &Matrix) -> Self {
        let mut scaler = Self::new(x.cols());
        for row in x.iter_rows() {
            scaler.update(row);
        }
        scaler
    }

    /// Fold one row into the running statistics.
    pub fn update(&mut self, row: &[f64]) {
        self.count += 1;
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        for (i, &x) in row.iter().enumerate().take(self.mean.len()) {
            let delta = x - self.mean[i];
            self.mean[i] += delta / n;
            let delta2 = x - self.mean[i];
            self.m2[i] += delta * delta2;
        }
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Population standard deviation per column; 1 for constant columns.
    pub fn scale(&self) -> Vec<f64> {
        if self.count == 0 {
            return vec![1.0; self.mean.len()];
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        self.m2
            .iter()
            .map(|m2| {
                let std = (m2 / n).sqrt();
                if std == 0.0 {
                    1.0
                } else {
                    std
                }
            })
            .collect()
    }

    /// Standardize one row into `out`.
    pub fn transform_row(&self, row: &[f64], out: &mut [f64]) {
        standardize(&self.mean, &self.scale(), row, out);
    }

    pub fn transform(&self, x: &Matrix) -> Matrix {
        let scale = self.scale();
        let mut out = Matrix::zeros(x.rows(), x.cols());
        for i in 0..x.rows() {
            standardize(&self.mean, &scale, x.row(i), out.row_mut(i));
        }
        out
    }

    pub const fn count(&self) -> u64 {
        self.count
    }
}

fn standardize(mean: &[f64], scale: &[f64], row: &[f64], out: &mut [f64]) {
    for (((o, x), m), s) in out.iter_mut().zip(row).zip(mean).zip(scale) {
        *o = (x - m) / s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardizes_training_columns() {
        let x = Matrix::from_rows(&[[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]]);
        let scaler = StandardScaler::fit(&x);
        assert!((scaler.mean()[0] - 2.0).abs() < 1e-12);
        // Population std of [1, 2, 3] = sqrt(2/3)
        assert!((scaler.scale()[0] - (2.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        // Constant column keeps scale 1
        assert_eq!(scaler.scale()[1], 1.0);

        let t = scaler.transform(&x);
        let col0: Vec<f64> = (0..3).map(|i| t.get(i, 0)).collect();
        assert!(col0.iter().sum::<f64>().abs() < 1e-12);
        assert!(t.get(0, 1).abs() < 1e-12);
    }

    #[test]
    fn transform_row_matches_matrix_transform() {
        let x = Matrix::from_rows(&[[1.0, 10.0], [4.0, 30.0]]);
        let scaler = StandardScaler::fit(&x);
        let mut out = [0.0; 2];
        scaler.transform_row(&[2.5, 20.0], &mut out);
        assert!(out[0].abs() < 1e-12);
        assert!(out[1].abs() < 1e-12);
    }

    #[test]
    fn serde_round_trip_keeps_statistics() {
        let scaler = StandardScaler::fit(&Matrix::from_rows(&[[0.1, 0.2], [0.3, 0.7]]));
        let json = serde_json::to_string(&scaler).unwrap();
        let back: StandardScaler = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scaler);
    }
}
