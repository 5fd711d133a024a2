//! Cross-sectional statistics: medians, percentiles and row-wise spread.
//!
//! All functions skip NaN inputs.

use statrs::statistics::{Data, Median, Statistics};

fn non_nan(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Sum of the non-NaN values; 0 when there are none.
pub fn nan_sum(values: &[f64]) -> f64 {
    values.iter().filter(|v| !v.is_nan()).sum()
}

/// Median of the non-NaN values, NaN when there are none.
pub fn median(values: &[f64]) -> f64 {
    let v = non_nan(values);
    if v.is_empty() {
        return f64::NAN;
    }
    Data::new(v).median()
}

/// Quantile with linear interpolation between closest ranks:
/// `h = (n - 1) * q`, `x[floor(h)] + (h - floor(h)) * (x[floor(h) + 1] - x[floor(h)])`.
pub fn quantile_linear(values: &[f64], q: f64) -> f64 {
    let mut v = non_nan(values);
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(f64::total_cmp);
    #[allow(clippy::cast_precision_loss)]
    let h = (v.len() - 1) as f64 * q.clamp(0.0, 1.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(v.len() - 1);
    v[lo] + (h - h.floor()) * (v[hi] - v[lo])
}

/// Row maximum, NaN when every value is NaN.
pub fn row_max(values: &[f64]) -> f64 {
    let v = non_nan(values);
    if v.is_empty() {
        f64::NAN
    } else {
        Statistics::max(v.iter())
    }
}

/// Row population standard deviation (ddof = 0).
pub fn row_population_std(values: &[f64]) -> f64 {
    let v = non_nan(values);
    if v.is_empty() {
        f64::NAN
    } else {
        v.iter().population_std_dev()
    }
}
