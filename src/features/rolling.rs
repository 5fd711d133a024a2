//! Trailing-window statistics over time-ordered series.
//!
//! A window covers the current row and up to `window - 1` preceding rows.
//! Missing observations (`None` or NaN) do not count toward `min_periods`;
//! a window with fewer valid observations yields `None`.

use statrs::statistics::Statistics;

fn valid(v: Option<f64>) -> Option<f64> {
    v.filter(|x| !x.is_nan())
}

/// Apply `f` to the valid observations of every trailing window.
fn rolling_apply<F>(series: &[Option<f64>], window: usize, min_periods: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = Vec::with_capacity(series.len());
    let mut buf = Vec::with_capacity(window);
    for i in 0..series.len() {
        let start = (i + 1).saturating_sub(window);
        buf.clear();
        buf.extend(series[start..=i].iter().copied().filter_map(valid));
        out.push(if buf.len() >= min_periods.max(1) {
            Some(f(&buf))
        } else {
            None
        });
    }
    out
}

pub fn rolling_sum(series: &[Option<f64>], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    rolling_apply(series, window, min_periods, |w| w.iter().sum())
}

pub fn rolling_mean(series: &[Option<f64>], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    rolling_apply(series, window, min_periods, |w| w.mean())
}

/// Sample standard deviation (ddof = 1). Needs at least two observations.
pub fn rolling_std(series: &[Option<f64>], window: usize, min_periods: usize) -> Vec<Option<f64>> {
    rolling_apply(series, window, min_periods.max(2), |w| w.std_dev())
}

/// First difference; row 0 has no predecessor.
pub fn diff(series: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(series.len());
    if !series.is_empty() {
        out.push(None);
    }
    out.extend(series.windows(2).map(|w| Some(w[1] - w[0]).filter(|d| !d.is_nan())));
    out
}
