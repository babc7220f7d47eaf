//! Moment and autocovariance statistics over a single ordered series.
//!
//! All functions take the series in time order. Degenerate inputs (empty
//! series, lag past the end, zero variance) yield `NaN` rather than a
//! panic, mirroring the log-domain helpers' convention.

/// Arithmetic mean.
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population variance (divides by `n`), equal to `autocovariance(xs, 0)`.
pub fn variance(xs: &[f64]) -> f64 {
    autocovariance(xs, 0)
}

/// Sample autocovariance at lag `k`, biased estimator:
/// `γ(k) = 1/n Σ_{t=k}^{n-1} (x_t - m)(x_{t-k} - m)`.
pub fn autocovariance(xs: &[f64], k: usize) -> f64 {
    let n = xs.len();
    if n == 0 || k >= n {
        return f64::NAN;
    }
    let m = mean(xs);
    let sum: f64 = (k..n).map(|t| (xs[t] - m) * (xs[t - k] - m)).sum();
    sum / n as f64
}

/// Autocorrelation at lag `k`: `γ(k) / γ(0)`.
pub fn autocorrelation(xs: &[f64], k: usize) -> f64 {
    let g0 = autocovariance(xs, 0);
    if g0.is_nan() || g0.abs() < 1e-15 {
        return f64::NAN;
    }
    autocovariance(xs, k) / g0
}
