//! Autoregressive model fitting.
//!
//! Fits `AR(p)` by solving the Yule–Walker equations with the
//! Levinson–Durbin recursion over the biased sample autocovariances. The
//! biased estimator keeps the autocovariance matrix positive semi-definite,
//! so every reflection coefficient stays inside `[-1, 1]`.

use serde::{Deserialize, Serialize};

use super::stats::{autocovariance, mean};

/// A fitted `AR(p)` model, centred on the series mean:
/// `x_t - m = Σ φ_i (x_{t-i} - m) + ε_t`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArModel {
    pub order: usize,
    pub mean: f64,
    /// `phi[i]` is the coefficient on lag `i + 1`.
    pub phi: Vec<f64>,
    /// Innovation variance left after the final recursion step.
    pub noise_variance: f64,
}

/// Fit an `AR(p)` model. Returns `None` when `p` is zero or the series has
/// no more than `p` points.
pub fn fit_ar(xs: &[f64], p: usize) -> Option<ArModel> {
    if p == 0 || xs.len() <= p {
        return None;
    }
    let m = mean(xs);
    let gamma: Vec<f64> = (0..=p).map(|k| autocovariance(xs, k)).collect();
    if gamma[0].abs() < 1e-15 {
        return Some(ArModel {
            order: p,
            mean: m,
            phi: vec![0.0; p],
            noise_variance: 0.0,
        });
    }

    let mut phi = vec![0.0; p];
    let mut err = gamma[0];
    for k in 1..=p {
        if err <= 0.0 {
            break;
        }
        let mut acc = gamma[k];
        for j in 1..k {
            acc -= phi[j - 1] * gamma[k - j];
        }
        let kappa = acc / err;
        let prev = phi.clone();
        phi[k - 1] = kappa;
        for j in 1..k {
            phi[j - 1] = prev[j - 1] - kappa * prev[k - j - 1];
        }
        err = (err * (1.0 - kappa * kappa)).max(0.0);
    }

    Some(ArModel {
        order: p,
        mean: m,
        phi,
        noise_variance: err,
    })
}

impl ArModel {
    /// One-step-ahead in-sample predictions as `(actual, predicted)` pairs,
    /// starting at the first index with a full lag window.
    pub fn fitted(&self, xs: &[f64]) -> Vec<(f64, f64)> {
        (self.order..xs.len())
            .map(|t| {
                let pred = self.mean
                    + self
                        .phi
                        .iter()
                        .enumerate()
                        .map(|(i, c)| c * (xs[t - i - 1] - self.mean))
                        .sum::<f64>();
                (xs[t], pred)
            })
            .collect()
    }

    /// Number of estimated parameters (coefficients plus the mean).
    pub fn parameter_count(&self) -> usize {
        self.order + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic AR(1) series with coefficient `a` driven by a fixed
    /// pseudo-random sequence.
    fn ar1_series(a: f64, n: usize) -> Vec<f64> {
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut x = 0.0;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let noise = (state % 1000) as f64 / 1000.0 - 0.5;
            x = a * x + noise;
            out.push(x);
        }
        out
    }

    #[test]
    fn recovers_ar1_coefficient() {
        let xs = ar1_series(0.7, 2000);
        let model = fit_ar(&xs, 1).unwrap();
        assert!((model.phi[0] - 0.7).abs() < 0.1, "phi = {:?}", model.phi);
        assert!(model.noise_variance > 0.0);
    }

    #[test]
    fn second_coefficient_small_for_ar1() {
        let xs = ar1_series(0.5, 2000);
        let model = fit_ar(&xs, 2).unwrap();
        assert!(model.phi[1].abs() < 0.1, "phi = {:?}", model.phi);
    }

    #[test]
    fn too_short_or_zero_order() {
        assert!(fit_ar(&[1.0, 2.0], 2).is_none());
        assert!(fit_ar(&[1.0, 2.0, 3.0], 0).is_none());
    }

    #[test]
    fn constant_series_fits_flat_model() {
        let model = fit_ar(&[5.0; 10], 2).unwrap();
        assert_eq!(model.phi, vec![0.0, 0.0]);
        let fitted = model.fitted(&[5.0; 10]);
        assert_eq!(fitted.len(), 8);
        assert!(fitted.iter().all(|(a, p)| (a - p).abs() < 1e-12));
    }

    #[test]
    fn fitted_skips_warmup_window() {
        let xs = ar1_series(0.3, 50);
        let model = fit_ar(&xs, 3).unwrap();
        assert_eq!(model.fitted(&xs).len(), 47);
        assert_eq!(model.parameter_count(), 4);
    }
}
