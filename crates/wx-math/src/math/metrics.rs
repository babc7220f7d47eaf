//! Forecast error measures and information criteria.

use serde::{Deserialize, Serialize};

use super::ar::ArModel;

/// Mean squared error over `(actual, predicted)` pairs.
pub fn mse(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::NAN;
    }
    pairs.iter().map(|(a, p)| (a - p).powi(2)).sum::<f64>() / pairs.len() as f64
}

/// Mean arctangent absolute percentage error.
///
/// Bounded in `[0, π/2]` and defined for zero actuals: an exact prediction
/// of zero scores 0, any other prediction of a zero actual scores π/2.
pub fn maape(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::NAN;
    }
    let total: f64 = pairs
        .iter()
        .map(|(a, p)| {
            let err = (a - p).abs();
            if err == 0.0 {
                0.0
            } else if *a == 0.0 {
                std::f64::consts::FRAC_PI_2
            } else {
                (err / a.abs()).atan()
            }
        })
        .sum();
    total / pairs.len() as f64
}

/// Akaike information criterion from an error measure:
/// `n ln(err) + 2k`.
pub fn aic(n: usize, err: f64, k: usize) -> f64 {
    n as f64 * err.max(f64::MIN_POSITIVE).ln() + 2.0 * k as f64
}

/// Bayesian information criterion from an error measure:
/// `n ln(err) + k ln(n)`.
pub fn bic(n: usize, err: f64, k: usize) -> f64 {
    n as f64 * err.max(f64::MIN_POSITIVE).ln() + k as f64 * (n as f64).ln()
}

/// Goodness-of-fit summary for one fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitMetrics {
    pub order: usize,
    /// Number of predictions the metrics were computed over.
    pub n: usize,
    pub mse: f64,
    pub maape: f64,
    pub aic_mse: f64,
    pub aic_maape: f64,
    pub bic_mse: f64,
    pub bic_maape: f64,
    /// Mean followed by the lag coefficients.
    pub params: Vec<f64>,
}

impl FitMetrics {
    /// Score a model against the series it was fitted on. `None` when the
    /// model leaves no predictions to score.
    pub fn evaluate(model: &ArModel, xs: &[f64]) -> Option<Self> {
        let pairs = model.fitted(xs);
        if pairs.is_empty() {
            return None;
        }
        let n = pairs.len();
        let k = model.parameter_count();
        let mse = mse(&pairs);
        let maape = maape(&pairs);
        let mut params = Vec::with_capacity(k);
        params.push(model.mean);
        params.extend_from_slice(&model.phi);
        Some(Self {
            order: model.order,
            n,
            mse,
            maape,
            aic_mse: aic(n, mse, k),
            aic_maape: aic(n, maape, k),
            bic_mse: bic(n, mse, k),
            bic_maape: bic(n, maape, k),
            params,
        })
    }
}
