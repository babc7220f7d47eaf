//! Stage-local model fitting.

use wx_math::{fit_ar, FitMetrics};

/// Fits a model of a given order to one series.
pub trait ModelFitter: Send + Sync {
    /// `None` when the series is too short for the order.
    fn fit(&self, series: &[f64], order: usize) -> Option<FitMetrics>;

    /// Fit every candidate order and keep the lowest MSE-based AIC. Ties go
    /// to the earlier candidate.
    fn select(&self, series: &[f64], orders: &[u32]) -> Option<FitMetrics> {
        orders
            .iter()
            .filter_map(|&p| self.fit(series, p as usize))
            .fold(None, |best: Option<FitMetrics>, m| match best {
                Some(b) if b.aic_mse <= m.aic_mse => Some(b),
                _ => Some(m),
            })
    }
}

/// Yule–Walker AR(p) fit.
#[derive(Debug, Default, Clone, Copy)]
pub struct YuleWalkerFitter;

impl ModelFitter for YuleWalkerFitter {
    fn fit(&self, series: &[f64], order: usize) -> Option<FitMetrics> {
        let model = fit_ar(series, order)?;
        FitMetrics::evaluate(&model, series)
    }
}
