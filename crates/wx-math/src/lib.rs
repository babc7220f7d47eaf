//! Weather series math utilities.

pub mod math;

pub use math::ar::{fit_ar, ArModel};
pub use math::difference::{difference, difference_n};
pub use math::metrics::{aic, bic, maape, mse, FitMetrics};
pub use math::stats::{autocorrelation, autocovariance, mean, variance};
