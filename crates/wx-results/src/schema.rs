//! Arrow schema for extracted model results.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};

/// The seven per-series results read from the final table, in output order.
pub const RESULT_COLUMNS: [&str; 7] = [
    "mse",
    "maape",
    "aic_mse",
    "aic_maape",
    "bic_mse",
    "bic_maape",
    "params",
];

/// One series' extracted model-fit results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResultRow {
    pub series_id: String,
    /// AR order of the selected model.
    pub order: u32,
    pub mse: f64,
    pub maape: f64,
    pub aic_mse: f64,
    pub aic_maape: f64,
    pub bic_mse: f64,
    pub bic_maape: f64,
    /// Mean followed by the lag coefficients.
    pub params: Vec<f64>,
}

/// Schema of the `model_results` table.
pub fn model_results_schema() -> SchemaRef {
    let metric = |name: &str| Field::new(name, DataType::Float64, false);
    Arc::new(Schema::new(vec![
        Field::new("series_id", DataType::Utf8, false),
        Field::new("order", DataType::UInt32, false),
        metric("mse"),
        metric("maape"),
        metric("aic_mse"),
        metric("aic_maape"),
        metric("bic_mse"),
        metric("bic_maape"),
        Field::new(
            "params",
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
            false,
        ),
    ]))
}
