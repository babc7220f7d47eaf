//! Semantic validation of a resolved property set.
//!
//! Validation runs before any stage so a misconfigured run fails without
//! touching the store.

use serde::Serialize;

use crate::keys;
use crate::properties::range_spec;
use crate::Properties;

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub key: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Outcome of validating a property set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, key: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            key: key.to_string(),
            message: message.into(),
        });
    }

    fn warn(&mut self, key: &str, message: impl Into<String>) {
        self.warnings.push(ValidationError {
            key: key.to_string(),
            message: message.into(),
        });
    }
}

/// Validate the pipeline-level keys.
pub fn validate(props: &Properties) -> ValidationResult {
    let mut result = ValidationResult::default();

    for key in keys::PIPELINE_REQUIRED {
        if props.require(key).is_err() {
            result.error(key, "required property is missing");
        }
    }

    if let Some(d) = props.get(keys::ARIMA_D) {
        if d.trim().parse::<u32>().is_err() {
            result.error(keys::ARIMA_D, format!("'{d}' is not a differencing order"));
        }
    }

    if let Some(p) = props.get(keys::ARIMA_P) {
        match range_spec(keys::ARIMA_P, p) {
            Ok(lags) if lags.is_empty() => result.error(keys::ARIMA_P, "no lags configured"),
            Ok(lags) if lags.contains(&0) => {
                result.error(keys::ARIMA_P, "lag orders must be at least 1")
            }
            Ok(_) => {}
            Err(e) => result.error(keys::ARIMA_P, e.to_string()),
        }
    }

    if let Some(mode) = props.get(keys::ARIMA_DIFFERENCING_MODE) {
        if !valid_mode(mode) {
            result.error(
                keys::ARIMA_DIFFERENCING_MODE,
                format!("'{mode}' is neither 'step' nor 'season:<period>'"),
            );
        }
    }

    if let Some(fmt) = props.get(keys::RESULTS_FORMAT) {
        if !matches!(fmt.trim().to_ascii_lowercase().as_str(), "json" | "parquet") {
            result.error(keys::RESULTS_FORMAT, format!("unsupported format '{fmt}'"));
        }
    }

    match props.get_u32(keys::JOB_PARTITIONS, 1) {
        Ok(0) => result.error(keys::JOB_PARTITIONS, "partition count must be positive"),
        Ok(_) => {}
        Err(e) => result.error(keys::JOB_PARTITIONS, e.to_string()),
    }

    for key in [keys::LAG_PASS_THROUGH, keys::JOB_WAIT, keys::JOB_VERBOSE] {
        if let Err(e) = props.get_bool(key, false) {
            result.error(key, e.to_string());
        }
    }

    // The clear stage deletes these tables; the input must not be one of them.
    if let Some(input) = props.get(keys::ARIMA_IN_TABLE) {
        for key in [
            keys::ARIMA_DIFFERENCING_TABLE,
            keys::ARIMA_LAGS_TABLE,
            keys::ARIMA_OUT_TABLE,
        ] {
            if props.get(key) == Some(input) {
                result.error(key, format!("'{input}' is also the input table"));
            }
        }
    }

    if let Some(path) = props.get(keys::RESULTS_PATH) {
        if crate::resolve::names_other_user(path) {
            result.error(
                keys::RESULTS_PATH,
                format!("'{path}': home expansion for a named user is not supported"),
            );
        }
    }

    if props.get_bool(keys::LAG_PASS_THROUGH, false).unwrap_or(false) {
        result.warn(
            keys::LAG_PASS_THROUGH,
            "lagging disabled; the model fit reads the differenced series directly",
        );
    }

    result
}

fn valid_mode(mode: &str) -> bool {
    let mode = mode.trim();
    if mode == "step" {
        return true;
    }
    mode.strip_prefix("season:")
        .and_then(|p| p.parse::<u32>().ok())
        .is_some_and(|p| p > 0)
}
