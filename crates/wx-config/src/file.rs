//! Pipeline configuration file model.
//!
//! These types match the on-disk `pipeline.toml` (or `.json`) layout. A
//! loaded file is flattened into a [`Properties`] snapshot with dotted keys
//! (`arima.in_table`, `lag.pass_through`, ...); only fields present in the
//! file are written, so defaults and CLI overrides layer cleanly.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::keys;
use crate::{ConfigError, Properties};

/// Complete pipeline configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PipelineFile {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub arima: ArimaSection,

    #[serde(default)]
    pub lag: LagSection,

    #[serde(default)]
    pub results: ResultsSection,

    #[serde(default)]
    pub job: JobSection,
}

/// Table names and model orders.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ArimaSection {
    /// Table holding the raw observations.
    #[serde(default)]
    pub in_table: Option<String>,
    /// Intermediate table for differenced series.
    #[serde(default)]
    pub differencing_table: Option<String>,
    /// Intermediate table for lagged series.
    #[serde(default)]
    pub lags_table: Option<String>,
    /// Final table holding fitted model metrics per series.
    #[serde(default)]
    pub out_table: Option<String>,
    /// Differencing order.
    #[serde(default)]
    pub d: Option<u32>,
    /// Lags to fit, as a list or a range spec string ("1-3").
    #[serde(default)]
    pub p: Option<LagSpec>,
    /// Base columns to transform.
    #[serde(default)]
    pub columns: Vec<String>,
    /// `step` or `season:<period>`.
    #[serde(default)]
    pub differencing_mode: Option<String>,
}

/// Lags as written in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum LagSpec {
    List(Vec<u32>),
    Spec(String),
}

impl LagSpec {
    fn to_property(&self) -> String {
        match self {
            LagSpec::List(v) => v
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(","),
            LagSpec::Spec(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LagSection {
    /// Skip lagging; the differencing output feeds the model fit directly.
    #[serde(default)]
    pub pass_through: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResultsSection {
    /// Directory extracted results are written to.
    #[serde(default)]
    pub path: Option<String>,
    /// `json` or `parquet`.
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JobSection {
    #[serde(default)]
    pub wait: Option<bool>,
    #[serde(default)]
    pub partitions: Option<u32>,
    #[serde(default)]
    pub verbose: Option<bool>,
}

impl PipelineFile {
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn parse_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load a file, choosing the parser from its extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::parse_toml(&content),
            Some("json") => Self::parse_json(&content),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Flatten into dotted properties. Absent fields are not written.
    pub fn to_properties(&self) -> Properties {
        let a = &self.arima;
        let entries: [(&str, Option<String>); 14] = [
            (keys::ARIMA_IN_TABLE, a.in_table.clone()),
            (keys::ARIMA_DIFFERENCING_TABLE, a.differencing_table.clone()),
            (keys::ARIMA_LAGS_TABLE, a.lags_table.clone()),
            (keys::ARIMA_OUT_TABLE, a.out_table.clone()),
            (keys::ARIMA_D, a.d.map(|d| d.to_string())),
            (keys::ARIMA_P, a.p.as_ref().map(LagSpec::to_property)),
            (
                keys::ARIMA_COLUMNS,
                (!a.columns.is_empty()).then(|| a.columns.join(",")),
            ),
            (keys::ARIMA_DIFFERENCING_MODE, a.differencing_mode.clone()),
            (
                keys::LAG_PASS_THROUGH,
                self.lag.pass_through.map(|b| b.to_string()),
            ),
            (keys::RESULTS_PATH, self.results.path.clone()),
            (keys::RESULTS_FORMAT, self.results.format.clone()),
            (keys::JOB_WAIT, self.job.wait.map(|b| b.to_string())),
            (
                keys::JOB_PARTITIONS,
                self.job.partitions.map(|n| n.to_string()),
            ),
            (keys::JOB_VERBOSE, self.job.verbose.map(|b| b.to_string())),
        ];
        Properties::from_pairs(
            entries
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v))),
        )
    }

    /// JSON schema for the file, for editor integration.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(PipelineFile)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
description = "hourly temperature"

[arima]
in_table = "weather"
differencing_table = "weather_diff"
lags_table = "weather_lags"
out_table = "weather_arima"
d = 1
p = [1, 2]
columns = ["temp"]

[lag]
pass_through = false

[results]
path = "out"
format = "parquet"
"#;

    #[test]
    fn parse_toml_sample() {
        let file = PipelineFile::parse_toml(SAMPLE).unwrap();
        assert_eq!(file.arima.in_table.as_deref(), Some("weather"));
        assert_eq!(file.arima.p, Some(LagSpec::List(vec![1, 2])));
        assert_eq!(file.lag.pass_through, Some(false));
    }

    #[test]
    fn flatten_writes_present_fields_only() {
        let props = PipelineFile::parse_toml(SAMPLE).unwrap().to_properties();
        assert_eq!(props.get(keys::ARIMA_P), Some("1,2"));
        assert_eq!(props.get(keys::ARIMA_COLUMNS), Some("temp"));
        assert_eq!(props.get(keys::RESULTS_FORMAT), Some("parquet"));
        assert!(!props.contains(keys::JOB_WAIT));
    }

    #[test]
    fn lag_spec_accepts_range_string() {
        let file = PipelineFile::parse_json(r#"{"arima": {"p": "1-3"}}"#).unwrap();
        assert_eq!(file.to_properties().get(keys::ARIMA_P), Some("1-3"));
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(PipelineFile::parse_toml("[arima]\nbogus = 1\n").is_err());
    }

    #[test]
    fn from_file_requires_known_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, "x: 1").unwrap();
        assert!(matches!(
            PipelineFile::from_file(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            PipelineFile::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn schema_mentions_sections() {
        let schema = PipelineFile::json_schema().to_string();
        assert!(schema.contains("arima"));
        assert!(schema.contains("pass_through"));
    }
}
