//! Result extraction.
//!
//! Reads the fitted-model metrics out of the final table and persists them
//! under `results.path` as `<out_table>.<ext>`. Extraction only reads the
//! store; a failure here never changes the outcome of the stages.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use wx_common::{OutputFormat, RunId};
use wx_config::{expand_home, keys, ConfigError, Properties};
use wx_results::{ModelResultRow, ResultsWriter, WriteError, WriterConfig};

use crate::stages::arima::{AIC_MAAPE, AIC_MSE, BIC_MAAPE, BIC_MSE, MAAPE, MSE, ORDER, PARAMS};
use crate::store::{ColumnStore, Row, ScanSpec, ScopedConnection, StoreError};

/// Errors raised while extracting results.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parquet sink: {0}")]
    Parquet(#[from] WriteError),

    #[error("results cannot be written as {0}")]
    UnsupportedFormat(OutputFormat),

    #[error("row {row}: {reason}")]
    MalformedRow { row: String, reason: String },
}

impl From<ExtractError> for wx_common::Error {
    fn from(err: ExtractError) -> Self {
        wx_common::Error::Extraction(err.to_string())
    }
}

/// Where a sink wrote the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub path: PathBuf,
    pub rows: usize,
}

/// Persists extracted rows.
pub trait ResultSink {
    fn format(&self) -> OutputFormat;

    fn write(
        &self,
        path: &Path,
        run_id: &RunId,
        table: &str,
        rows: Vec<ModelResultRow>,
    ) -> Result<usize, ExtractError>;
}

/// Pretty-printed JSON document.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSink;

#[derive(Serialize)]
struct ResultsDocument<'a> {
    schema_version: &'static str,
    run_id: &'a RunId,
    table: &'a str,
    generated_at: String,
    results: &'a [ModelResultRow],
}

impl ResultSink for JsonSink {
    fn format(&self) -> OutputFormat {
        OutputFormat::Json
    }

    fn write(
        &self,
        path: &Path,
        run_id: &RunId,
        table: &str,
        rows: Vec<ModelResultRow>,
    ) -> Result<usize, ExtractError> {
        let doc = ResultsDocument {
            schema_version: wx_results::SCHEMA_VERSION,
            run_id,
            table,
            generated_at: chrono::Utc::now().to_rfc3339(),
            results: &rows,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
        Ok(rows.len())
    }
}

/// ZSTD-compressed Parquet file.
#[derive(Debug, Default, Clone)]
pub struct ParquetSink {
    pub config: WriterConfig,
}

impl ResultSink for ParquetSink {
    fn format(&self) -> OutputFormat {
        OutputFormat::Parquet
    }

    fn write(
        &self,
        path: &Path,
        run_id: &RunId,
        _table: &str,
        rows: Vec<ModelResultRow>,
    ) -> Result<usize, ExtractError> {
        let config = WriterConfig {
            run_id: Some(run_id.to_string()),
            ..self.config.clone()
        };
        let mut writer = ResultsWriter::create(path, config)?;
        for row in rows {
            writer.push(row)?;
        }
        Ok(writer.finish()?)
    }
}

/// Sink for a configured `results.format`.
pub fn sink_for(format: OutputFormat) -> Result<Box<dyn ResultSink>, ExtractError> {
    match format {
        OutputFormat::Json => Ok(Box::new(JsonSink)),
        OutputFormat::Parquet => Ok(Box::new(ParquetSink::default())),
        other => Err(ExtractError::UnsupportedFormat(other)),
    }
}

fn metric(row: &Row, qualifier: &str) -> Result<f64, ExtractError> {
    row.get(qualifier)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| ExtractError::MalformedRow {
            row: row.key.clone(),
            reason: format!("missing or non-numeric {qualifier}"),
        })
}

fn parse_params(row: &Row) -> Result<Vec<f64>, ExtractError> {
    let raw = row.get(PARAMS).map(|v| v.to_string()).unwrap_or_default();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>().map_err(|_| ExtractError::MalformedRow {
                row: row.key.clone(),
                reason: format!("parameter '{s}' is not a number"),
            })
        })
        .collect()
}

/// Read every series row of the final table, in series order.
pub fn read_final_table(
    conn: &ScopedConnection,
    table: &str,
    family: &str,
) -> Result<Vec<ModelResultRow>, ExtractError> {
    let mut out = Vec::new();
    for row in conn.scan_rows(table, &ScanSpec::all().family(family))? {
        let order = metric(&row, ORDER)?;
        out.push(ModelResultRow {
            series_id: row.key.clone(),
            order: order as u32,
            mse: metric(&row, MSE)?,
            maape: metric(&row, MAAPE)?,
            aic_mse: metric(&row, AIC_MSE)?,
            aic_maape: metric(&row, AIC_MAAPE)?,
            bic_mse: metric(&row, BIC_MSE)?,
            bic_maape: metric(&row, BIC_MAAPE)?,
            params: parse_params(&row)?,
        });
    }
    debug!(table, rows = out.len(), "read final table");
    Ok(out)
}

/// Read the final table and persist it through the configured sink.
pub fn extract_results(
    store: Arc<dyn ColumnStore>,
    props: &Properties,
    run_id: &RunId,
) -> Result<ExtractSummary, ExtractError> {
    let table = props.require(keys::ARIMA_OUT_TABLE)?;
    let dir = expand_home(keys::RESULTS_PATH, props.require(keys::RESULTS_PATH)?)?;
    let raw_format = props.get(keys::RESULTS_FORMAT).unwrap_or("json");
    let format = OutputFormat::parse(raw_format).ok_or_else(|| ConfigError::Invalid {
        key: keys::RESULTS_FORMAT.to_string(),
        reason: format!("unknown results format '{raw_format}'"),
    })?;
    let sink = sink_for(format)?;
    let family = props.get(keys::STORE_FAMILY).unwrap_or("data");

    let rows = {
        let conn = ScopedConnection::open(store)?;
        read_final_table(&conn, table, family)?
    };
    let path = dir.join(format!("{table}.{}", sink.format().extension()));
    let written = sink.write(&path, run_id, table, rows)?;
    info!(path = %path.display(), rows = written, format = %format, "results extracted");
    Ok(ExtractSummary {
        path,
        rows: written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Put, Value};

    fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let conn = ScopedConnection::open(store.clone()).unwrap();
        conn.create_table("out", "data").unwrap();
        let mut puts: Vec<Put> = [MSE, MAAPE, AIC_MSE, AIC_MAAPE, BIC_MSE, BIC_MAAPE]
            .iter()
            .enumerate()
            .map(|(i, q)| Put::new("S1", "data", *q, Value::Double(i as f64 + 0.5)))
            .collect();
        puts.push(Put::new("S1", "data", PARAMS, Value::Text("0.1,0.7".into())));
        puts.push(Put::new("S1", "data", ORDER, Value::Long(1)));
        conn.put("out", puts).unwrap();
        store
    }

    fn props(dir: &Path, format: &str) -> Properties {
        Properties::new()
            .with(keys::ARIMA_OUT_TABLE, "out")
            .with(keys::RESULTS_PATH, dir.display().to_string())
            .with(keys::RESULTS_FORMAT, format)
    }

    #[test]
    fn reads_metrics_and_params() {
        let store = seeded_store();
        let conn = ScopedConnection::open(store.clone()).unwrap();
        let rows = read_final_table(&conn, "out", "data").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].series_id, "S1");
        assert_eq!(rows[0].order, 1);
        assert_eq!(rows[0].mse, 0.5);
        assert_eq!(rows[0].params, vec![0.1, 0.7]);
    }

    #[test]
    fn json_sink_writes_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store();
        let run_id = RunId::new();
        let summary = extract_results(store.clone(), &props(dir.path(), "json"), &run_id).unwrap();
        assert_eq!(summary.rows, 1);
        assert_eq!(summary.path, dir.path().join("out.json"));

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&summary.path).unwrap()).unwrap();
        assert_eq!(doc["run_id"], run_id.to_string());
        assert_eq!(doc["results"][0]["series_id"], "S1");
        assert_eq!(store.open_connections(), 0);
    }

    #[test]
    fn parquet_sink_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let summary =
            extract_results(seeded_store(), &props(dir.path(), "parquet"), &RunId::new()).unwrap();
        let rows = wx_results::read_results(&summary.path).unwrap();
        assert_eq!(rows[0].bic_maape, 5.5);
    }

    #[test]
    fn text_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_results(seeded_store(), &props(dir.path(), "text"), &RunId::new())
            .unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFormat(OutputFormat::Text)));
    }

    #[test]
    fn named_user_results_path_rejected() {
        let props = Properties::new()
            .with(keys::ARIMA_OUT_TABLE, "out")
            .with(keys::RESULTS_PATH, "~someone/results");
        let err = extract_results(seeded_store(), &props, &RunId::new()).unwrap_err();
        assert!(matches!(err, ExtractError::Config(ConfigError::Invalid { .. })));
        assert!(!Path::new("~someone").exists());
    }

    #[test]
    fn missing_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let err = extract_results(store, &props(dir.path(), "json"), &RunId::new()).unwrap_err();
        assert!(matches!(err, ExtractError::Store(StoreError::TableNotFound(_))));
    }
}
