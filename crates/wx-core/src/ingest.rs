//! JSON-lines observation loader.
//!
//! Each line is one observation:
//! `{"series": "S1", "time": "2020-01-01T00:00:00Z", "values": {"temp": 4.5}}`.
//! Observations land in the input table as one row per (series, hour) with
//! one cell per value. Lines that cannot be parsed are skipped and counted.

use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use wx_common::SeriesId;
use wx_config::{keys, ConfigError, Properties};

use crate::record::{encode_row_key, hour_of};
use crate::store::{ColumnStore, Put, ScopedConnection, StoreError, Value};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IngestError> for wx_common::Error {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Config(e) => e.into(),
            IngestError::Store(e) => e.into(),
            IngestError::Io(e) => wx_common::Error::Io(e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Observation {
    series: String,
    time: DateTime<Utc>,
    #[serde(default)]
    values: BTreeMap<String, serde_json::Value>,
}

/// Counts from one load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub lines: usize,
    pub observations: usize,
    pub cells_written: usize,
    pub malformed: usize,
}

fn cell_value(v: &serde_json::Value) -> Option<Value> {
    match v {
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Some(Value::Long(i)),
            None => n.as_f64().map(Value::Double),
        },
        serde_json::Value::String(s) => Some(Value::Text(s.clone())),
        _ => None,
    }
}

fn observation_puts(line: &str, family: &str) -> Result<Vec<Put>, String> {
    let obs: Observation = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let series = SeriesId::parse(&obs.series)
        .ok_or_else(|| format!("invalid series id '{}'", obs.series))?;
    let row = encode_row_key(&series, hour_of(obs.time))
        .ok_or_else(|| format!("time {} cannot be keyed", obs.time))?;
    Ok(obs
        .values
        .iter()
        .filter_map(|(column, v)| Some(Put::new(&row, family, column, cell_value(v)?)))
        .collect())
}

/// Load observations from `reader` into `table`, creating it if needed.
pub fn load_observations<R: BufRead>(
    store: Arc<dyn ColumnStore>,
    table: &str,
    family: &str,
    reader: R,
) -> Result<IngestSummary, IngestError> {
    let conn = ScopedConnection::open(store)?;
    if conn.ensure_table(table, family)? {
        debug!(table, "input table created");
    }

    let mut summary = IngestSummary::default();
    let mut puts = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;
        match observation_puts(&line, family) {
            Ok(cells) => {
                summary.observations += 1;
                puts.extend(cells);
            }
            Err(reason) => {
                summary.malformed += 1;
                warn!(line = idx + 1, %reason, "skipping malformed observation");
            }
        }
    }
    summary.cells_written = conn.put(table, puts)?;
    info!(
        table,
        observations = summary.observations,
        malformed = summary.malformed,
        "observations loaded"
    );
    Ok(summary)
}

/// Load a JSON-lines file into the configured input table.
pub fn load_observations_file(
    store: Arc<dyn ColumnStore>,
    props: &Properties,
    path: &Path,
) -> Result<IngestSummary, IngestError> {
    let table = props.require(keys::ARIMA_IN_TABLE)?;
    let family = props.get(keys::STORE_FAMILY).unwrap_or("data");
    let file = std::fs::File::open(path)?;
    load_observations(store, table, family, std::io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ScanSpec};

    const INPUT: &str = r#"{"series": "S1", "time": "2020-01-01T00:00:00Z", "values": {"temp": 4.5, "station": "north"}}
{"series": "S1", "time": "2020-01-01T01:00:00Z", "values": {"temp": 5}}
not json

{"series": "a/b", "time": "2020-01-01T02:00:00Z", "values": {"temp": 1.0}}
"#;

    #[test]
    fn loads_rows_and_counts_malformed() {
        let store = Arc::new(MemoryStore::new());
        let summary = load_observations(store.clone(), "weather", "data", INPUT.as_bytes()).unwrap();
        assert_eq!(summary.lines, 4);
        assert_eq!(summary.observations, 2);
        assert_eq!(summary.malformed, 2);
        assert_eq!(summary.cells_written, 3);

        let conn = ScopedConnection::open(store.clone()).unwrap();
        let rows: Vec<_> = conn.scan_rows("weather", &ScanSpec::all()).unwrap().collect();
        assert_eq!(rows[0].key, "S1/r-2020010100");
        assert_eq!(rows[0].get("temp"), Some(&Value::Double(4.5)));
        assert_eq!(rows[1].get("temp"), Some(&Value::Long(5)));
        drop(conn);
        assert_eq!(store.open_connections(), 0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let store = Arc::new(MemoryStore::new());
        let props = Properties::new().with(keys::ARIMA_IN_TABLE, "weather");
        let err = load_observations_file(store, &props, Path::new("/nonexistent/obs.jsonl"))
            .unwrap_err();
        assert!(matches!(err, IngestError::Io(_)));
    }
}
