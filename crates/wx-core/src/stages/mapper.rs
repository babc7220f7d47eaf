//! Row mapper shared by the stage jobs.

use std::collections::BTreeSet;

use regex::Regex;

use crate::engine::Mapper;
use crate::record::{parse_row_key, CompositeKey, RecordError, TimeSeriesRecord, TimeSeriesValue};
use crate::stats_index::stats_row_filter;
use crate::store::{Row, ScanSpec};

/// Emits one record per selected cell of a data row, tagged with the
/// cell's qualifier. A row with a malformed key or a non-numeric selected
/// cell is rejected whole.
#[derive(Debug, Clone)]
pub struct ColumnMapper {
    columns: BTreeSet<String>,
}

impl ColumnMapper {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Scan covering the selected columns of every data row.
    pub fn scan(&self, family: &str) -> Result<ScanSpec, regex::Error> {
        let exclude: Regex = stats_row_filter()?;
        Ok(ScanSpec::all()
            .excluding(exclude)
            .family(family)
            .qualifiers(self.columns.iter().cloned()))
    }
}

impl Mapper for ColumnMapper {
    fn map(&self, row: &Row) -> Result<Vec<TimeSeriesRecord>, RecordError> {
        let (series, hour) = parse_row_key(&row.key)?;
        row.cells
            .iter()
            .filter(|c| self.columns.contains(&c.qualifier))
            .map(|c| {
                let value = c.value.as_f64().ok_or_else(|| RecordError::NonNumeric {
                    row: row.key.clone(),
                    column: c.qualifier.clone(),
                })?;
                Ok(TimeSeriesRecord::new(
                    CompositeKey::new(series.clone(), hour, c.qualifier.clone()),
                    TimeSeriesValue::single(value),
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Cell, Value};

    fn row(key: &str, cells: &[(&str, Value)]) -> Row {
        Row {
            key: key.to_string(),
            cells: cells
                .iter()
                .map(|(q, v)| Cell {
                    family: "data".into(),
                    qualifier: q.to_string(),
                    value: v.clone(),
                })
                .collect(),
        }
    }

    #[test]
    fn maps_selected_cells_only() {
        let m = ColumnMapper::new(["temp"]);
        let out = m
            .map(&row(
                "S1/r-2020010100",
                &[("temp", Value::Double(1.0)), ("hum", Value::Text("x".into()))],
            ))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key.column_tag, "temp");
        assert_eq!(out[0].value.value(), Some(1.0));
    }

    #[test]
    fn non_numeric_selected_cell_rejects_row() {
        let m = ColumnMapper::new(["temp"]);
        let err = m
            .map(&row("S1/r-2020010100", &[("temp", Value::Text("n/a".into()))]))
            .unwrap_err();
        assert!(matches!(err, RecordError::NonNumeric { .. }));
    }

    #[test]
    fn scan_excludes_stats_rows() {
        let spec = ColumnMapper::new(["temp"]).scan("data").unwrap();
        assert!(spec.row_exclude.unwrap().is_match("#stats#temp_step_0"));
    }
}
