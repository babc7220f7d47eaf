//! Step 3: lag the differenced target column.
//!
//! Resolves which differencing output to read through the stats index,
//! then writes `<column>_lag_<k>` for `k` in `0..=P` (`P` = number of
//! configured lags) with each series' autocovariance and autocorrelation
//! at that lag. With `lag.pass_through` set the stage does nothing and the
//! differencing output feeds the model fit directly.

use std::sync::Arc;

use tracing::{debug, info};
use wx_common::SeriesId;
use wx_config::{keys, range_spec, ConfigDelta, ConfigError, DataType, Properties, TypeMap};

use super::{
    family, job_outcome, partitions, try_stage, ColumnMapper, Stage, StageError, StageInput,
    StageName, StageOutcome, StageOutput,
};
use crate::engine::{ComputeEngine, JobSpec, ReduceError, Reducer};
use crate::record::{encode_row_key, TimeSeriesRecord};
use crate::shuffle::ShufflePolicies;
use crate::stats_index::{
    build_tag, load_stats, resolve_target_column, stat_qualifier, stats_row_key,
    ColumnDescriptor, StatKind, StatRow, TagPattern, TagToken, TargetDescriptor,
};
use crate::store::{ColumnStore, Put, ScopedConnection, Value};

/// Tag token between the column and the lag number.
pub const LAG_TOKEN: &str = "lag";

/// Runs the lagging job, or forwards the differencing output untouched.
pub struct LagStage {
    store: Arc<dyn ColumnStore>,
    engine: Arc<dyn ComputeEngine>,
}

impl LagStage {
    pub fn new(store: Arc<dyn ColumnStore>, engine: Arc<dyn ComputeEngine>) -> Self {
        Self { store, engine }
    }

    fn pass_through(input: &StageInput<'_>) -> Result<StageOutput, StageError> {
        let table = input.props.require(keys::TRANSFORM_IN_TABLE)?;
        info!(table = %table, "lag stage bypassed; forwarding differencing output");
        let mut delta = ConfigDelta::new();
        delta.set(keys::TRANSFORM_OUT_TABLE, table);
        Ok(StageOutput {
            delta,
            target: input.target.cloned(),
            skipped: true,
            ..StageOutput::default()
        })
    }

    /// Resolve the input column and make sure the output table exists.
    ///
    /// Also returns the column's per-series statistics as a delta.
    fn resolve(
        &self,
        props: &Properties,
        target: &TargetDescriptor,
    ) -> Result<(ColumnDescriptor, ConfigDelta), StageError> {
        let input = props.require(keys::TRANSFORM_IN_TABLE)?;
        let output = props.require(keys::ARIMA_LAGS_TABLE)?;
        let conn = ScopedConnection::open(self.store.clone())?;
        let stats = load_stats(&conn, input, &target.stats)?;
        debug!(table = %input, rows = stats.len(), "loaded stats rows");
        let column = resolve_target_column(&stats, target)?.ok_or_else(|| {
            StageError::Resolution {
                table: input.to_string(),
                pattern: target.pattern.to_string(),
            }
        })?;
        let column_stats = stats
            .get(&column.column_name)
            .map(|row| stats_delta(row, &column.stat_kinds))
            .unwrap_or_default();
        conn.ensure_table(output, family(props))?;
        Ok((column, column_stats))
    }

    fn derive(props: &Properties, column: &ColumnDescriptor) -> Result<ConfigDelta, StageError> {
        let lags = range_spec(keys::ARIMA_P, props.require(keys::ARIMA_P)?)?;
        let mut delta = ConfigDelta::new();
        delta
            .set(keys::COLUMN_LIST, &column.column_name)
            .set(
                keys::KEY_TYPE_MAP,
                TypeMap::encode(DataType::Double, &column.column_name),
            )
            .set(keys::TRANSFORM_LAG, lags.len().to_string())
            .set(keys::TRANSFORM_OUT_TABLE, props.require(keys::ARIMA_LAGS_TABLE)?);
        Ok(delta)
    }

    fn job(props: &Properties) -> Result<JobSpec, StageError> {
        let columns = numeric_columns(props)?;
        let family = family(props);
        let mapper = ColumnMapper::new(columns);
        Ok(JobSpec {
            name: "lag".into(),
            input_table: props.require(keys::TRANSFORM_IN_TABLE)?.to_string(),
            scan: mapper.scan(family)?,
            output_table: props.require(keys::TRANSFORM_OUT_TABLE)?.to_string(),
            mapper: Arc::new(mapper),
            reducer: Arc::new(LagReducer {
                lags: props.require_u32(keys::TRANSFORM_LAG)? as usize,
                family: family.to_string(),
            }),
            policies: ShufflePolicies::composite(),
            partitions: partitions(props)?,
            blocking: true,
        })
    }
}

/// `stats.<stat>@<series>` entries for the given statistics of one row.
fn stats_delta(row: &StatRow, kinds: &[StatKind]) -> ConfigDelta {
    let mut delta = ConfigDelta::new();
    for &kind in kinds {
        for (series, value) in row.by_series(kind) {
            delta.set(
                format!("{}{}", keys::STATS_PREFIX, stat_qualifier(kind, &series)),
                value.to_string(),
            );
        }
    }
    delta
}

/// Columns named by `column_list`, checked against `key_type_map`.
pub(crate) fn numeric_columns(props: &Properties) -> Result<Vec<String>, ConfigError> {
    let columns = props.get_list(keys::COLUMN_LIST);
    if columns.is_empty() {
        return Err(ConfigError::Missing {
            keys: vec![keys::COLUMN_LIST.to_string()],
        });
    }
    if let Some(encoded) = props.get(keys::KEY_TYPE_MAP) {
        let types = TypeMap::decode(keys::KEY_TYPE_MAP, encoded)?;
        for column in &columns {
            if types.get(column) == Some(DataType::String) {
                return Err(ConfigError::Invalid {
                    key: keys::KEY_TYPE_MAP.to_string(),
                    reason: format!("column {column} is not numeric"),
                });
            }
        }
    }
    Ok(columns)
}

impl Stage for LagStage {
    fn name(&self) -> StageName {
        StageName::Lag
    }

    fn run(&self, input: &StageInput<'_>) -> StageOutcome {
        if try_stage!(input.props.get_bool(keys::LAG_PASS_THROUGH, false)) {
            return StageOutcome::Advance(try_stage!(Self::pass_through(input)));
        }

        let target = try_stage!(input.require_target());
        let order = try_stage!(input.props.require_u32(keys::ARIMA_D));
        let (column, column_stats) = try_stage!(self.resolve(input.props, target));
        info!(
            column = %column.column_name,
            pattern = %target.pattern,
            stats = column_stats.len(),
            "resolved lag input"
        );

        let mut delta = try_stage!(Self::derive(input.props, &column));
        delta.extend(column_stats);
        let spec = try_stage!(Self::job(&input.props.merge(&delta)));
        let output = StageOutput {
            delta,
            target: Some(TargetDescriptor::new(
                TagPattern::new(vec![
                    TagToken::Wildcard,
                    TagToken::from(order),
                    TagToken::from(LAG_TOKEN),
                    TagToken::from("0"),
                ]),
                vec![StatKind::Autocovariance, StatKind::Autocorrelation],
            )),
            resolved: Some(column),
            ..StageOutput::default()
        };
        job_outcome(self.engine.submit_job(spec), output)
    }
}

/// Writes the lagged copies of one series and their autocorrelations.
pub struct LagReducer {
    pub lags: usize,
    pub family: String,
}

impl Reducer for LagReducer {
    fn reduce(
        &self,
        series: &SeriesId,
        records: &[TimeSeriesRecord],
    ) -> Result<Vec<Put>, ReduceError> {
        let mut puts = Vec::new();
        for run in records.chunk_by(|a, b| a.key.column_tag == b.key.column_tag) {
            let column = &run[0].key.column_tag;
            let (hours, values): (Vec<i64>, Vec<f64>) = run
                .iter()
                .filter_map(|r| Some((r.key.timestamp, r.value.value()?)))
                .unzip();
            let n = values.len();

            for k in 0..=self.lags.min(n.saturating_sub(1)) {
                let lag_token = k.to_string();
                let tag = build_tag(&[column.as_str(), LAG_TOKEN, lag_token.as_str()]);
                for t in k..n {
                    if let Some(row) = encode_row_key(series, hours[t]) {
                        puts.push(Put::new(row, &self.family, &tag, Value::Double(values[t - k])));
                    }
                }
                let stats_row = stats_row_key(&tag);
                let acov = wx_math::autocovariance(&values, k);
                let acorr = wx_math::autocorrelation(&values, k);
                for (kind, v) in [
                    (StatKind::Autocovariance, acov),
                    (StatKind::Autocorrelation, acorr),
                ] {
                    if v.is_finite() {
                        puts.push(Put::new(
                            &stats_row,
                            &self.family,
                            stat_qualifier(kind, series.as_str()),
                            Value::Double(v),
                        ));
                    }
                }
            }
        }
        Ok(puts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CompositeKey, TimeSeriesValue};

    fn records(values: &[f64]) -> Vec<TimeSeriesRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                TimeSeriesRecord::new(
                    CompositeKey::new(SeriesId("S1".into()), 438_300 + i as i64, "temp_step_1"),
                    TimeSeriesValue::single(*v),
                )
            })
            .collect()
    }

    #[test]
    fn lag_reducer_shifts_series() {
        let reducer = LagReducer {
            lags: 2,
            family: "data".into(),
        };
        let puts = reducer
            .reduce(&SeriesId("S1".into()), &records(&[1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        let lag1: Vec<&Put> = puts
            .iter()
            .filter(|p| p.qualifier == "temp_step_1_lag_1")
            .collect();
        assert_eq!(lag1.len(), 3);
        assert_eq!(lag1[0].value, Value::Double(1.0));

        let acorr0 = puts
            .iter()
            .find(|p| p.row == "#stats#temp_step_1_lag_0" && p.qualifier == "autocorrelation@S1")
            .unwrap();
        assert_eq!(acorr0.value, Value::Double(1.0));
        assert!(puts.iter().any(|p| p.row == "#stats#temp_step_1_lag_2"));
    }

    #[test]
    fn lags_capped_by_series_length() {
        let reducer = LagReducer {
            lags: 5,
            family: "data".into(),
        };
        let puts = reducer
            .reduce(&SeriesId("S1".into()), &records(&[1.0, 2.0]))
            .unwrap();
        assert!(puts.iter().any(|p| p.qualifier == "temp_step_1_lag_1"));
        assert!(!puts.iter().any(|p| p.qualifier == "temp_step_1_lag_2"));
    }

    #[test]
    fn derive_counts_lags_and_encodes_types() {
        let props = Properties::new()
            .with(keys::ARIMA_P, "1-3")
            .with(keys::ARIMA_LAGS_TABLE, "lags");
        let column = ColumnDescriptor {
            column_name: "temp_step_1".into(),
            stat_kinds: vec![StatKind::Mean],
        };
        let delta = LagStage::derive(&props, &column).unwrap();
        assert_eq!(delta.get(keys::TRANSFORM_LAG), Some("3"));
        assert_eq!(delta.get(keys::KEY_TYPE_MAP), Some("temp_step_1:double"));
        assert_eq!(delta.get(keys::TRANSFORM_OUT_TABLE), Some("lags"));
    }

    #[test]
    fn column_stats_become_delta_keys() {
        let row = StatRow {
            name: stats_row_key("temp_step_1"),
            stats: [
                (stat_qualifier(StatKind::Mean, "S1"), Value::Double(1.5)),
                (stat_qualifier(StatKind::Mean, "S2"), Value::Double(-2.0)),
                (stat_qualifier(StatKind::Variance, "S1"), Value::Double(0.25)),
            ]
            .into_iter()
            .collect(),
        };
        let delta = stats_delta(&row, &[StatKind::Mean]);
        assert_eq!(delta.len(), 2);
        assert_eq!(delta.get("stats.mean@S1"), Some("1.5"));
        assert_eq!(delta.get("stats.mean@S2"), Some("-2"));

        let both = stats_delta(&row, &[StatKind::Mean, StatKind::Variance]);
        assert_eq!(both.get("stats.variance@S1"), Some("0.25"));
    }

    #[test]
    fn string_typed_column_rejected() {
        let props = Properties::new()
            .with(keys::COLUMN_LIST, "temp")
            .with(keys::KEY_TYPE_MAP, "temp:string");
        assert!(numeric_columns(&props).is_err());
    }
}
