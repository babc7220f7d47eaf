//! Step 4: fit an AR model per series and write its metrics.
//!
//! The input table is whatever the lag stage handed forward (the lags
//! table, or the differencing table when lagging was bypassed). Each series
//! gets one row in the final table, keyed by its id, holding the metrics of
//! the best order among the configured lags.

use std::sync::Arc;

use tracing::{debug, info};
use wx_common::SeriesId;
use wx_config::{keys, range_spec, ConfigDelta, DataType, Properties, TypeMap};

use super::lag::numeric_columns;
use super::{
    family, job_outcome, partitions, try_stage, ColumnMapper, ModelFitter, Stage, StageError,
    StageInput, StageName, StageOutcome, StageOutput,
};
use crate::engine::{ComputeEngine, JobSpec, ReduceError, Reducer};
use crate::record::TimeSeriesRecord;
use crate::shuffle::ShufflePolicies;
use crate::stats_index::{load_stats, resolve_target_column, ColumnDescriptor, TargetDescriptor};
use crate::store::{ColumnStore, Put, ScopedConnection, Value};

pub const MSE: &str = "mse";
pub const MAAPE: &str = "maape";
pub const AIC_MSE: &str = "aic_mse";
pub const AIC_MAAPE: &str = "aic_maape";
pub const BIC_MSE: &str = "bic_mse";
pub const BIC_MAAPE: &str = "bic_maape";
/// Comma separated, mean first then the AR coefficients.
pub const PARAMS: &str = "params";
pub const ORDER: &str = "order";

/// Resolves the model input column and runs the fitting job.
pub struct ArimaStage {
    store: Arc<dyn ColumnStore>,
    engine: Arc<dyn ComputeEngine>,
    fitter: Arc<dyn ModelFitter>,
}

impl ArimaStage {
    pub fn new(
        store: Arc<dyn ColumnStore>,
        engine: Arc<dyn ComputeEngine>,
        fitter: Arc<dyn ModelFitter>,
    ) -> Self {
        Self {
            store,
            engine,
            fitter,
        }
    }

    fn resolve(
        &self,
        props: &Properties,
        target: &TargetDescriptor,
    ) -> Result<ColumnDescriptor, StageError> {
        let input = props.require(keys::TRANSFORM_OUT_TABLE)?;
        let output = props.require(keys::ARIMA_OUT_TABLE)?;
        let conn = ScopedConnection::open(self.store.clone())?;
        // The final table exists once this stage has started, resolved or not.
        conn.ensure_table(output, family(props))?;
        let stats = load_stats(&conn, input, &target.stats)?;
        let column = resolve_target_column(&stats, target)?.ok_or_else(|| {
            StageError::Resolution {
                table: input.to_string(),
                pattern: target.pattern.to_string(),
            }
        })?;
        Ok(column)
    }

    fn job(&self, props: &Properties) -> Result<JobSpec, StageError> {
        let family = family(props);
        let mapper = ColumnMapper::new(numeric_columns(props)?);
        let lags = range_spec(keys::ARIMA_P, props.require(keys::ARIMA_P)?)?;
        Ok(JobSpec {
            name: "arima".into(),
            input_table: props.require(keys::TRANSFORM_OUT_TABLE)?.to_string(),
            scan: mapper.scan(family)?,
            output_table: props.require(keys::ARIMA_OUT_TABLE)?.to_string(),
            mapper: Arc::new(mapper),
            reducer: Arc::new(ArimaReducer {
                fitter: self.fitter.clone(),
                lags,
                family: family.to_string(),
            }),
            policies: ShufflePolicies::composite(),
            partitions: partitions(props)?,
            blocking: props.get_bool(keys::JOB_WAIT, true)?,
        })
    }
}

impl Stage for ArimaStage {
    fn name(&self) -> StageName {
        StageName::Arima
    }

    fn run(&self, input: &StageInput<'_>) -> StageOutcome {
        let target = try_stage!(input.require_target());
        let column = try_stage!(self.resolve(input.props, target));
        info!(column = %column.column_name, pattern = %target.pattern, "resolved model input");

        let mut delta = ConfigDelta::new();
        delta.set(keys::COLUMN_LIST, &column.column_name).set(
            keys::KEY_TYPE_MAP,
            TypeMap::encode(DataType::Double, &column.column_name),
        );
        let spec = try_stage!(self.job(&input.props.merge(&delta)));
        let output = StageOutput {
            delta,
            target: input.target.cloned(),
            resolved: Some(column),
            ..StageOutput::default()
        };
        job_outcome(self.engine.submit_job(spec), output)
    }
}

/// Fits every candidate order for one series and writes the best.
pub struct ArimaReducer {
    pub fitter: Arc<dyn ModelFitter>,
    pub lags: Vec<u32>,
    pub family: String,
}

impl Reducer for ArimaReducer {
    fn reduce(
        &self,
        series: &SeriesId,
        records: &[TimeSeriesRecord],
    ) -> Result<Vec<Put>, ReduceError> {
        let values: Vec<f64> = records.iter().filter_map(|r| r.value.value()).collect();
        let Some(best) = self.fitter.select(&values, &self.lags) else {
            debug!(series = %series, n = values.len(), "no order could be fitted");
            return Ok(Vec::new());
        };

        let row = series.as_str();
        let params = best
            .params
            .iter()
            .map(f64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut puts: Vec<Put> = [
            (MSE, best.mse),
            (MAAPE, best.maape),
            (AIC_MSE, best.aic_mse),
            (AIC_MAAPE, best.aic_maape),
            (BIC_MSE, best.bic_mse),
            (BIC_MAAPE, best.bic_maape),
        ]
        .into_iter()
        .map(|(q, v)| Put::new(row, &self.family, q, Value::Double(v)))
        .collect();
        puts.push(Put::new(row, &self.family, PARAMS, Value::Text(params)));
        puts.push(Put::new(
            row,
            &self.family,
            ORDER,
            Value::Long(best.order as i64),
        ));
        Ok(puts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CompositeKey, TimeSeriesValue};
    use crate::stages::YuleWalkerFitter;

    fn records(values: &[f64]) -> Vec<TimeSeriesRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                TimeSeriesRecord::new(
                    CompositeKey::new(SeriesId("S1".into()), i as i64, "temp_step_1_lag_0"),
                    TimeSeriesValue::single(*v),
                )
            })
            .collect()
    }

    fn reducer(lags: Vec<u32>) -> ArimaReducer {
        ArimaReducer {
            fitter: Arc::new(YuleWalkerFitter),
            lags,
            family: "data".into(),
        }
    }

    #[test]
    fn writes_one_row_of_metrics() {
        let xs: Vec<f64> = (0..40).map(|t| ((t as f64) * 0.7).sin()).collect();
        let puts = reducer(vec![1, 2]).reduce(&SeriesId("S1".into()), &records(&xs)).unwrap();
        assert_eq!(puts.len(), 8);
        assert!(puts.iter().all(|p| p.row == "S1"));
        let params = puts.iter().find(|p| p.qualifier == PARAMS).unwrap();
        let order = puts.iter().find(|p| p.qualifier == ORDER).unwrap();
        let Value::Long(order) = order.value else {
            panic!("order is not a long");
        };
        let Value::Text(params) = &params.value else {
            panic!("params is not text");
        };
        assert_eq!(params.split(',').count(), order as usize + 1);
    }

    #[test]
    fn too_short_series_writes_nothing() {
        let puts = reducer(vec![3]).reduce(&SeriesId("S1".into()), &records(&[1.0, 2.0])).unwrap();
        assert!(puts.is_empty());
    }
}
