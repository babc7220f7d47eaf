//! Step 2: difference every configured column of every series.
//!
//! For a base column `temp` and order `D` the job writes `temp_step_0`
//! (the raw series) through `temp_step_D`, one data cell per surviving
//! timestamp, and one stats row per tag holding each series' mean and
//! variance.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};
use wx_common::SeriesId;
use wx_config::{keys, ConfigDelta, ConfigError, Properties};

use super::{
    family, job_outcome, partitions, try_stage, ColumnMapper, Stage, StageError, StageInput,
    StageName, StageOutcome, StageOutput,
};
use crate::engine::{ComputeEngine, JobSpec, ReduceError, Reducer};
use crate::record::{encode_row_key, TimeSeriesRecord};
use crate::shuffle::ShufflePolicies;
use crate::stats_index::{build_tag, stat_qualifier, stats_row_key, StatKind, TagToken};
use crate::stats_index::{TagPattern, TargetDescriptor};
use crate::store::{ColumnStore, Put, ScopedConnection, Value};

/// How consecutive observations are differenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifferencingMode {
    /// `x_t - x_{t-1}`.
    Step,
    /// `x_t - x_{t-period}`.
    Season(u32),
}

impl DifferencingMode {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s == "step" {
            return Some(DifferencingMode::Step);
        }
        let period: u32 = s.strip_prefix("season:")?.parse().ok()?;
        (period > 0).then_some(DifferencingMode::Season(period))
    }

    pub fn lag(self) -> usize {
        match self {
            DifferencingMode::Step => 1,
            DifferencingMode::Season(p) => p as usize,
        }
    }

    /// Tag token naming this mode.
    pub fn token(self) -> &'static str {
        match self {
            DifferencingMode::Step => "step",
            DifferencingMode::Season(_) => "season",
        }
    }
}

impl fmt::Display for DifferencingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DifferencingMode::Step => f.write_str("step"),
            DifferencingMode::Season(p) => write!(f, "season:{p}"),
        }
    }
}

/// Parse the derived `differencing` key (`<mode>,<order>`).
pub fn parse_differencing(value: &str) -> Result<(DifferencingMode, u32), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        key: keys::DIFFERENCING.to_string(),
        reason: format!("'{value}': {reason}"),
    };
    let (mode, order) = value
        .rsplit_once(',')
        .ok_or_else(|| invalid("expected <mode>,<order>"))?;
    let mode = DifferencingMode::parse(mode).ok_or_else(|| invalid("unknown mode"))?;
    let order = order
        .trim()
        .parse()
        .map_err(|_| invalid("order is not a number"))?;
    Ok((mode, order))
}

/// Runs the differencing job.
pub struct DifferencingStage {
    store: Arc<dyn ColumnStore>,
    engine: Arc<dyn ComputeEngine>,
}

impl DifferencingStage {
    pub fn new(store: Arc<dyn ColumnStore>, engine: Arc<dyn ComputeEngine>) -> Self {
        Self { store, engine }
    }

    fn derive(props: &Properties) -> Result<(ConfigDelta, u32), StageError> {
        let required = props.require_all(&[
            keys::ARIMA_IN_TABLE,
            keys::ARIMA_DIFFERENCING_TABLE,
            keys::ARIMA_D,
            keys::ARIMA_COLUMNS,
        ])?;
        let order = props.require_u32(keys::ARIMA_D)?;
        let mode_raw = props.get(keys::ARIMA_DIFFERENCING_MODE).unwrap_or("step");
        let mode = DifferencingMode::parse(mode_raw).ok_or_else(|| ConfigError::Invalid {
            key: keys::ARIMA_DIFFERENCING_MODE.to_string(),
            reason: format!("'{mode_raw}' is neither 'step' nor 'season:<period>'"),
        })?;

        let mut delta = ConfigDelta::new();
        delta
            .set(keys::DIFFERENCING_IN_TABLE, &required[keys::ARIMA_IN_TABLE])
            .set(
                keys::DIFFERENCING_OUT_TABLE,
                &required[keys::ARIMA_DIFFERENCING_TABLE],
            )
            .set(keys::DIFFERENCING, format!("{mode},{order}"))
            .set(keys::COLUMN_LIST, &required[keys::ARIMA_COLUMNS]);
        Ok((delta, order))
    }

    fn job(props: &Properties) -> Result<JobSpec, StageError> {
        let input = props.require(keys::DIFFERENCING_IN_TABLE)?;
        let output = props.require(keys::DIFFERENCING_OUT_TABLE)?;
        let (mode, order) = parse_differencing(props.require(keys::DIFFERENCING)?)?;
        let family = family(props);
        let mapper = ColumnMapper::new(props.get_list(keys::COLUMN_LIST));
        Ok(JobSpec {
            name: "differencing".into(),
            input_table: input.to_string(),
            scan: mapper.scan(family)?,
            output_table: output.to_string(),
            mapper: Arc::new(mapper),
            reducer: Arc::new(DifferencingReducer {
                mode,
                order,
                family: family.to_string(),
            }),
            policies: ShufflePolicies::composite(),
            partitions: partitions(props)?,
            blocking: true,
        })
    }
}

impl Stage for DifferencingStage {
    fn name(&self) -> StageName {
        StageName::Differencing
    }

    fn run(&self, input: &StageInput<'_>) -> StageOutcome {
        let (mut delta, order) = try_stage!(Self::derive(input.props));
        let job_props = input.props.merge(&delta);
        let spec = try_stage!(Self::job(&job_props));

        {
            let conn = try_stage!(ScopedConnection::open(self.store.clone()));
            try_stage!(conn.ensure_table(&spec.output_table, family(&job_props)));
        }
        info!(
            input = %spec.input_table,
            output = %spec.output_table,
            differencing = job_props.get(keys::DIFFERENCING).unwrap_or_default(),
            "running differencing job"
        );

        delta.set(keys::TRANSFORM_IN_TABLE, spec.output_table.clone());
        let output = StageOutput {
            delta,
            target: Some(TargetDescriptor::new(
                TagPattern::new(vec![TagToken::Wildcard, TagToken::from(order)]),
                vec![StatKind::Mean, StatKind::Variance],
            )),
            ..StageOutput::default()
        };
        job_outcome(self.engine.submit_job(spec), output)
    }
}

/// Writes every differencing order of each column of one series.
pub struct DifferencingReducer {
    pub mode: DifferencingMode,
    pub order: u32,
    pub family: String,
}

impl DifferencingReducer {
    fn column_puts(&self, series: &SeriesId, base: &str, run: &[TimeSeriesRecord]) -> Vec<Put> {
        let (hours, values): (Vec<i64>, Vec<f64>) = run
            .iter()
            .filter_map(|r| Some((r.key.timestamp, r.value.value()?)))
            .unzip();
        let lag = self.mode.lag();
        let mut puts = Vec::new();

        for (d, series_d) in wx_math::difference_n(&values, lag, self.order as usize)
            .into_iter()
            .enumerate()
        {
            let order_token = d.to_string();
            let tag = build_tag(&[base, self.mode.token(), order_token.as_str()]);
            if series_d.is_empty() {
                debug!(series = %series, tag = %tag, "series too short for differencing order");
                continue;
            }
            // Order d drops the first d * lag observations.
            let offset = hours.len() - series_d.len();
            for (hour, v) in hours[offset..].iter().zip(&series_d) {
                if let Some(row) = encode_row_key(series, *hour) {
                    puts.push(Put::new(row, &self.family, &tag, Value::Double(*v)));
                }
            }
            let stats_row = stats_row_key(&tag);
            puts.push(Put::new(
                &stats_row,
                &self.family,
                stat_qualifier(StatKind::Mean, series.as_str()),
                Value::Double(wx_math::mean(&series_d)),
            ));
            puts.push(Put::new(
                &stats_row,
                &self.family,
                stat_qualifier(StatKind::Variance, series.as_str()),
                Value::Double(wx_math::variance(&series_d)),
            ));
        }
        puts
    }
}

impl Reducer for DifferencingReducer {
    fn reduce(
        &self,
        series: &SeriesId,
        records: &[TimeSeriesRecord],
    ) -> Result<Vec<Put>, ReduceError> {
        let mut puts = Vec::new();
        for run in records.chunk_by(|a, b| a.key.column_tag == b.key.column_tag) {
            let base = &run[0].key.column_tag;
            puts.extend(self.column_puts(series, base, run));
        }
        Ok(puts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CompositeKey, TimeSeriesValue};

    fn records(series: &str, tag: &str, values: &[f64]) -> Vec<TimeSeriesRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                TimeSeriesRecord::new(
                    CompositeKey::new(SeriesId(series.into()), 438_300 + i as i64, tag),
                    TimeSeriesValue::single(*v),
                )
            })
            .collect()
    }

    fn cells<'a>(puts: &'a [Put], qualifier: &str) -> Vec<&'a Put> {
        puts.iter().filter(|p| p.qualifier == qualifier).collect()
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(DifferencingMode::parse("step"), Some(DifferencingMode::Step));
        assert_eq!(
            DifferencingMode::parse("season:24"),
            Some(DifferencingMode::Season(24))
        );
        assert_eq!(DifferencingMode::parse("season:0"), None);
        assert_eq!(
            parse_differencing("season:12,2").unwrap(),
            (DifferencingMode::Season(12), 2)
        );
        assert!(parse_differencing("step").is_err());
    }

    #[test]
    fn reducer_writes_every_order() {
        let reducer = DifferencingReducer {
            mode: DifferencingMode::Step,
            order: 1,
            family: "data".into(),
        };
        let s1 = SeriesId("S1".into());
        let puts = reducer
            .reduce(&s1, &records("S1", "temp", &[1.0, 4.0, 9.0]))
            .unwrap();

        let step0 = cells(&puts, "temp_step_0");
        assert_eq!(step0.len(), 3);
        let step1 = cells(&puts, "temp_step_1");
        assert_eq!(step1.len(), 2);
        assert_eq!(step1[0].value, Value::Double(3.0));
        // First differenced value lands on the second observation.
        assert_eq!(step1[0].row, step0[1].row);

        let mean = puts
            .iter()
            .find(|p| p.row == "#stats#temp_step_1" && p.qualifier == "mean@S1")
            .unwrap();
        assert_eq!(mean.value, Value::Double(4.0));
    }

    #[test]
    fn short_series_skips_high_orders() {
        let reducer = DifferencingReducer {
            mode: DifferencingMode::Step,
            order: 2,
            family: "data".into(),
        };
        let puts = reducer
            .reduce(&SeriesId("S1".into()), &records("S1", "temp", &[1.0, 2.0]))
            .unwrap();
        assert!(cells(&puts, "temp_step_2").is_empty());
        assert!(!puts.iter().any(|p| p.row == "#stats#temp_step_2"));
    }

    #[test]
    fn huge_order_writes_only_reachable_orders() {
        let reducer = DifferencingReducer {
            mode: DifferencingMode::Step,
            order: u32::MAX,
            family: "data".into(),
        };
        let puts = reducer
            .reduce(&SeriesId("S1".into()), &records("S1", "temp", &[1.0, 2.0, 3.0]))
            .unwrap();
        assert_eq!(cells(&puts, "temp_step_2").len(), 1);
        assert!(cells(&puts, "temp_step_3").is_empty());
    }

    #[test]
    fn derive_sets_job_keys() {
        let props = Properties::new()
            .with(keys::ARIMA_IN_TABLE, "weather")
            .with(keys::ARIMA_DIFFERENCING_TABLE, "diff")
            .with(keys::ARIMA_D, "1")
            .with(keys::ARIMA_COLUMNS, "temp");
        let (delta, order) = DifferencingStage::derive(&props).unwrap();
        assert_eq!(order, 1);
        assert_eq!(delta.get(keys::DIFFERENCING), Some("step,1"));
        assert_eq!(delta.get(keys::DIFFERENCING_OUT_TABLE), Some("diff"));
        let spec = DifferencingStage::job(&props.merge(&delta)).unwrap();
        assert_eq!(spec.input_table, "weather");
        assert!(spec.blocking);
    }
}
