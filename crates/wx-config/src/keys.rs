//! Property keys understood by the pipeline.
//!
//! Keys under `arima.`, `lag.`, `results.` and `job.` come from the
//! configuration file. Keys under `differencing.`, `transform.` and the bare
//! `column_list` / `key_type_map` are derived by stages and handed to the
//! next stage through a [`ConfigDelta`](crate::ConfigDelta).

// ── File-level keys ─────────────────────────────────────────────────────

pub const ARIMA_IN_TABLE: &str = "arima.in_table";
pub const ARIMA_DIFFERENCING_TABLE: &str = "arima.differencing_table";
pub const ARIMA_LAGS_TABLE: &str = "arima.lags_table";
pub const ARIMA_OUT_TABLE: &str = "arima.out_table";
/// Differencing order D.
pub const ARIMA_D: &str = "arima.d";
/// Lag list, as a range spec (`1,2` or `1-3` or `2`).
pub const ARIMA_P: &str = "arima.p";
/// Comma separated base columns to transform.
pub const ARIMA_COLUMNS: &str = "arima.columns";
/// `step` or `season:<period>`.
pub const ARIMA_DIFFERENCING_MODE: &str = "arima.differencing_mode";

/// When true the lag stage forwards the differencing output untouched.
pub const LAG_PASS_THROUGH: &str = "lag.pass_through";

pub const RESULTS_PATH: &str = "results.path";
pub const RESULTS_FORMAT: &str = "results.format";

/// Wait for each job to complete (false submits the final job and returns).
pub const JOB_WAIT: &str = "job.wait";
pub const JOB_PARTITIONS: &str = "job.partitions";
pub const JOB_VERBOSE: &str = "job.verbose";

pub const STORE_FAMILY: &str = "store.family";

// ── Stage-derived keys ──────────────────────────────────────────────────

pub const DIFFERENCING_IN_TABLE: &str = "differencing.in_table";
pub const DIFFERENCING_OUT_TABLE: &str = "differencing.out_table";
/// `<mode>,<order>` e.g. `step,1`.
pub const DIFFERENCING: &str = "differencing";

pub const TRANSFORM_IN_TABLE: &str = "transform.in_table";
pub const TRANSFORM_OUT_TABLE: &str = "transform.out_table";
/// Number of lags the transform stage computes.
pub const TRANSFORM_LAG: &str = "transform.lag";

/// Columns the next job's mapper selects.
pub const COLUMN_LIST: &str = "column_list";
/// Encoded [`TypeMap`](crate::TypeMap) for the selected columns.
pub const KEY_TYPE_MAP: &str = "key_type_map";
/// Prefix of the per-series statistics of the lag input column,
/// `stats.<stat>@<series>`.
pub const STATS_PREFIX: &str = "stats.";

/// Keys every pipeline run requires before the first stage starts.
pub const PIPELINE_REQUIRED: &[&str] = &[
    ARIMA_IN_TABLE,
    ARIMA_DIFFERENCING_TABLE,
    ARIMA_LAGS_TABLE,
    ARIMA_OUT_TABLE,
    ARIMA_D,
    ARIMA_P,
    ARIMA_COLUMNS,
    RESULTS_PATH,
];
