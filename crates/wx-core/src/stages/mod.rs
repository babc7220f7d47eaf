//! Pipeline stages.
//!
//! Each stage is a handler that reads an immutable configuration snapshot
//! plus the previous stage's [`TargetDescriptor`] and returns a
//! [`StageOutcome`]. Stages never mutate shared configuration; keys they
//! derive for later stages travel in the outcome's [`ConfigDelta`].

pub mod arima;
pub mod clear;
pub mod differencing;
pub mod fitter;
pub mod lag;
pub mod mapper;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wx_config::{keys, ConfigDelta, ConfigError, Properties};

use crate::engine::{EngineError, JobCounters, JobHandle, JobStatus};
use crate::stats_index::{ColumnDescriptor, TargetDescriptor};
use crate::store::StoreError;

pub use arima::ArimaStage;
pub use clear::ClearStage;
pub use differencing::{DifferencingMode, DifferencingStage};
pub use fitter::{ModelFitter, YuleWalkerFitter};
pub use lag::LagStage;
pub use mapper::ColumnMapper;

/// The four stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageName {
    Clear,
    Differencing,
    Lag,
    Arima,
}

impl StageName {
    pub const ALL: [StageName; 4] = [
        StageName::Clear,
        StageName::Differencing,
        StageName::Lag,
        StageName::Arima,
    ];

    /// 1-based step number used in progress logs.
    pub fn step(self) -> usize {
        self as usize + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Clear => "CLEAR",
            StageName::Differencing => "DIFFERENCING",
            StageName::Lag => "LAG",
            StageName::Arima => "ARIMA",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Why a stage failed.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("job {job} failed: {source}")]
    Job {
        job: String,
        #[source]
        source: EngineError,
    },

    #[error("unable to identify target column in {table} (pattern {pattern})")]
    Resolution { table: String, pattern: String },

    #[error("invalid target pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("no target descriptor from the previous stage")]
    MissingTarget,

    #[error("job {0} was submitted without waiting, which only the final stage may do")]
    UnexpectedRunning(String),
}

impl StageError {
    /// Convert to the workspace error for a given stage.
    pub fn into_common(self, stage: StageName) -> wx_common::Error {
        match self {
            StageError::Config(e) => e.into(),
            StageError::Store(e) => wx_common::Error::StageExecution {
                stage: stage.to_string(),
                message: wx_common::Error::from(e).to_string(),
            },
            StageError::Job { job, source } => wx_common::Error::JobFailed {
                job,
                message: source.to_string(),
            },
            StageError::Resolution { pattern, .. } => wx_common::Error::Resolution {
                stage: stage.to_string(),
                pattern,
            },
            other => wx_common::Error::StageExecution {
                stage: stage.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// What a stage sees.
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    pub props: &'a Properties,
    pub target: Option<&'a TargetDescriptor>,
}

impl<'a> StageInput<'a> {
    pub fn new(props: &'a Properties, target: Option<&'a TargetDescriptor>) -> Self {
        Self { props, target }
    }

    pub(crate) fn require_target(&self) -> Result<&'a TargetDescriptor, StageError> {
        self.target.ok_or(StageError::MissingTarget)
    }
}

/// What a stage hands forward.
#[derive(Debug, Default)]
pub struct StageOutput {
    pub delta: ConfigDelta,
    /// Replaces the current target descriptor when set.
    pub target: Option<TargetDescriptor>,
    pub resolved: Option<ColumnDescriptor>,
    pub counters: Option<JobCounters>,
    /// Set when the stage's job was submitted without waiting.
    pub handle: Option<JobHandle>,
    /// The stage did no work (pass-through).
    pub skipped: bool,
}

/// Result of running a stage.
#[derive(Debug)]
pub enum StageOutcome {
    Advance(StageOutput),
    Submitted(StageOutput),
    Failed(StageError),
}

/// One pipeline stage.
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;
    fn run(&self, input: &StageInput<'_>) -> StageOutcome;
}

/// Fold a job status into a stage outcome.
pub(crate) fn job_outcome(status: JobStatus, mut output: StageOutput) -> StageOutcome {
    match status {
        JobStatus::Success(counters) => {
            output.counters = Some(counters);
            StageOutcome::Advance(output)
        }
        JobStatus::Running(handle) => {
            output.handle = Some(handle);
            StageOutcome::Submitted(output)
        }
        JobStatus::Failed { job, error } => StageOutcome::Failed(StageError::Job { job, source: error }),
    }
}

/// Column family every stage table uses.
pub(crate) fn family(props: &Properties) -> &str {
    props.get(keys::STORE_FAMILY).unwrap_or("data")
}

pub(crate) fn partitions(props: &Properties) -> Result<usize, StageError> {
    Ok(props.get_u32(keys::JOB_PARTITIONS, 4)?.max(1) as usize)
}

/// Lift a `Result` into a stage outcome.
macro_rules! try_stage {
    ($expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => return $crate::stages::StageOutcome::Failed(e.into()),
        }
    };
}
pub(crate) use try_stage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_and_steps() {
        let steps: Vec<usize> = StageName::ALL.iter().map(|s| s.step()).collect();
        assert_eq!(steps, vec![1, 2, 3, 4]);
        assert!(StageName::Clear < StageName::Arima);
    }

    #[test]
    fn stage_name_serializes_upper() {
        assert_eq!(
            serde_json::to_string(&StageName::Differencing).unwrap(),
            r#""DIFFERENCING""#
        );
    }

    #[test]
    fn resolution_error_maps_to_code_30() {
        let err = StageError::Resolution {
            table: "t".into(),
            pattern: "[*, 1]".into(),
        };
        assert_eq!(err.into_common(StageName::Lag).code(), 30);
    }

    #[test]
    fn missing_property_maps_to_config_code() {
        let err = StageError::from(ConfigError::Missing {
            keys: vec!["arima.d".into()],
        });
        assert!(err.into_common(StageName::Differencing).is_configuration());
    }
}
