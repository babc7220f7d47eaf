//! Pipeline orchestrator.
//!
//! Runs CLEAR → DIFFERENCING → LAG → ARIMA in order against an immutable
//! configuration snapshot. Each stage's [`ConfigDelta`](wx_config::ConfigDelta)
//! is merged into a fresh snapshot for the next stage, and the target
//! descriptor a stage returns replaces the current one. The first failing
//! stage ends the run. Only the final stage may be submitted without
//! waiting, in which case the run ends RUNNING and the report holds the
//! job handle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, info_span, warn};
use wx_common::RunId;
use wx_config::{keys, snapshot, validate, Properties, ValidationError};

use crate::engine::{ComputeEngine, JobCounters, JobHandle, LocalEngine};
use crate::extract::extract_results;
use crate::stages::{
    ArimaStage, ClearStage, DifferencingStage, LagStage, ModelFitter, Stage, StageError,
    StageInput, StageName, StageOutcome, StageOutput, YuleWalkerFitter,
};
use crate::stats_index::TargetDescriptor;
use crate::store::ColumnStore;

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Success,
    Failed,
    Running,
}

impl ResultCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Success => "SUCCESS",
            ResultCode::Failed => "FAILED",
            ResultCode::Running => "RUNNING",
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state. Stage states advance strictly in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Clear,
    Differencing,
    Lag,
    Arima,
    Success,
    Failed,
    Running,
}

impl PipelineState {
    /// Stage to run in this state, if any.
    pub fn stage(self) -> Option<StageName> {
        match self {
            PipelineState::Clear => Some(StageName::Clear),
            PipelineState::Differencing => Some(StageName::Differencing),
            PipelineState::Lag => Some(StageName::Lag),
            PipelineState::Arima => Some(StageName::Arima),
            _ => None,
        }
    }

    /// State after the current stage succeeds.
    pub fn advance(self) -> Self {
        match self {
            PipelineState::Clear => PipelineState::Differencing,
            PipelineState::Differencing => PipelineState::Lag,
            PipelineState::Lag => PipelineState::Arima,
            PipelineState::Arima => PipelineState::Success,
            terminal => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.stage().is_none()
    }

    fn result_code(self) -> ResultCode {
        match self {
            PipelineState::Success => ResultCode::Success,
            PipelineState::Running => ResultCode::Running,
            _ => ResultCode::Failed,
        }
    }
}

/// How a visited stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Skipped,
    Running,
    Failed,
}

/// One visited stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub name: StageName,
    pub status: StageStatus,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counters: Option<JobCounters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error summary carried by a failed report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportError {
    pub code: u32,
    pub message: String,
}

/// Everything a run produced.
#[derive(Debug, Serialize)]
pub struct PipelineReport {
    pub schema_version: &'static str,
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result_code: ResultCode,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<StageName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub config_errors: Vec<ValidationError>,
    pub config_fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_location: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,
    /// Handle of the final job when it was submitted without waiting.
    #[serde(skip)]
    pending: Option<JobHandle>,
}

impl PipelineReport {
    fn new(run_id: RunId, config_fingerprint: String) -> Self {
        let now = Utc::now();
        Self {
            schema_version: wx_common::SCHEMA_VERSION,
            run_id,
            started_at: now,
            finished_at: now,
            result_code: ResultCode::Failed,
            stages: Vec::new(),
            failed_stage: None,
            error: None,
            config_errors: Vec::new(),
            config_fingerprint,
            results_location: None,
            results_count: None,
            extraction_error: None,
            pending: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code == ResultCode::Success
    }

    /// Take the running job's handle, leaving `None`.
    pub fn take_pending(&mut self) -> Option<JobHandle> {
        self.pending.take()
    }

    pub fn stage(&self, name: StageName) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    fn record(&mut self, name: StageName, status: StageStatus, elapsed_ms: u64, output: &StageOutput) {
        self.stages.push(StageRecord {
            name,
            status,
            elapsed_ms,
            counters: output.counters.clone(),
            resolved_column: output.resolved.as_ref().map(|c| c.column_name.clone()),
            message: None,
        });
    }

    fn fail(&mut self, name: StageName, elapsed_ms: u64, err: StageError) {
        let err = err.into_common(name);
        error!(stage = %name, code = err.code(), error = %err, "stage failed");
        self.stages.push(StageRecord {
            name,
            status: StageStatus::Failed,
            elapsed_ms,
            counters: None,
            resolved_column: None,
            message: Some(err.to_string()),
        });
        self.failed_stage = Some(name);
        self.error = Some(ReportError {
            code: err.code(),
            message: err.to_string(),
        });
    }
}

/// Collaborators a run needs.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn ColumnStore>,
    pub engine: Arc<dyn ComputeEngine>,
    pub fitter: Arc<dyn ModelFitter>,
}

impl PipelineContext {
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

    /// In-process engine and Yule–Walker fitting over `store`.
    pub fn local(store: Arc<dyn ColumnStore>) -> Self {
        let engine = Arc::new(LocalEngine::new(store.clone()));
        Self::new(store, engine, Arc::new(YuleWalkerFitter))
    }

    fn stage(&self, name: StageName) -> Box<dyn Stage> {
        match name {
            StageName::Clear => Box::new(ClearStage::new(self.store.clone())),
            StageName::Differencing => {
                Box::new(DifferencingStage::new(self.store.clone(), self.engine.clone()))
            }
            StageName::Lag => Box::new(LagStage::new(self.store.clone(), self.engine.clone())),
            StageName::Arima => Box::new(ArimaStage::new(
                self.store.clone(),
                self.engine.clone(),
                self.fitter.clone(),
            )),
        }
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext").finish_non_exhaustive()
    }
}

/// Run the whole pipeline once.
pub fn run_pipeline(props: &Properties, ctx: &PipelineContext) -> PipelineReport {
    let run_id = RunId::new();
    let _span = info_span!("pipeline", run_id = %run_id).entered();
    let mut report = PipelineReport::new(run_id.clone(), snapshot::fingerprint(props));
    info!(fingerprint = %report.config_fingerprint, keys = props.len(), "pipeline run starting");

    let validation = validate(props);
    for w in &validation.warnings {
        warn!(key = %w.key, "{}", w.message);
    }
    if !validation.is_valid() {
        for e in &validation.errors {
            error!(key = %e.key, "{}", e.message);
        }
        report.error = Some(ReportError {
            code: 10,
            message: format!("{} configuration error(s)", validation.errors.len()),
        });
        report.config_errors = validation.errors;
        report.finished_at = Utc::now();
        return report;
    }

    let verbose = props.get_bool(keys::JOB_VERBOSE, false).unwrap_or(false);
    let mut snapshot = props.clone();
    let mut target: Option<TargetDescriptor> = None;
    let mut state = PipelineState::Clear;

    while let Some(name) = state.stage() {
        info!("Step {} - {}", name.step(), name);
        let stage = ctx.stage(name);
        let started = Instant::now();
        let outcome = stage.run(&StageInput::new(&snapshot, target.as_ref()));
        let elapsed_ms = started.elapsed().as_millis() as u64;

        state = match outcome {
            StageOutcome::Advance(output) => {
                let status = if output.skipped {
                    StageStatus::Skipped
                } else {
                    StageStatus::Success
                };
                info!(stage = %name, elapsed_ms, ?status, "stage complete");
                if let (true, Some(c)) = (verbose, &output.counters) {
                    info!(
                        stage = %name,
                        rows = c.rows_scanned,
                        mapped = c.records_mapped,
                        dropped = c.records_dropped,
                        groups = c.groups_reduced,
                        cells = c.cells_written,
                        "job counters"
                    );
                }
                report.record(name, status, elapsed_ms, &output);
                snapshot = snapshot.merge(&output.delta);
                if let Some(next) = output.target {
                    target = Some(next);
                }
                state.advance()
            }
            StageOutcome::Submitted(mut output) if name == StageName::Arima => {
                info!(stage = %name, "final job submitted; not waiting");
                report.record(name, StageStatus::Running, elapsed_ms, &output);
                report.pending = output.handle.take();
                PipelineState::Running
            }
            StageOutcome::Submitted(output) => {
                let job = output
                    .handle
                    .as_ref()
                    .map(|h| h.job().to_string())
                    .unwrap_or_else(|| name.to_string());
                report.fail(name, elapsed_ms, StageError::UnexpectedRunning(job));
                PipelineState::Failed
            }
            StageOutcome::Failed(err) => {
                report.fail(name, elapsed_ms, err);
                PipelineState::Failed
            }
        };
    }

    report.result_code = state.result_code();
    if state == PipelineState::Success {
        match extract_results(ctx.store.clone(), &snapshot, &run_id) {
            Ok(summary) => {
                report.results_location = Some(summary.path);
                report.results_count = Some(summary.rows);
            }
            Err(e) => {
                warn!(error = %e, "result extraction failed");
                report.extraction_error = Some(e.to_string());
            }
        }
    }
    report.finished_at = Utc::now();
    info!(result = %report.result_code, stages = report.stages.len(), "pipeline run finished");
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_advance_in_order() {
        let mut state = PipelineState::Clear;
        let mut visited = Vec::new();
        while let Some(stage) = state.stage() {
            visited.push(stage);
            state = state.advance();
        }
        assert_eq!(visited, StageName::ALL.to_vec());
        assert_eq!(state, PipelineState::Success);
        assert!(PipelineState::Failed.advance().is_terminal());
    }

    #[test]
    fn result_codes_follow_terminal_state() {
        assert_eq!(PipelineState::Success.result_code(), ResultCode::Success);
        assert_eq!(PipelineState::Running.result_code(), ResultCode::Running);
        assert_eq!(PipelineState::Failed.result_code(), ResultCode::Failed);
    }

    #[test]
    fn invalid_config_runs_no_stage() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let report = run_pipeline(&Properties::new(), &PipelineContext::local(store.clone()));
        assert_eq!(report.result_code, ResultCode::Failed);
        assert!(report.stages.is_empty());
        assert!(report.config_errors.len() >= 8);
        assert_eq!(store.connections_opened(), 0);
    }

    #[test]
    fn report_serializes_upper_case_code() {
        let report = PipelineReport::new(RunId::new(), "f".into());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["result_code"], "FAILED");
        assert!(json.get("pending").is_none());
    }
}
