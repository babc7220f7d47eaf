//! Exit codes for the wx-core CLI.
//!
//! Exit codes communicate the run outcome without requiring output parsing.

use crate::pipeline::{PipelineReport, ResultCode};

/// Exit codes for wx-core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Pipeline finished (or check passed)
    Success = 0,

    /// Final job submitted without waiting
    Running = 1,

    /// A stage failed
    PipelineFailed = 2,

    /// Configuration error
    ConfigError = 10,

    /// I/O error (input file, results directory)
    IoError = 13,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Success | ExitCode::Running)
    }

    /// Check if this exit code indicates an error requiring attention.
    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Exit code for a finished run.
    pub fn for_report(report: &PipelineReport) -> Self {
        match report.result_code {
            ResultCode::Success => ExitCode::Success,
            ResultCode::Running => ExitCode::Running,
            ResultCode::Failed if !report.config_errors.is_empty() => ExitCode::ConfigError,
            ResultCode::Failed => ExitCode::PipelineFailed,
        }
    }

    /// Exit code for an error raised outside the stages.
    pub fn for_error(err: &wx_common::Error) -> Self {
        if err.is_configuration() {
            ExitCode::ConfigError
        } else if matches!(err, wx_common::Error::Io(_)) {
            ExitCode::IoError
        } else {
            ExitCode::InternalError
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}
