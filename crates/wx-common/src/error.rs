//! Error types for the weather series pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the pipeline.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing required property: {key}")]
    MissingProperty { key: String },

    #[error("invalid value for property {key}: {reason}")]
    InvalidProperty { key: String, reason: String },

    // Stage errors (20-29)
    #[error("stage {stage} failed: {message}")]
    StageExecution { stage: String, message: String },

    #[error("job {job} failed: {message}")]
    JobFailed { job: String, message: String },

    // Resolution errors (30-39)
    #[error("unable to identify target column for {stage} (pattern {pattern})")]
    Resolution { stage: String, pattern: String },

    // Storage errors (40-49)
    #[error("storage error: {0}")]
    Storage(String),

    #[error("table not found: {table}")]
    TableNotFound { table: String },

    // Record errors (50-59)
    #[error("malformed record {row}: {reason}")]
    RecordParse { row: String, reason: String },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("result extraction failed: {0}")]
    Extraction(String),
}

impl Error {
    /// Returns the error code for this error type.
    /// Used for detailed error reporting in JSON output.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::MissingProperty { .. } => 11,
            Error::InvalidProperty { .. } => 12,
            Error::StageExecution { .. } => 20,
            Error::JobFailed { .. } => 21,
            Error::Resolution { .. } => 30,
            Error::Storage(_) => 40,
            Error::TableNotFound { .. } => 41,
            Error::RecordParse { .. } => 50,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::Extraction(_) => 62,
        }
    }

    /// Whether this error was raised before any stage could run.
    pub fn is_configuration(&self) -> bool {
        (10..20).contains(&self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_grouped_by_kind() {
        assert_eq!(
            Error::MissingProperty {
                key: "arima.d".into()
            }
            .code(),
            11
        );
        assert_eq!(
            Error::Resolution {
                stage: "lag".into(),
                pattern: ".*_1$".into()
            }
            .code(),
            30
        );
        assert_eq!(Error::Storage("down".into()).code(), 40);
    }

    #[test]
    fn configuration_errors_detected() {
        assert!(Error::Config("bad".into()).is_configuration());
        assert!(!Error::Storage("bad".into()).is_configuration());
    }

    #[test]
    fn missing_property_message_names_key() {
        let err = Error::MissingProperty {
            key: "arima.out_table".into(),
        };
        assert_eq!(err.to_string(), "missing required property: arima.out_table");
    }
}
