//! Configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, resolving or reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required properties: {}", keys.join(", "))]
    Missing { keys: Vec<String> },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported configuration file type: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<ConfigError> for wx_common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Missing { keys } => wx_common::Error::MissingProperty {
                key: keys.join(", "),
            },
            ConfigError::Invalid { key, reason } => {
                wx_common::Error::InvalidProperty { key, reason }
            }
            ConfigError::Io(e) => wx_common::Error::Io(e),
            other => wx_common::Error::Config(other.to_string()),
        }
    }
}
