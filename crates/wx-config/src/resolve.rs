//! Configuration resolution.
//!
//! Resolution order for the configuration file:
//! 1. explicit CLI path (`--config`)
//! 2. `WX_CONFIG` environment variable
//! 3. `<XDG config dir>/weather-series/pipeline.toml`
//! 4. built-in defaults only
//!
//! Built-in defaults sit under the file values, and `--set key=value`
//! overrides sit on top of both.

use std::path::{Path, PathBuf};

use crate::file::PipelineFile;
use crate::keys;
use crate::{ConfigError, Properties};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "WX_CONFIG";

/// Application directory under the XDG config dir.
pub const APP_DIR: &str = "weather-series";

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "pipeline.toml";

/// Where the configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env,
    Xdg,
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Cli => write!(f, "cli"),
            ConfigSource::Env => write!(f, "env"),
            ConfigSource::Xdg => write!(f, "xdg"),
            ConfigSource::Defaults => write!(f, "defaults"),
        }
    }
}

/// The resolved configuration file location.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: Option<PathBuf>,
    pub source: ConfigSource,
}

/// Resolved configuration: properties plus provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub properties: Properties,
    pub paths: ConfigPaths,
}

/// Built-in defaults for optional keys.
pub fn defaults() -> Properties {
    Properties::from_pairs([
        (keys::ARIMA_DIFFERENCING_MODE, "step"),
        (keys::LAG_PASS_THROUGH, "false"),
        (keys::RESULTS_FORMAT, "json"),
        (keys::JOB_WAIT, "true"),
        (keys::JOB_PARTITIONS, "4"),
        (keys::JOB_VERBOSE, "false"),
        (keys::STORE_FAMILY, "data"),
    ])
}

/// Locate the configuration file using the process environment.
pub fn resolve_config_path(cli: Option<&Path>) -> ConfigPaths {
    resolve_config_path_with(
        cli,
        std::env::var(CONFIG_ENV).ok(),
        dirs::config_dir().map(|d| d.join(APP_DIR)),
    )
}

/// Locate the configuration file from explicit inputs.
pub fn resolve_config_path_with(
    cli: Option<&Path>,
    env: Option<String>,
    xdg_dir: Option<PathBuf>,
) -> ConfigPaths {
    if let Some(path) = cli {
        return ConfigPaths {
            config_file: Some(path.to_path_buf()),
            source: ConfigSource::Cli,
        };
    }
    if let Some(path) = env.filter(|s| !s.trim().is_empty()) {
        return ConfigPaths {
            config_file: Some(PathBuf::from(path)),
            source: ConfigSource::Env,
        };
    }
    if let Some(candidate) = xdg_dir.map(|d| d.join(CONFIG_FILE_NAME)) {
        if candidate.exists() {
            return ConfigPaths {
                config_file: Some(candidate),
                source: ConfigSource::Xdg,
            };
        }
    }
    ConfigPaths {
        config_file: None,
        source: ConfigSource::Defaults,
    }
}

/// Parse `key=value` override strings.
pub fn parse_overrides(raw: &[String]) -> Result<Vec<(String, String)>, ConfigError> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| ConfigError::Invalid {
                    key: entry.clone(),
                    reason: "override must have the form key=value".to_string(),
                })
        })
        .collect()
}

/// Expand a leading `~` in `path` to the current user's home directory.
pub fn expand_home(key: &str, path: &str) -> Result<PathBuf, ConfigError> {
    expand_home_with(key, path, dirs::home_dir().as_deref())
}

/// Expand a leading `~` in `path` to `home`.
///
/// Only `~` and `~/...` are expanded; the `~user/...` form is rejected.
pub fn expand_home_with(
    key: &str,
    path: &str,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigError> {
    let Some(rest) = path.strip_prefix('~') else {
        return Ok(PathBuf::from(path));
    };
    if names_other_user(path) {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: format!("'{path}': home expansion for a named user is not supported"),
        });
    }
    let home = home.ok_or_else(|| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("'{path}': home directory is unknown"),
    })?;
    Ok(home.join(rest.trim_start_matches(is_separator)))
}

/// True for paths of the form `~user...`.
pub(crate) fn names_other_user(path: &str) -> bool {
    path.strip_prefix('~')
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| !is_separator(c))
}

fn is_separator(c: char) -> bool {
    c == '/' || c == std::path::MAIN_SEPARATOR
}

/// Resolve the full property set: defaults, then file, then overrides.
///
/// A leading `~` in `results.path` is expanded to the home directory.
pub fn resolve_config(
    paths: ConfigPaths,
    overrides: &[(String, String)],
) -> Result<ResolvedConfig, ConfigError> {
    let mut properties = defaults();
    if let Some(file) = &paths.config_file {
        let loaded = PipelineFile::from_file(file)?;
        for (k, v) in loaded.to_properties().iter() {
            properties = properties.with(k, v);
        }
    }
    for (k, v) in overrides {
        properties = properties.with(k.clone(), v.clone());
    }
    if let Some(raw) = properties.get(keys::RESULTS_PATH).map(str::to_string) {
        let expanded = expand_home(keys::RESULTS_PATH, &raw)?;
        properties = properties.with(keys::RESULTS_PATH, expanded.display().to_string());
    }
    Ok(ResolvedConfig { properties, paths })
}
