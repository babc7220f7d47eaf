//! Weather series pipeline configuration loading and validation.
//!
//! This crate provides:
//! - The typed configuration file model (`pipeline.toml` / `.json`)
//! - Immutable key/value snapshots and stage deltas
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation
//! - Config snapshots for run provenance

pub mod error;
pub mod file;
pub mod keys;
pub mod properties;
pub mod resolve;
pub mod snapshot;
pub mod type_map;
pub mod validate;

pub use error::ConfigError;
pub use file::PipelineFile;
pub use properties::{range_spec, ConfigDelta, Properties};
pub use resolve::{
    expand_home, resolve_config, resolve_config_path, ConfigPaths, ConfigSource, ResolvedConfig,
};
pub use snapshot::ConfigSnapshot;
pub use type_map::{DataType, TypeMap};
pub use validate::{validate, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
