//! Weather series model results storage.
//!
//! This crate provides:
//! - The Arrow schema for per-series model-fit results
//! - A batched Parquet writer with ZSTD compression
//! - A reader used to load result files back for inspection

pub mod schema;
pub mod writer;

pub use schema::{model_results_schema, ModelResultRow, RESULT_COLUMNS};
pub use writer::{read_results, ResultsWriter, WriteError, WriterConfig};

/// Schema version for result files.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Default batch size for buffered writes.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default ZSTD compression level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;
