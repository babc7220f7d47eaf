//! Weather series pipeline core library.
//!
//! A four-stage pipeline (clear, differencing, lag, model fit) over a
//! column store, driven by a shuffle-sort compute engine:
//!
//! - [`record`]: composite keys and row-key encoding
//! - [`shuffle`]: partition, sort and grouping policies
//! - [`store`]: column store interface and the in-memory store
//! - [`engine`]: compute engine interface and the local engine
//! - [`stats_index`]: stats rows and target column resolution
//! - [`stages`]: the stage handlers
//! - [`pipeline`]: the orchestrator and its report
//! - [`extract`]: result sinks
//! - [`ingest`]: JSON-lines observation loader

pub mod cli;
pub mod engine;
pub mod exit_codes;
pub mod extract;
pub mod ingest;
pub mod pipeline;
pub mod record;
pub mod shuffle;
pub mod stages;
pub mod stats_index;
pub mod store;

pub use engine::{ComputeEngine, JobCounters, JobHandle, JobSpec, JobStatus, LocalEngine};
pub use exit_codes::ExitCode;
pub use extract::{extract_results, ExtractError, JsonSink, ParquetSink, ResultSink};
pub use pipeline::{run_pipeline, PipelineContext, PipelineReport, ResultCode, StageStatus};
pub use record::{CompositeKey, TimeSeriesRecord, TimeSeriesValue};
pub use stages::{Stage, StageName, StageOutcome};
pub use stats_index::{ColumnDescriptor, StatKind, TagPattern, TagToken, TargetDescriptor};
pub use store::{ColumnStore, MemoryStore, ScopedConnection};
