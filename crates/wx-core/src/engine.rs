//! Compute engine interface and the in-process shuffle-sort engine.
//!
//! A job scans its input table, maps each row into composite-keyed records,
//! shuffles them through the job's partition/sort/group policies and hands
//! each group to the reducer, whose cell writes land in the output table.
//! Rows the mapper rejects are dropped and counted; they never fail a job.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use wx_common::SeriesId;

use crate::record::{RecordError, TimeSeriesRecord};
use crate::shuffle::{partition_records, sort_and_group, ShufflePolicies};
use crate::store::{ColumnStore, Put, Row, ScanSpec, ScopedConnection, StoreError};

/// Errors that fail a job.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("reduce failed for series {series}: {message}")]
    Reduce { series: String, message: String },

    #[error("invalid job spec: {0}")]
    InvalidSpec(String),

    #[error("worker pool: {0}")]
    Pool(String),

    #[error("job {0} panicked")]
    Panicked(String),
}

/// A reducer's refusal to produce output for a group.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ReduceError(pub String);

/// Turns one stored row into zero or more records.
pub trait Mapper: Send + Sync {
    fn map(&self, row: &Row) -> Result<Vec<TimeSeriesRecord>, RecordError>;
}

/// Consumes one group (one series, sorted) and produces cell writes.
pub trait Reducer: Send + Sync {
    fn reduce(&self, series: &SeriesId, records: &[TimeSeriesRecord])
        -> Result<Vec<Put>, ReduceError>;
}

/// Everything the engine needs to run one job.
#[derive(Clone)]
pub struct JobSpec {
    pub name: String,
    pub input_table: String,
    pub scan: ScanSpec,
    pub output_table: String,
    pub mapper: Arc<dyn Mapper>,
    pub reducer: Arc<dyn Reducer>,
    pub policies: ShufflePolicies,
    pub partitions: usize,
    /// Wait for completion (`Success`/`Failed`) or return `Running`.
    pub blocking: bool,
}

impl std::fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("input_table", &self.input_table)
            .field("output_table", &self.output_table)
            .field("partitions", &self.partitions)
            .field("blocking", &self.blocking)
            .finish_non_exhaustive()
    }
}

/// Job counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub rows_scanned: usize,
    pub records_mapped: usize,
    pub records_dropped: usize,
    pub groups_reduced: usize,
    pub cells_written: usize,
    pub elapsed_ms: u128,
}

/// Handle to a job running in the background.
pub struct JobHandle {
    job: String,
    thread: JoinHandle<Result<JobCounters, EngineError>>,
}

impl JobHandle {
    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the job ends.
    pub fn wait(self) -> Result<JobCounters, EngineError> {
        self.thread
            .join()
            .map_err(|_| EngineError::Panicked(self.job.clone()))?
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job", &self.job)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Outcome of submitting a job.
#[derive(Debug)]
pub enum JobStatus {
    Success(JobCounters),
    Failed { job: String, error: EngineError },
    Running(JobHandle),
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success(_))
    }
}

/// A shuffle-sort compute engine.
pub trait ComputeEngine: Send + Sync {
    fn submit_job(&self, spec: JobSpec) -> JobStatus;
}

// ── Local engine ────────────────────────────────────────────────────────

/// Runs jobs in-process against a [`ColumnStore`], reducing partitions in
/// parallel on a rayon pool.
pub struct LocalEngine {
    store: Arc<dyn ColumnStore>,
}

impl LocalEngine {
    pub fn new(store: Arc<dyn ColumnStore>) -> Self {
        Self { store }
    }
}

impl ComputeEngine for LocalEngine {
    fn submit_job(&self, spec: JobSpec) -> JobStatus {
        let job = spec.name.clone();
        if spec.blocking {
            return match run_job(self.store.clone(), &spec) {
                Ok(counters) => JobStatus::Success(counters),
                Err(error) => {
                    warn!(job = %job, error = %error, "job failed");
                    JobStatus::Failed { job, error }
                }
            };
        }

        let store = self.store.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("wx-job-{job}"))
            .spawn(move || run_job(store, &spec));
        match spawned {
            Ok(thread) => {
                info!(job = %job, "job submitted");
                JobStatus::Running(JobHandle { job, thread })
            }
            Err(e) => JobStatus::Failed {
                job,
                error: EngineError::Pool(e.to_string()),
            },
        }
    }
}

/// Execute one job to completion.
pub fn run_job(store: Arc<dyn ColumnStore>, spec: &JobSpec) -> Result<JobCounters, EngineError> {
    if spec.partitions == 0 {
        return Err(EngineError::InvalidSpec("partition count must be positive".into()));
    }
    let started = Instant::now();
    let conn = ScopedConnection::open(store)?;
    if !conn.table_exists(&spec.output_table)? {
        return Err(StoreError::TableNotFound(spec.output_table.clone()).into());
    }

    let mut counters = JobCounters::default();
    let mut records = Vec::new();
    for row in conn.scan_rows(&spec.input_table, &spec.scan)? {
        counters.rows_scanned += 1;
        match spec.mapper.map(&row) {
            Ok(mapped) => {
                counters.records_mapped += mapped.len();
                records.extend(mapped);
            }
            Err(e) => {
                counters.records_dropped += 1;
                debug!(job = %spec.name, error = %e, "row dropped");
            }
        }
    }

    let partitions = partition_records(records, &spec.policies, spec.partitions);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(spec.partitions.min(num_threads()))
        .build()
        .map_err(|e| EngineError::Pool(e.to_string()))?;

    let groups_reduced = AtomicUsize::new(0);
    let outputs: Result<Vec<Vec<Put>>, EngineError> = pool.install(|| {
        partitions
            .into_par_iter()
            .map(|partition| {
                let mut puts = Vec::new();
                for group in sort_and_group(partition, &spec.policies) {
                    let Some(first) = group.first() else { continue };
                    let series = first.key.series_id.clone();
                    let written = spec.reducer.reduce(&series, &group).map_err(|e| {
                        EngineError::Reduce {
                            series: series.to_string(),
                            message: e.0,
                        }
                    })?;
                    groups_reduced.fetch_add(1, Ordering::Relaxed);
                    puts.extend(written);
                }
                Ok(puts)
            })
            .collect()
    });

    for puts in outputs? {
        if !puts.is_empty() {
            counters.cells_written += conn.put(&spec.output_table, puts)?;
        }
    }
    counters.groups_reduced = groups_reduced.into_inner();
    counters.elapsed_ms = started.elapsed().as_millis();

    info!(
        job = %spec.name,
        rows = counters.rows_scanned,
        mapped = counters.records_mapped,
        dropped = counters.records_dropped,
        groups = counters.groups_reduced,
        cells = counters.cells_written,
        elapsed_ms = counters.elapsed_ms as u64,
        "job complete"
    );
    Ok(counters)
}

fn num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
