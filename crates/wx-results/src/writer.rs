//! Batched Parquet writer for model results.
//!
//! Rows are buffered and flushed as Arrow record batches once the buffer
//! reaches the configured batch size. The file carries the schema version
//! and run id as Parquet key/value metadata.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, AsArray, Float64Builder, ListBuilder, StringBuilder, UInt32Builder};
use arrow::datatypes::{Float64Type, SchemaRef, UInt32Type};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use thiserror::Error;
use tracing::debug;

use crate::schema::{model_results_schema, ModelResultRow};
use crate::{DEFAULT_BATCH_SIZE, DEFAULT_ZSTD_LEVEL, SCHEMA_VERSION};

/// Errors from writing or reading result files.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("unexpected column layout in {path}: {reason}")]
    Layout { path: PathBuf, reason: String },
}

/// Writer tuning.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub zstd_level: i32,
    /// Recorded in the file metadata under `wx.run_id`.
    pub run_id: Option<String>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            run_id: None,
        }
    }
}

/// Buffered writer producing one Parquet file of [`ModelResultRow`]s.
pub struct ResultsWriter {
    path: PathBuf,
    schema: SchemaRef,
    writer: ArrowWriter<File>,
    buffer: Vec<ModelResultRow>,
    batch_size: usize,
    rows_written: usize,
}

impl ResultsWriter {
    /// Create the file (and any missing parent directories).
    pub fn create(path: impl AsRef<Path>, config: WriterConfig) -> Result<Self, WriteError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut metadata = vec![KeyValue::new(
            "wx.schema_version".to_string(),
            SCHEMA_VERSION.to_string(),
        )];
        if let Some(run_id) = &config.run_id {
            metadata.push(KeyValue::new("wx.run_id".to_string(), run_id.clone()));
        }
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::try_new(config.zstd_level)?))
            .set_key_value_metadata(Some(metadata))
            .build();

        let schema = model_results_schema();
        let file = File::create(&path)?;
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
        debug!(path = %path.display(), "opened results writer");

        Ok(Self {
            path,
            schema,
            writer,
            buffer: Vec::new(),
            batch_size: config.batch_size.max(1),
            rows_written: 0,
        })
    }

    /// Buffer one row, flushing when the batch is full.
    pub fn push(&mut self, row: ModelResultRow) -> Result<(), WriteError> {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write any buffered rows as one record batch.
    pub fn flush(&mut self) -> Result<(), WriteError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = build_batch(&self.schema, &self.buffer)?;
        self.writer.write(&batch)?;
        self.rows_written += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }

    /// Flush, write the footer and return the number of rows in the file.
    pub fn finish(mut self) -> Result<usize, WriteError> {
        self.flush()?;
        self.writer.close()?;
        debug!(path = %self.path.display(), rows = self.rows_written, "closed results writer");
        Ok(self.rows_written)
    }
}

fn build_batch(schema: &SchemaRef, rows: &[ModelResultRow]) -> Result<RecordBatch, ArrowError> {
    let n = rows.len();
    let mut ids = StringBuilder::with_capacity(n, rows.iter().map(|r| r.series_id.len()).sum());
    let mut orders = UInt32Builder::with_capacity(n);
    let mut metrics: [Float64Builder; 6] = std::array::from_fn(|_| Float64Builder::with_capacity(n));
    let mut params = ListBuilder::new(Float64Builder::new());

    for row in rows {
        ids.append_value(&row.series_id);
        orders.append_value(row.order);
        let values = [
            row.mse,
            row.maape,
            row.aic_mse,
            row.aic_maape,
            row.bic_mse,
            row.bic_maape,
        ];
        for (builder, value) in metrics.iter_mut().zip(values) {
            builder.append_value(value);
        }
        params.values().append_slice(&row.params);
        params.append(true);
    }

    let mut columns: Vec<ArrayRef> = vec![Arc::new(ids.finish()), Arc::new(orders.finish())];
    columns.extend(metrics.iter_mut().map(|b| Arc::new(b.finish()) as ArrayRef));
    columns.push(Arc::new(params.finish()));
    RecordBatch::try_new(schema.clone(), columns)
}

/// Load every row from a results file.
pub fn read_results(path: impl AsRef<Path>) -> Result<Vec<ModelResultRow>, WriteError> {
    let path = path.as_ref();
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    let layout = |reason: &str| WriteError::Layout {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        if batch.num_columns() != 9 {
            return Err(layout("expected 9 columns"));
        }
        let ids = batch
            .column(0)
            .as_string_opt::<i32>()
            .ok_or_else(|| layout("series_id is not utf8"))?;
        let orders = batch
            .column(1)
            .as_primitive_opt::<UInt32Type>()
            .ok_or_else(|| layout("order is not uint32"))?;
        let mut metrics = Vec::with_capacity(6);
        for idx in 2..8 {
            metrics.push(
                batch
                    .column(idx)
                    .as_primitive_opt::<Float64Type>()
                    .ok_or_else(|| layout("metric is not float64"))?,
            );
        }
        let params = batch
            .column(8)
            .as_list_opt::<i32>()
            .ok_or_else(|| layout("params is not a list"))?;

        for i in 0..batch.num_rows() {
            let values = params.value(i);
            let coeffs = values
                .as_primitive_opt::<Float64Type>()
                .ok_or_else(|| layout("params items are not float64"))?;
            rows.push(ModelResultRow {
                series_id: ids.value(i).to_string(),
                order: orders.value(i),
                mse: metrics[0].value(i),
                maape: metrics[1].value(i),
                aic_mse: metrics[2].value(i),
                aic_maape: metrics[3].value(i),
                bic_mse: metrics[4].value(i),
                bic_maape: metrics[5].value(i),
                params: (0..coeffs.len()).map(|j| coeffs.value(j)).collect(),
            });
        }
    }
    Ok(rows)
}
