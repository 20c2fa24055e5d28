//! Parquet data files: encoding rows, computing statistics, decoding rows.
//!
//! Layout rules:
//! - one immutable file per batch of rows within a single partition;
//! - partition columns are not stored in the file, their values live in the
//!   directory name and in [`DataFileMeta::partition_values`];
//! - file names embed a blake3 hash of the content plus a per-write nonce, so
//!   two writers never produce the same path even for identical rows.
//!
//! Readers project each file onto the table schema of the snapshot being
//! read: columns the file predates (schema evolution) read back as NULL.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use chrono::Utc;
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    basic::Compression,
    errors::ParquetError,
    file::properties::WriterProperties,
};
use snafu::{Backtrace, prelude::*};

use crate::{
    rows::{RowBatch, RowBatchError, Value},
    storage::{self, StorageError, TableLocation, layout},
    transaction_log::{
        data_files::{DataFileMeta, compute_column_stats},
        schema::{LogicalField, LogicalSchema},
        table_metadata::TableMeta,
    },
};

/// Errors raised while writing or reading data files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DataFileError {
    /// Encoding a Parquet file failed.
    #[snafu(display("Failed to write Parquet data file {path}: {source}"))]
    ParquetWrite {
        /// Target path.
        path: String,
        /// Underlying Parquet error.
        source: ParquetError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Decoding a Parquet file failed.
    #[snafu(display("Failed to read Parquet data file {path}: {source}"))]
    ParquetRead {
        /// Source path.
        path: String,
        /// Underlying Parquet error.
        source: ParquetError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// Converting between rows and Arrow failed.
    #[snafu(display("Row conversion failed for data file {path}: {source}"))]
    Rows {
        /// File path.
        path: String,
        /// Underlying conversion error.
        source: RowBatchError,
    },

    /// The file content does not match what the log recorded.
    #[snafu(display("Data file {path} is corrupt: {msg}"))]
    Corrupt {
        /// File path.
        path: String,
        /// Description.
        msg: String,
    },

    /// Storage failure.
    #[snafu(display("Storage error on data file: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },
}

/// Result alias for data file operations.
pub type DataFileResult<T> = Result<T, DataFileError>;

static WRITE_NONCE: AtomicU64 = AtomicU64::new(0);

fn file_id(contents: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(contents);
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&WRITE_NONCE.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    hasher.update(&nanos.to_le_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}

/// Schema of the columns physically stored in data files of this table.
pub fn file_schema(meta: &TableMeta) -> LogicalSchema {
    let cols: Vec<LogicalField> = meta
        .schema
        .columns()
        .iter()
        .filter(|c| !meta.is_partition_column(&c.name))
        .cloned()
        .collect();
    // A subset of a valid schema is valid.
    LogicalSchema::new(cols).unwrap_or_else(|_| meta.schema.clone())
}

/// Encode rows into Parquet bytes.
pub fn encode_parquet(batch: &RowBatch, path: &str) -> DataFileResult<Vec<u8>> {
    let record_batch = batch.to_record_batch().context(RowsSnafu { path })?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, record_batch.schema(), Some(props))
        .context(ParquetWriteSnafu { path })?;
    writer
        .write(&record_batch)
        .context(ParquetWriteSnafu { path })?;
    writer.close().context(ParquetWriteSnafu { path })?;
    Ok(buf)
}

/// Decode Parquet bytes into rows, in the file's own schema.
pub fn decode_parquet(data: Bytes, path: &str) -> DataFileResult<RowBatch> {
    ensure!(
        data.len() >= 8,
        CorruptSnafu {
            path,
            msg: "file is shorter than a Parquet footer".to_string(),
        }
    );

    let reader = ParquetRecordBatchReaderBuilder::try_new(data)
        .context(ParquetReadSnafu { path })?
        .build()
        .context(ParquetReadSnafu { path })?;

    let mut out: Option<RowBatch> = None;
    for record_batch in reader {
        let record_batch = record_batch
            .map_err(ParquetError::from)
            .context(ParquetReadSnafu { path })?;
        let rows = RowBatch::from_record_batch(&record_batch).context(RowsSnafu { path })?;
        match out.as_mut() {
            Some(acc) => acc.extend_from(&rows),
            None => out = Some(rows),
        }
    }

    out.context(CorruptSnafu {
        path,
        msg: "file contains no record batches".to_string(),
    })
}

/// Write one data file holding `rows` (laid out per the table schema), all of
/// which share `partition_values`.
pub async fn write_data_file(
    location: &TableLocation,
    meta: &TableMeta,
    partition_values: BTreeMap<String, Value>,
    rows: Vec<Vec<Value>>,
    data_change: bool,
) -> DataFileResult<DataFileMeta> {
    let stored = file_schema(meta);
    let table_batch = RowBatch::from_trusted(meta.schema.clone(), rows);
    let file_batch = table_batch.project_onto(&stored);

    let partition_dirs: Vec<(String, String)> = meta
        .partition_columns
        .iter()
        .map(|c| {
            let v = partition_values.get(c).cloned().unwrap_or(Value::Null);
            (c.clone(), v.to_partition_string())
        })
        .collect();

    let bytes = encode_parquet(&file_batch, "<new data file>")?;
    let rel = layout::data_file_rel_path(&partition_dirs, &file_id(&bytes));
    let rel_str = storage::to_slash(&rel);

    storage::write_new(location, &rel, &bytes)
        .await
        .context(StorageSnafu)?;

    Ok(DataFileMeta {
        path: rel_str,
        size_bytes: bytes.len() as u64,
        row_count: file_batch.num_rows() as u64,
        partition_values,
        stats: compute_column_stats(&file_batch, stored.column_names()),
        modification_time: Utc::now(),
        data_change,
    })
}

/// Group `batch` (laid out per the table schema) by partition values and
/// write one data file per non-empty group, in first-seen order.
pub async fn write_data_files(
    location: &TableLocation,
    meta: &TableMeta,
    batch: &RowBatch,
    data_change: bool,
) -> DataFileResult<Vec<DataFileMeta>> {
    let mut out = Vec::new();
    for (partition_values, rows) in group_by_partition(meta, batch.rows().to_vec()) {
        out.push(write_data_file(location, meta, partition_values, rows, data_change).await?);
    }
    Ok(out)
}

/// Split rows by their partition column values, keeping first-seen order of
/// groups and the original order of rows within each group.
pub fn group_by_partition(
    meta: &TableMeta,
    rows: Vec<Vec<Value>>,
) -> Vec<(BTreeMap<String, Value>, Vec<Vec<Value>>)> {
    let idx: Vec<(String, usize)> = meta
        .partition_columns
        .iter()
        .filter_map(|c| meta.schema.index_of(c).map(|i| (c.clone(), i)))
        .collect();

    let mut groups: Vec<(BTreeMap<String, Value>, Vec<Vec<Value>>)> = Vec::new();
    for row in rows {
        let key: BTreeMap<String, Value> = idx
            .iter()
            .map(|(c, i)| (c.clone(), row[*i].clone()))
            .collect();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, g)) => g.push(row),
            None => groups.push((key, vec![row])),
        }
    }
    groups
}

/// Read a data file and project it onto `schema` (the snapshot's table
/// schema), restoring partition columns from the file's partition values.
pub async fn read_data_file(
    location: &TableLocation,
    file: &DataFileMeta,
    schema: &LogicalSchema,
) -> DataFileResult<RowBatch> {
    let bytes = storage::read_all_bytes(location, Path::new(&file.path))
        .await
        .context(StorageSnafu)?;
    let stored = decode_parquet(Bytes::from(bytes), &file.path)?;

    ensure!(
        stored.num_rows() as u64 == file.row_count,
        CorruptSnafu {
            path: file.path.clone(),
            msg: format!(
                "log records {} rows, file holds {}",
                file.row_count,
                stored.num_rows()
            ),
        }
    );

    let mut projected = stored.project_onto(schema).into_rows();
    for (column, value) in &file.partition_values {
        if let Some(i) = schema.index_of(column) {
            for row in projected.iter_mut() {
                row[i] = value.clone();
            }
        }
    }

    Ok(RowBatch::from_trusted(schema.clone(), projected))
}
