//! Data file metadata recorded in the log.
//!
//! Every data file is immutable and referenced by its table-relative path.
//! An [`DataFileMeta`] records what a reader or planner needs without opening
//! the file: size, row count, partition values and per-column statistics.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rows::{RowBatch, Value};

/// Per-column statistics of one data file.
///
/// `min` / `max` are `None` when the column has no comparable non-null value
/// in the file (for example an all-null column).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ColumnStats {
    /// Smallest non-null value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    /// Largest non-null value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    /// Number of null values.
    pub null_count: u64,
}

/// Metadata for an active data file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataFileMeta {
    /// Path relative to the table root, `/`-separated.
    pub path: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Number of rows in the file.
    pub row_count: u64,
    /// Partition column values shared by every row in the file.
    #[serde(default)]
    pub partition_values: BTreeMap<String, Value>,
    /// Statistics for non-partition columns, keyed by column name.
    #[serde(default)]
    pub stats: BTreeMap<String, ColumnStats>,
    /// Time the file was written.
    pub modification_time: DateTime<Utc>,
    /// `false` for rewrites that do not change the table's logical content
    /// (compaction, clustering).
    pub data_change: bool,
}

impl DataFileMeta {
    /// Statistics for `column`, folding partition values in as exact bounds.
    ///
    /// Returns `None` when nothing is known about the column in this file
    /// (for example a column added by schema evolution after the file was
    /// written, which reads back as all nulls).
    pub fn column_stats(&self, column: &str) -> Option<ColumnStats> {
        if let Some(value) = self.partition_values.get(column) {
            return Some(if value.is_null() {
                ColumnStats {
                    min: None,
                    max: None,
                    null_count: self.row_count,
                }
            } else {
                ColumnStats {
                    min: Some(value.clone()),
                    max: Some(value.clone()),
                    null_count: 0,
                }
            });
        }
        self.stats.get(column).cloned()
    }
}

/// A file removal recorded in a commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovedFile {
    /// Path of the removed file.
    pub path: String,
    /// Timestamp of the commit that removed the file; vacuum measures
    /// retention from here.
    pub deletion_timestamp: DateTime<Utc>,
    /// `false` when the removal is part of a content-preserving rewrite.
    pub data_change: bool,
}

/// Compute per-column statistics for the given columns of `batch`.
///
/// NaN floats are left out of min/max since they compare with nothing.
pub fn compute_column_stats<'a>(
    batch: &RowBatch,
    columns: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, ColumnStats> {
    let mut out = BTreeMap::new();
    for name in columns {
        let Some(values) = batch.column(name) else {
            continue;
        };
        let mut stats = ColumnStats::default();
        for v in values {
            if v.is_null() {
                stats.null_count += 1;
                continue;
            }
            if matches!(v, Value::Float64(f) if f.is_nan()) {
                continue;
            }
            let below = stats
                .min
                .as_ref()
                .is_none_or(|m| v.compare(m) == Some(std::cmp::Ordering::Less));
            if below {
                stats.min = Some(v.clone());
            }
            let above = stats
                .max
                .as_ref()
                .is_none_or(|m| v.compare(m) == Some(std::cmp::Ordering::Greater));
            if above {
                stats.max = Some(v.clone());
            }
        }
        out.insert(name.to_string(), stats);
    }
    out
}
