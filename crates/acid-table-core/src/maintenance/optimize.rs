//! OPTIMIZE: bin-packing compaction, optionally with Z-order clustering.
//!
//! Work is done per partition. Without Z-order columns only files below the
//! target row count are candidates, and a partition with fewer than two
//! candidates is left alone. With Z-order columns every file of the
//! partition is rewritten so the whole partition follows the curve.

use std::collections::BTreeMap;

use log::info;
use snafu::prelude::*;

use crate::{
    formats::parquet::{read_data_file, write_data_file},
    maintenance::zorder::zorder_sort,
    rows::Value,
    table::{
        Table,
        error::{InvalidOptionsSnafu, TableResult, unknown_column},
    },
    transaction_log::{DataFileMeta, Operation},
};

/// Options for [`optimize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeOptions {
    /// Cluster rows by these columns along a Z-order curve.
    pub zorder_by: Vec<String>,
    /// Rows per output file; defaults to the table's `target_file_rows`.
    pub target_file_rows: Option<u64>,
}

impl OptimizeOptions {
    /// Z-order by `columns`.
    pub fn zorder<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            zorder_by: columns.into_iter().map(Into::into).collect(),
            target_file_rows: None,
        }
    }
}

/// Outcome of [`optimize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeMetrics {
    /// Committed version; `None` when nothing needed rewriting.
    pub version: Option<u64>,
    /// Files written.
    pub files_added: u64,
    /// Files replaced.
    pub files_removed: u64,
    /// Partitions that were rewritten.
    pub partitions_optimized: u64,
    /// Rows moved into new files.
    pub rows_rewritten: u64,
}

struct PartitionGroup<'a> {
    values: BTreeMap<String, Value>,
    files: Vec<&'a DataFileMeta>,
}

/// Compact the latest snapshot of `table`.
pub async fn optimize(table: &Table, options: OptimizeOptions) -> TableResult<OptimizeMetrics> {
    let operation = if options.zorder_by.is_empty() {
        Operation::Optimize
    } else {
        Operation::ZOrder
    };
    let mut tx = table.begin(operation).await?;
    let snapshot = tx.snapshot().clone();
    let meta = &snapshot.table_meta;

    let mut zorder_idx = Vec::with_capacity(options.zorder_by.len());
    for column in &options.zorder_by {
        let idx = meta
            .schema
            .index_of(column)
            .ok_or_else(|| unknown_column(column))?;
        ensure!(
            !meta.is_partition_column(column),
            InvalidOptionsSnafu {
                msg: format!("cannot Z-order by partition column {column}"),
            }
        );
        zorder_idx.push(idx);
    }

    let target = options
        .target_file_rows
        .unwrap_or(meta.config.target_file_rows)
        .max(1);

    // 1) Group files by partition, keyed by rendered partition values.
    let mut groups: BTreeMap<Vec<String>, PartitionGroup<'_>> = BTreeMap::new();
    for file in snapshot.active_files() {
        let key = meta
            .partition_columns
            .iter()
            .map(|c| {
                file.partition_values
                    .get(c)
                    .unwrap_or(&Value::Null)
                    .to_partition_string()
            })
            .collect();
        groups
            .entry(key)
            .or_insert_with(|| PartitionGroup {
                values: file.partition_values.clone(),
                files: Vec::new(),
            })
            .files
            .push(file);
    }

    // 2) Select and rewrite.
    let mut metrics = OptimizeMetrics::default();
    for group in groups.into_values() {
        let candidates: Vec<&DataFileMeta> = if zorder_idx.is_empty() {
            group
                .files
                .into_iter()
                .filter(|f| f.row_count < target)
                .collect()
        } else {
            group.files
        };
        if candidates.is_empty() || (zorder_idx.is_empty() && candidates.len() < 2) {
            continue;
        }

        let mut rows = Vec::new();
        for file in &candidates {
            rows.extend(
                read_data_file(table.location(), file, &meta.schema)
                    .await?
                    .into_rows(),
            );
        }
        if !zorder_idx.is_empty() {
            rows = zorder_sort(rows, &zorder_idx);
        }

        metrics.rows_rewritten += rows.len() as u64;
        metrics.files_removed += candidates.len() as u64;
        metrics.partitions_optimized += 1;

        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            let chunk: Vec<Vec<Value>> = rows.by_ref().take(target as usize).collect();
            let file =
                write_data_file(table.location(), meta, group.values.clone(), chunk, false).await?;
            metrics.files_added += 1;
            tx.stage_add([file]);
        }
        tx.stage_remove(candidates, false);
    }

    if metrics.files_removed == 0 {
        tx.abort();
        return Ok(metrics);
    }

    if !options.zorder_by.is_empty() {
        tx.set_predicate(format!("ZORDER BY ({})", options.zorder_by.join(", ")));
    }
    tx.add_metric("num_removed_files", metrics.files_removed);
    tx.add_metric("num_added_files", metrics.files_added);
    tx.add_metric("num_rows_rewritten", metrics.rows_rewritten);
    let commit = tx.commit().await?;

    info!(
        "{operation} of {} at version {}: {} files -> {} files",
        table.location(),
        commit.version,
        metrics.files_removed,
        metrics.files_added
    );
    metrics.version = Some(commit.version);
    Ok(metrics)
}
