//! Write paths: append / overwrite, predicate delete and predicate update.
//!
//! All three follow the same shape:
//! 1. open a transaction on the latest snapshot;
//! 2. read what the operation depends on (nothing for a blind append);
//! 3. write new immutable data files;
//! 4. stage removal of replaced files and addition of the new ones;
//! 5. commit with validation against concurrent commits.
//!
//! Delete and update are copy-on-write: only files holding at least one
//! matching row are rewritten, everything else is left untouched.

use std::collections::BTreeMap;

use log::{debug, warn};
use snafu::prelude::*;

use crate::{
    formats::parquet::{read_data_file, write_data_files},
    maintenance::OptimizeOptions,
    predicate::Predicate,
    rows::{RowBatch, Value},
    table::{
        Table,
        error::{
            InvalidBatchSnafu, InvalidOptionsSnafu, SchemaMismatchSnafu, TableResult,
            UnknownColumnSnafu, unknown_column,
        },
    },
    transaction_log::{
        Operation, TableConfig, VersionSpec,
        schema::{SchemaCheck, check_write_schema},
    },
};

/// How a write combines with existing rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Add rows to the table.
    #[default]
    Append,
    /// Replace every row of the table.
    Overwrite,
}

/// Options for [`Table::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Append or overwrite.
    pub mode: WriteMode,
    /// Allow columns the table does not have; they are added (nullable) to
    /// the schema. Without it such writes fail with a schema mismatch.
    pub schema_evolution: bool,
}

impl WriteOptions {
    /// Overwrite instead of append.
    pub fn overwrite() -> Self {
        Self {
            mode: WriteMode::Overwrite,
            ..Self::default()
        }
    }

    /// Enable schema evolution.
    pub fn with_schema_evolution(mut self) -> Self {
        self.schema_evolution = true;
        self
    }
}

impl Table {
    /// Write a batch of rows, returning the committed version.
    ///
    /// Schema policy: a shared column with a different type always fails;
    /// a nullable table column missing from the batch reads back as NULL;
    /// a batch column the table lacks fails unless
    /// [`WriteOptions::schema_evolution`] is set, in which case the commit is
    /// recorded as a schema change.
    pub async fn write(&self, batch: RowBatch, options: WriteOptions) -> TableResult<u64> {
        let mut tx = self.begin(Operation::Write).await?;
        let mut meta = tx.snapshot().table_meta.clone();

        // 1) Schema enforcement / evolution.
        match check_write_schema(
            &meta.schema,
            batch.schema(),
            &meta.partition_columns,
            options.schema_evolution,
        )
        .context(SchemaMismatchSnafu)?
        {
            SchemaCheck::Compatible => {}
            SchemaCheck::Evolved(schema) => {
                debug!(
                    "evolving schema of {} from {} to {schema}",
                    self.location, meta.schema
                );
                meta.schema = schema;
                tx.set_operation(Operation::SchemaChange);
                tx.stage_metadata(meta.clone());
            }
        }

        // 2) Lay rows out per the table schema; nullability is re-checked
        //    against the table's fields.
        let rows = RowBatch::new(
            meta.schema.clone(),
            batch.project_onto(&meta.schema).into_rows(),
        )
        .context(InvalidBatchSnafu)?;
        rows.check_partition_values(&meta.partition_columns)
            .context(InvalidBatchSnafu)?;

        // 3) Overwrite depends on, and replaces, the whole table.
        if options.mode == WriteMode::Overwrite {
            let plan = tx.scan(&Predicate::True);
            tx.stage_remove(&plan.files, true);
            tx.set_predicate("overwrite");
        }

        // 4) New data files.
        let files = write_data_files(&self.location, &meta, &rows, true).await?;
        tx.add_metric("num_output_rows", rows.num_rows() as u64);
        tx.stage_add(files);

        let commit = tx.commit().await?;

        if meta.config.auto_compact {
            self.maybe_auto_compact(&meta.config).await;
        }
        Ok(commit.version)
    }

    /// Delete rows matching `predicate`, returning the committed version.
    ///
    /// Rows for which the predicate is NULL are kept.
    pub async fn delete(&self, predicate: Predicate) -> TableResult<u64> {
        let mut tx = self.begin(Operation::Delete).await?;
        let meta = tx.snapshot().table_meta.clone();
        predicate
            .validate(&meta.schema)
            .context(UnknownColumnSnafu)?;
        tx.set_predicate(predicate.to_string());

        let plan = tx.scan(&predicate);
        let mut kept_rows = Vec::new();
        let mut deleted = 0u64;
        let mut copied = 0u64;

        for file in &plan.files {
            let batch = read_data_file(&self.location, file, &meta.schema).await?;
            let total = batch.num_rows();
            let kept: Vec<Vec<Value>> = batch
                .into_rows()
                .into_iter()
                .filter(|r| !predicate.matches(&meta.schema, r))
                .collect();
            if kept.len() == total {
                continue;
            }
            deleted += (total - kept.len()) as u64;
            copied += kept.len() as u64;
            tx.stage_remove([file], true);
            kept_rows.extend(kept);
        }

        let rewritten = write_data_files(
            &self.location,
            &meta,
            &RowBatch::from_trusted(meta.schema.clone(), kept_rows),
            true,
        )
        .await?;
        tx.stage_add(rewritten);
        tx.add_metric("num_deleted_rows", deleted);
        tx.add_metric("num_copied_rows", copied);

        Ok(tx.commit().await?.version)
    }

    /// Set `assignments` on rows matching `predicate`, returning the
    /// committed version.
    ///
    /// Updating a partition column moves the row to its new partition.
    pub async fn update(
        &self,
        predicate: Predicate,
        assignments: &BTreeMap<String, Value>,
    ) -> TableResult<u64> {
        let mut tx = self.begin(Operation::Update).await?;
        let meta = tx.snapshot().table_meta.clone();
        predicate
            .validate(&meta.schema)
            .context(UnknownColumnSnafu)?;
        ensure!(
            !assignments.is_empty(),
            InvalidOptionsSnafu {
                msg: "update needs at least one assignment".to_string(),
            }
        );

        let mut targets = Vec::with_capacity(assignments.len());
        for (column, value) in assignments {
            let idx = meta
                .schema
                .index_of(column)
                .ok_or_else(|| unknown_column(column))?;
            targets.push((idx, value.clone()));
        }

        let audit = assignments
            .iter()
            .map(|(c, v)| format!("{c} = {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        tx.set_predicate(format!("SET {audit} WHERE {predicate}"));

        let plan = tx.scan(&predicate);
        let mut out_rows = Vec::new();
        let mut updated = 0u64;
        let mut copied = 0u64;

        for file in &plan.files {
            let batch = read_data_file(&self.location, file, &meta.schema).await?;
            let mut rows = batch.into_rows();
            let mut file_updated = 0u64;
            for row in rows.iter_mut() {
                if predicate.matches(&meta.schema, row) {
                    for (idx, value) in &targets {
                        row[*idx] = value.clone();
                    }
                    file_updated += 1;
                }
            }
            if file_updated == 0 {
                continue;
            }
            updated += file_updated;
            copied += rows.len() as u64 - file_updated;
            tx.stage_remove([file], true);
            out_rows.extend(rows);
        }

        // Validates and coerces the assigned values.
        let out = RowBatch::new(meta.schema.clone(), out_rows).context(InvalidBatchSnafu)?;
        out.check_partition_values(&meta.partition_columns)
            .context(InvalidBatchSnafu)?;
        let rewritten = write_data_files(&self.location, &meta, &out, true).await?;
        tx.stage_add(rewritten);
        tx.add_metric("num_updated_rows", updated);
        tx.add_metric("num_copied_rows", copied);

        Ok(tx.commit().await?.version)
    }

    /// Run a compaction when a write left at least
    /// `auto_compact_min_files` files below the target size. Failures are
    /// logged and never surfaced to the writer.
    async fn maybe_auto_compact(&self, config: &TableConfig) {
        let snapshot = match self.snapshot(VersionSpec::Latest).await {
            Ok(s) => s,
            Err(e) => {
                warn!("auto-compaction skipped, could not load snapshot: {e}");
                return;
            }
        };
        let small = snapshot
            .active_files()
            .filter(|f| f.row_count < config.target_file_rows)
            .count() as u64;
        if small < config.auto_compact_min_files.max(2) {
            return;
        }
        debug!("auto-compacting {} ({small} small files)", self.location);
        if let Err(e) = self.optimize(OptimizeOptions::default()).await {
            warn!("auto-compaction of {} failed: {e}", self.location);
        }
    }
}
