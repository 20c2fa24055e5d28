//! Keyed upserts: MERGE a source batch into the table.
//!
//! Target rows are matched to source rows by equality on the `on` key
//! columns (NULL keys never match). Matched target rows are updated or
//! deleted, unmatched source rows are inserted or ignored. Only files holding
//! a matched row are rewritten.

use std::collections::HashMap;

use snafu::prelude::*;

use crate::{
    formats::parquet::{read_data_file, write_data_files},
    predicate::Predicate,
    rows::{RowBatch, Value},
    table::{
        Table,
        error::{InvalidBatchSnafu, InvalidMergeSnafu, SchemaMismatchSnafu, TableResult},
    },
    transaction_log::{LogicalSchema, Operation, schema::check_write_schema},
};

/// What to do with a target row matched by a source row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchedAction {
    /// Replace every column with the source row's values.
    UpdateAll,
    /// Copy only these columns from the source row.
    UpdateColumns(Vec<String>),
    /// Delete the target row.
    Delete,
}

/// What to do with a source row that matched no target row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotMatchedAction {
    /// Insert the source row.
    InsertAll,
    /// Drop it.
    Ignore,
}

/// Options for [`Table::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Key columns; rows match when all of them are equal.
    pub on: Vec<String>,
    /// Action for matched target rows.
    pub matched: MatchedAction,
    /// Action for unmatched source rows.
    pub not_matched: NotMatchedAction,
}

impl MergeOptions {
    /// Upsert on `on`: update matched rows, insert the rest.
    pub fn upsert<I, S>(on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            on: on.into_iter().map(Into::into).collect(),
            matched: MatchedAction::UpdateAll,
            not_matched: NotMatchedAction::InsertAll,
        }
    }
}

fn key_of(row: &[Value], key_idx: &[usize]) -> Option<Vec<Value>> {
    let key: Vec<Value> = key_idx.iter().map(|i| row[*i].clone()).collect();
    if key.iter().any(Value::is_null) {
        None
    } else {
        Some(key)
    }
}

/// A filter selecting every target row whose key appears in the source.
fn source_key_filter(on: &[String], keys: &HashMap<Vec<Value>, Vec<usize>>) -> Predicate {
    on.iter()
        .enumerate()
        .map(|(pos, column)| {
            let mut values: Vec<Value> = keys.keys().map(|k| k[pos].clone()).collect();
            values.sort_by(Value::sort_cmp);
            values.dedup();
            Predicate::in_list(column.clone(), values)
        })
        .reduce(Predicate::and)
        .unwrap_or_default()
}

fn resolve_columns(schema: &LogicalSchema, columns: &[String]) -> TableResult<Vec<usize>> {
    columns
        .iter()
        .map(|c| {
            schema.index_of(c).context(InvalidMergeSnafu {
                msg: format!("unknown column {c}"),
            })
        })
        .collect()
}

impl Table {
    /// Merge `source` into the table, returning the committed version.
    ///
    /// Fails with [`crate::table::TableError::InvalidMerge`] when the key
    /// columns are missing or when more than one source row matches the
    /// same target row.
    pub async fn merge(&self, source: RowBatch, options: MergeOptions) -> TableResult<u64> {
        let mut tx = self.begin(Operation::Merge).await?;
        let meta = tx.snapshot().table_meta.clone();
        let schema = meta.schema.clone();

        ensure!(
            !options.on.is_empty(),
            InvalidMergeSnafu {
                msg: "merge needs at least one key column".to_string(),
            }
        );
        check_write_schema(&schema, source.schema(), &meta.partition_columns, false)
            .context(SchemaMismatchSnafu)?;
        let source = RowBatch::new(schema.clone(), source.project_onto(&schema).into_rows())
            .context(InvalidBatchSnafu)?;
        source
            .check_partition_values(&meta.partition_columns)
            .context(InvalidBatchSnafu)?;

        let key_idx = resolve_columns(&schema, &options.on)?;
        let update_idx = match &options.matched {
            MatchedAction::UpdateColumns(cols) => resolve_columns(&schema, cols)?,
            _ => Vec::new(),
        };

        let source_rows = source.into_rows();
        let mut keys: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        for (i, row) in source_rows.iter().enumerate() {
            if let Some(k) = key_of(row, &key_idx) {
                keys.entry(k).or_default().push(i);
            }
        }

        tx.set_predicate(format!("ON ({})", options.on.join(", ")));
        let filter = source_key_filter(&options.on, &keys);
        let plan = tx.scan(&filter);

        let mut source_matched = vec![false; source_rows.len()];
        let mut out_rows = Vec::new();
        let (mut updated, mut deleted, mut copied) = (0u64, 0u64, 0u64);

        for file in &plan.files {
            let batch = read_data_file(&self.location, file, &schema).await?;
            let mut rewritten = Vec::with_capacity(batch.num_rows());
            let mut touched = false;

            for mut row in batch.into_rows() {
                let matches = key_of(&row, &key_idx).and_then(|k| keys.get(&k));
                let Some(matches) = matches else {
                    rewritten.push(row);
                    continue;
                };
                ensure!(
                    matches.len() == 1,
                    InvalidMergeSnafu {
                        msg: format!(
                            "{} source rows match the same target row; the merge is ambiguous",
                            matches.len()
                        ),
                    }
                );
                let src = &source_rows[matches[0]];
                source_matched[matches[0]] = true;
                touched = true;

                match &options.matched {
                    MatchedAction::UpdateAll => {
                        updated += 1;
                        rewritten.push(src.clone());
                    }
                    MatchedAction::UpdateColumns(_) => {
                        updated += 1;
                        for i in &update_idx {
                            row[*i] = src[*i].clone();
                        }
                        rewritten.push(row);
                    }
                    MatchedAction::Delete => deleted += 1,
                }
            }

            if touched {
                tx.stage_remove([file], true);
                copied += rewritten.len() as u64;
                out_rows.extend(rewritten);
            }
        }
        copied -= updated;

        let mut inserted = 0u64;
        if options.not_matched == NotMatchedAction::InsertAll {
            for (row, matched) in source_rows.into_iter().zip(source_matched) {
                if !matched {
                    inserted += 1;
                    out_rows.push(row);
                }
            }
        }

        let files = write_data_files(
            &self.location,
            &meta,
            &RowBatch::from_trusted(schema, out_rows),
            true,
        )
        .await?;
        tx.stage_add(files);
        tx.add_metric("num_target_rows_updated", updated);
        tx.add_metric("num_target_rows_deleted", deleted);
        tx.add_metric("num_target_rows_inserted", inserted);
        tx.add_metric("num_target_rows_copied", copied);

        Ok(tx.commit().await?.version)
    }
}
