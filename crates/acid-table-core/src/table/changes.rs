//! Append feed: rows added after a version, for consumers tailing a table.
//!
//! A consumer remembers the last version it has seen, asks for the rows
//! appended since, and waits for the next commit. Only commits that add data
//! without removing any contribute rows: deletes, updates, merges and
//! overwrites rewrite existing rows and are skipped, and compaction adds
//! carry `data_change = false`.

use std::time::Duration;

use futures::TryStreamExt;
use log::debug;
use snafu::prelude::*;

use crate::{
    predicate::Predicate,
    scan::{self, RowStream, ScanPlan},
    table::{
        Table,
        error::{TableResult, VersionNotFoundSnafu},
    },
    transaction_log::{Commit, DataFileMeta, LogAction, VersionSpec},
};

fn appended_files(commit: Commit) -> Vec<DataFileMeta> {
    if commit.removed_files().any(|r| r.data_change) {
        debug!(
            "skipping version {} ({}) in append feed: it rewrites existing rows",
            commit.version, commit.operation
        );
        return Vec::new();
    }
    commit
        .actions
        .into_iter()
        .filter_map(|a| match a {
            LogAction::AddFile(f) if f.data_change => Some(f),
            _ => None,
        })
        .collect()
}

impl Table {
    /// Rows appended in `(version, head]`, projected onto the head schema.
    ///
    /// Returns the head the feed was read up to, which is the version to
    /// pass on the next call. Fails with
    /// [`crate::table::TableError::VersionNotFound`] when `version` is past
    /// the head.
    pub async fn changes_since(&self, version: u64) -> TableResult<(u64, RowStream)> {
        let head = self.version().await?;
        ensure!(
            version <= head,
            VersionNotFoundSnafu {
                version,
                head: Some(head),
            }
        );

        let snapshot = self.snapshot(VersionSpec::Version(head)).await?;
        let files: Vec<DataFileMeta> = if version == head {
            Vec::new()
        } else {
            self.log
                .read_commits(version + 1, head)
                .map_ok(appended_files)
                .try_concat()
                .await?
        };
        debug!(
            "append feed of {} over ({version}, {head}] reads {} files",
            self.location,
            files.len()
        );

        let plan = ScanPlan {
            files,
            files_skipped: 0,
        };
        Ok((
            head,
            scan::execute_scan(&self.location, &snapshot, plan, &Predicate::True),
        ))
    }

    /// Wait until a version after `version` is committed, polling the log
    /// head every `poll_interval`.
    ///
    /// Returns the new head, or `None` when `timeout` passes first.
    pub async fn wait_for_commit(
        &self,
        version: u64,
        poll_interval: Duration,
        timeout: Duration,
    ) -> TableResult<Option<u64>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let head = self.version().await?;
            if head > version {
                return Ok(Some(head));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep_until(
                (tokio::time::Instant::now() + poll_interval).min(deadline),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        RowBatch,
        table::{
            TableError, WriteOptions,
            test_util::{TestResult, ids_and_amounts, people_batch, people_table},
        },
    };
    use tempfile::TempDir;

    async fn collect(
        stream: RowStream,
        table: &Table,
    ) -> Result<RowBatch, Box<dyn std::error::Error>> {
        let schema = table.snapshot(VersionSpec::Latest).await?.schema().clone();
        let mut out = RowBatch::empty(schema);
        let batches: Vec<RowBatch> = stream.try_collect().await?;
        for b in &batches {
            out.extend_from(b);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn feed_returns_rows_appended_between_polls() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;

        let (head, rows) = table.changes_since(0).await?;
        assert_eq!(head, 0);
        assert!(collect(rows, &table).await?.is_empty());

        table
            .write(people_batch(&[(1, "CA", 1.0)]), WriteOptions::default())
            .await?;
        table
            .write(people_batch(&[(2, "WA", 2.0)]), WriteOptions::default())
            .await?;

        let (head, rows) = table.changes_since(head).await?;
        assert_eq!(head, 2);
        assert_eq!(
            ids_and_amounts(&collect(rows, &table).await?),
            vec![(1, Some(1.0)), (2, Some(2.0))]
        );

        // Interleaved: the next poll sees only the newer append.
        table
            .write(people_batch(&[(3, "CA", 3.0)]), WriteOptions::default())
            .await?;
        let (head, rows) = table.changes_since(head).await?;
        assert_eq!(head, 3);
        assert_eq!(
            ids_and_amounts(&collect(rows, &table).await?),
            vec![(3, Some(3.0))]
        );
        Ok(())
    }

    #[tokio::test]
    async fn rewrites_and_compaction_add_no_rows_to_the_feed() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        table
            .write(people_batch(&[(1, "CA", 1.0)]), WriteOptions::default())
            .await?;
        table
            .write(people_batch(&[(2, "CA", 2.0)]), WriteOptions::default())
            .await?;
        let seen = table.version().await?;

        table.delete(Predicate::eq("id", 1)).await?;
        table.optimize(Default::default()).await?;
        table
            .write(people_batch(&[(4, "WA", 4.0)]), WriteOptions::default())
            .await?;

        let (_, rows) = table.changes_since(seen).await?;
        assert_eq!(
            ids_and_amounts(&collect(rows, &table).await?),
            vec![(4, Some(4.0))]
        );
        Ok(())
    }

    #[tokio::test]
    async fn feed_past_the_head_is_rejected() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        let err = table
            .changes_since(5)
            .await
            .err()
            .expect("version past head");
        assert!(matches!(
            err,
            TableError::VersionNotFound {
                version: 5,
                head: Some(0)
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn wait_for_commit_sees_a_concurrent_append() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;

        let none = table
            .wait_for_commit(0, Duration::from_millis(5), Duration::from_millis(20))
            .await?;
        assert_eq!(none, None);

        let writer = Table::open(table.location().clone()).await?;
        let append = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .write(people_batch(&[(1, "CA", 1.0)]), WriteOptions::default())
                .await
        });

        let head = table
            .wait_for_commit(0, Duration::from_millis(5), Duration::from_secs(10))
            .await?;
        assert_eq!(head, Some(1));
        append.await??;
        Ok(())
    }
}
