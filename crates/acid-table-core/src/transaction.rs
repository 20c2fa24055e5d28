//! Transaction coordinator: optimistic concurrency control over the log.
//!
//! A [`Transaction`] is opened against a snapshot, records what it reads,
//! stages file additions, removals and metadata, and finally commits:
//!
//! 1. Re-read the log head.
//! 2. If the head is still the read version, append (fast path).
//! 3. Otherwise check every commit in `(read version, head]` for conflicts
//!    (see [`conflict`]). A conflict aborts with
//!    [`TableError::ConcurrentModification`]; otherwise the transaction is
//!    rebased onto the head and the append is retried.
//!
//! Losing the create-once race on the commit file sends the loop back to
//! step 1. The loop is bounded by [`CommitOptions::max_commit_retries`].
//!
//! Nothing is visible before the commit file exists, so dropping a
//! transaction (or calling [`Transaction::abort`]) leaves no trace in the
//! log. Data files it already wrote stay on disk untracked until vacuum
//! reclaims them.

pub mod conflict;

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use log::{debug, info};

use crate::{
    predicate::Predicate,
    scan::{ScanPlan, plan_scan},
    table::error::{ConflictReason, TableError, TableResult},
    transaction_log::{
        Commit, CommitError, CommitRequest, DataFileMeta, LogAction, Operation, RemovedFile,
        TableMeta, TransactionLogStore, snapshot::TableSnapshot,
    },
};

use conflict::ReadSet;

/// Default bound on commit attempts after the first.
pub const DEFAULT_MAX_COMMIT_RETRIES: u32 = 10;

/// Per-commit options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOptions {
    /// How many times to rebase and retry after the head moved.
    pub max_commit_retries: u32,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            max_commit_retries: DEFAULT_MAX_COMMIT_RETRIES,
        }
    }
}

/// An in-flight mutation opened against one snapshot.
#[derive(Debug)]
pub struct Transaction {
    log: TransactionLogStore,
    snapshot: TableSnapshot,
    operation: Operation,
    reads: ReadSet,
    adds: Vec<DataFileMeta>,
    removes: BTreeMap<String, RemovedFile>,
    metadata: Option<TableMeta>,
    predicate: Option<String>,
    metrics: BTreeMap<String, u64>,
    options: CommitOptions,
}

impl Transaction {
    /// Open a transaction on `snapshot`.
    pub fn new(log: TransactionLogStore, snapshot: TableSnapshot, operation: Operation) -> Self {
        Self {
            log,
            snapshot,
            operation,
            reads: ReadSet::default(),
            adds: Vec::new(),
            removes: BTreeMap::new(),
            metadata: None,
            predicate: None,
            metrics: BTreeMap::new(),
            options: CommitOptions::default(),
        }
    }

    /// Replace the commit options.
    pub fn with_options(mut self, options: CommitOptions) -> Self {
        self.options = options;
        self
    }

    /// Version this transaction reads from.
    pub fn read_version(&self) -> u64 {
        self.snapshot.version
    }

    /// The snapshot this transaction reads from.
    pub fn snapshot(&self) -> &TableSnapshot {
        &self.snapshot
    }

    /// Operation recorded on commit.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Change the operation recorded on commit.
    pub fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    /// Plan a read of the rows matching `predicate`, recording the predicate
    /// and the selected files as this transaction's read set.
    pub fn scan(&mut self, predicate: &Predicate) -> ScanPlan {
        let plan = plan_scan(&self.snapshot, predicate);
        self.record_read(predicate, plan.paths());
        plan
    }

    /// Record a read of `files` under `predicate` without planning.
    pub fn record_read<'a>(
        &mut self,
        predicate: &Predicate,
        files: impl IntoIterator<Item = &'a str>,
    ) {
        if predicate.is_true() {
            self.reads.whole_table = true;
        } else {
            self.reads.predicates.push(predicate.clone());
        }
        self.reads.files.extend(files.into_iter().map(str::to_string));
    }

    /// Stage new data files.
    pub fn stage_add(&mut self, files: impl IntoIterator<Item = DataFileMeta>) {
        self.adds.extend(files);
    }

    /// Stage removal of active files.
    ///
    /// The deletion timestamp is replaced by the commit timestamp when the
    /// removal is appended to the log.
    pub fn stage_remove<'a>(
        &mut self,
        files: impl IntoIterator<Item = &'a DataFileMeta>,
        data_change: bool,
    ) {
        let now = Utc::now();
        for f in files {
            self.removes.insert(
                f.path.clone(),
                RemovedFile {
                    path: f.path.clone(),
                    deletion_timestamp: now,
                    data_change,
                },
            );
        }
    }

    /// Stage a full replacement of the table metadata.
    pub fn stage_metadata(&mut self, meta: TableMeta) {
        self.metadata = Some(meta);
    }

    /// Record the audit predicate.
    pub fn set_predicate(&mut self, predicate: impl Into<String>) {
        self.predicate = Some(predicate.into());
    }

    /// Record an operation metric.
    pub fn add_metric(&mut self, name: &str, value: u64) {
        *self.metrics.entry(name.to_string()).or_default() += value;
    }

    /// Staged additions.
    pub fn staged_adds(&self) -> &[DataFileMeta] {
        &self.adds
    }

    /// Whether anything has been staged.
    pub fn has_changes(&self) -> bool {
        !self.adds.is_empty() || !self.removes.is_empty() || self.metadata.is_some()
    }

    /// Discard the transaction. Nothing was appended, so nothing is undone.
    pub fn abort(self) {
        debug!(
            "aborted {} transaction read at version {}",
            self.operation, self.snapshot.version
        );
    }

    /// Validate and append, retrying on benign races.
    ///
    /// Returns the commit as written. Fails with
    /// [`TableError::ConcurrentModification`] on a real conflict or when the
    /// retry budget runs out; the transaction is consumed either way.
    pub async fn commit(self) -> TableResult<Commit> {
        let Transaction {
            log,
            snapshot,
            operation,
            reads,
            adds,
            removes,
            metadata,
            predicate,
            mut metrics,
            options,
        } = self;
        let read_version = snapshot.version;
        let checkpoint_interval = metadata
            .as_ref()
            .map_or(snapshot.config().checkpoint_interval, |m| {
                m.config.checkpoint_interval
            });

        metrics
            .entry("num_added_files".to_string())
            .or_insert(adds.len() as u64);
        metrics
            .entry("num_removed_files".to_string())
            .or_insert(removes.len() as u64);
        let remove_paths: BTreeSet<String> = removes.keys().cloned().collect();

        let mut actions = Vec::with_capacity(adds.len() + removes.len() + 1);
        actions.extend(metadata.map(LogAction::Metadata));
        actions.extend(removes.into_values().map(LogAction::RemoveFile));
        actions.extend(adds.into_iter().map(LogAction::AddFile));
        let request = CommitRequest {
            operation,
            predicate,
            operation_metrics: metrics,
            actions,
        };

        let mut base = read_version;
        let attempts = options.max_commit_retries.saturating_add(1);

        for attempt in 0..attempts {
            let head = log.load_head_version().await?.unwrap_or(base);

            if head > base {
                for version in (base + 1)..=head {
                    let winner = log.load_commit(version).await?;
                    if let Err(reason) = conflict::check_commit(&reads, &remove_paths, &winner) {
                        info!("{operation} read at version {read_version} conflicts: {reason}");
                        return Err(TableError::ConcurrentModification {
                            read_version,
                            reason,
                        });
                    }
                }
                debug!("rebasing {operation} from version {base} onto {head}");
                base = head;
            }

            match log
                .commit_with_expected_version(Some(base), request.clone())
                .await
            {
                Ok(commit) => {
                    log.maybe_checkpoint(commit.version, checkpoint_interval)
                        .await;
                    return Ok(commit);
                }
                Err(CommitError::Conflict { .. }) => {
                    debug!(
                        "lost the race for version {} (attempt {})",
                        base + 1,
                        attempt + 1
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(TableError::ConcurrentModification {
            read_version,
            reason: ConflictReason::RetriesExhausted { attempts },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::test_util::{people_batch, people_table};
    use crate::transaction_log::VersionSpec;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn fast_path_commit_appends_next_version() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        let snapshot = table.snapshot(VersionSpec::Latest).await?;

        let mut tx = Transaction::new(table.log().clone(), snapshot, Operation::Write);
        let files = crate::formats::parquet::write_data_files(
            table.location(),
            &tx.snapshot().table_meta.clone(),
            &people_batch(&[(1, "CA", 10.0)]),
            true,
        )
        .await?;
        tx.stage_add(files);
        let commit = tx.commit().await?;

        assert_eq!(commit.version, 1);
        assert_eq!(commit.base_version, Some(0));
        assert_eq!(commit.operation_metrics["num_added_files"], 1);
        Ok(())
    }

    #[tokio::test]
    async fn non_conflicting_commit_is_rebased() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        let snapshot = table.snapshot(VersionSpec::Latest).await?;

        // Two blind appends opened on the same version.
        let mut a = Transaction::new(table.log().clone(), snapshot.clone(), Operation::Write);
        let mut b = Transaction::new(table.log().clone(), snapshot, Operation::Write);
        let meta = a.snapshot().table_meta.clone();
        a.stage_add(
            crate::formats::parquet::write_data_files(
                table.location(),
                &meta,
                &people_batch(&[(1, "CA", 1.0)]),
                true,
            )
            .await?,
        );
        b.stage_add(
            crate::formats::parquet::write_data_files(
                table.location(),
                &meta,
                &people_batch(&[(2, "WA", 2.0)]),
                true,
            )
            .await?,
        );

        assert_eq!(a.commit().await?.version, 1);
        let rebased = b.commit().await?;
        assert_eq!(rebased.version, 2);
        assert_eq!(rebased.base_version, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn conflicting_commit_fails_with_concurrent_modification() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        table
            .write(people_batch(&[(1, "CA", 1.0)]), Default::default())
            .await?;
        let snapshot = table.snapshot(VersionSpec::Latest).await?;

        let mut a = Transaction::new(table.log().clone(), snapshot.clone(), Operation::Delete);
        let mut b = Transaction::new(table.log().clone(), snapshot, Operation::Delete);
        for tx in [&mut a, &mut b] {
            let plan = tx.scan(&Predicate::eq("id", 1));
            tx.stage_remove(&plan.files, true);
        }

        a.commit().await?;
        let err = b.commit().await.expect_err("must conflict");
        assert!(matches!(
            err,
            TableError::ConcurrentModification {
                read_version: 1,
                reason: ConflictReason::ConcurrentDelete { version: 2, .. }
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn removals_are_stamped_at_commit_time() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        table
            .write(people_batch(&[(1, "CA", 1.0)]), Default::default())
            .await?;
        let snapshot = table.snapshot(VersionSpec::Latest).await?;

        let mut tx = Transaction::new(table.log().clone(), snapshot, Operation::Delete);
        let plan = tx.scan(&Predicate::True);
        tx.stage_remove(&plan.files, true);
        let staged_at = Utc::now();

        // A slow rewrite between staging and committing.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let commit = tx.commit().await?;

        let removed: Vec<_> = commit.removed_files().collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].deletion_timestamp, commit.timestamp);
        assert!(removed[0].deletion_timestamp > staged_at);

        let tombstones = table.snapshot(VersionSpec::Latest).await?.tombstones;
        assert!(
            tombstones
                .values()
                .all(|t| t.deletion_timestamp == commit.timestamp)
        );
        Ok(())
    }

    #[tokio::test]
    async fn abort_leaves_no_trace() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        let snapshot = table.snapshot(VersionSpec::Latest).await?;

        let mut tx = Transaction::new(table.log().clone(), snapshot, Operation::Write);
        tx.set_predicate("true");
        tx.abort();

        assert_eq!(table.log().load_head_version().await?, Some(0));
        Ok(())
    }
}
