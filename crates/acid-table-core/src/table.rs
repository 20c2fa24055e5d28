//! Table layer: the user-facing handle over one table root.
//!
//! A [`Table`] holds only its location. Every operation resolves a fresh
//! snapshot from the log, so two handles on the same path (in one process or
//! many) always agree on what is committed. Mutations go through
//! [`crate::transaction::Transaction`] and are validated against concurrent
//! commits before they become visible.
//!
//! Submodules:
//! - `write`: append / overwrite, delete and update (copy-on-write);
//! - `merge`: keyed upserts from a source batch;
//! - `changes`: the append feed for consumers tailing the table;
//! - `error`: [`TableError`] and conflict reasons.

mod changes;
pub mod error;
mod merge;
mod write;

#[cfg(test)]
pub(crate) mod test_util;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::info;
use snafu::prelude::*;

pub use merge::{MatchedAction, MergeOptions, NotMatchedAction};
pub use write::{WriteMode, WriteOptions};

use crate::{
    maintenance::{OptimizeMetrics, OptimizeOptions, VacuumMetrics, VacuumOptions},
    predicate::Predicate,
    rows::RowBatch,
    scan::{self, RowStream},
    storage::{self, StorageError, TableLocation},
    transaction::Transaction,
    transaction_log::{
        CommitRequest, LogAction, LogicalSchema, Operation, TableConfig, TableMeta,
        TableSnapshot, TransactionLogStore, VersionSpec, table_metadata::FORMAT_VERSION,
    },
};

use error::{
    AlreadyExistsSnafu, InvalidOptionsSnafu, InvalidPropertySnafu, StorageSnafu,
    TableNotFoundSnafu, UnknownColumnSnafu,
};
pub use error::{ConflictReason, TableError, TableResult};

/// Options for [`Table::create`].
#[derive(Debug, Clone)]
pub struct CreateTableOptions {
    /// Logical schema of the table.
    pub schema: LogicalSchema,
    /// Columns used for partition directories, in order.
    pub partition_columns: Vec<String>,
    /// Initial table configuration.
    pub config: TableConfig,
}

impl CreateTableOptions {
    /// Unpartitioned table with default configuration.
    pub fn new(schema: LogicalSchema) -> Self {
        Self {
            schema,
            partition_columns: Vec::new(),
            config: TableConfig::default(),
        }
    }

    /// Set the partition columns.
    pub fn with_partition_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the table configuration.
    pub fn with_config(mut self, config: TableConfig) -> Self {
        self.config = config;
        self
    }
}

/// Options for [`Table::read`] and [`Table::scan`].
///
/// At most one of `version` and `timestamp` may be set; neither means the
/// latest version.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Read this exact version.
    pub version: Option<u64>,
    /// Read the latest version committed at or before this time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Row filter.
    pub predicate: Predicate,
}

impl ReadOptions {
    /// Read the latest version filtered by `predicate`.
    pub fn filtered(predicate: Predicate) -> Self {
        Self {
            predicate,
            ..Self::default()
        }
    }

    /// Read an exact version.
    pub fn at_version(version: u64) -> Self {
        Self {
            version: Some(version),
            ..Self::default()
        }
    }

    /// Read as of a point in time.
    pub fn at_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    fn version_spec(&self) -> TableResult<VersionSpec> {
        match (self.version, self.timestamp) {
            (None, None) => Ok(VersionSpec::Latest),
            (Some(v), None) => Ok(VersionSpec::Version(v)),
            (None, Some(t)) => Ok(VersionSpec::Timestamp(t)),
            (Some(_), Some(_)) => InvalidOptionsSnafu {
                msg: "specify either a version or a timestamp, not both".to_string(),
            }
            .fail(),
        }
    }
}

/// One entry of [`Table::history`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    /// Commit version.
    pub version: u64,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Operation kind.
    pub operation: Operation,
    /// Audit predicate.
    pub predicate: Option<String>,
    /// Version the writer validated against.
    pub read_version: Option<u64>,
    /// Operation metrics.
    pub operation_metrics: BTreeMap<String, u64>,
    /// Files added by the commit.
    pub files_added: usize,
    /// Files removed by the commit.
    pub files_removed: usize,
}

/// Result of [`Table::detail`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableDetail {
    /// Table location.
    pub location: String,
    /// Latest version.
    pub version: u64,
    /// Time of the latest commit.
    pub last_modified: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// On-disk format version.
    pub format_version: u32,
    /// Current schema.
    pub schema: LogicalSchema,
    /// Partition columns.
    pub partition_columns: Vec<String>,
    /// Table properties.
    pub properties: BTreeMap<String, String>,
    /// Number of active data files.
    pub num_files: usize,
    /// Total size of active data files.
    pub size_bytes: u64,
    /// Total rows across active data files.
    pub num_rows: u64,
}

/// Handle on a table root.
#[derive(Debug, Clone)]
pub struct Table {
    location: TableLocation,
    log: TransactionLogStore,
}

impl Table {
    fn at(location: TableLocation) -> Self {
        let log = TransactionLogStore::new(location.clone());
        Self { location, log }
    }

    /// Create a new table at `location`, committing version 0.
    ///
    /// Fails with [`TableError::AlreadyExists`] when the location already
    /// holds commits.
    pub async fn create(
        location: TableLocation,
        options: CreateTableOptions,
    ) -> TableResult<Self> {
        let table = Self::at(location);

        for column in &options.partition_columns {
            if options.schema.field(column).is_none() {
                return Err(error::unknown_column(column));
            }
        }
        ensure!(
            options.partition_columns.len() < options.schema.len(),
            InvalidOptionsSnafu {
                msg: "at least one column must not be a partition column".to_string(),
            }
        );

        if let Some(current_version) = table.log.load_head_version().await? {
            return AlreadyExistsSnafu {
                location: table.location.to_string(),
                current_version,
            }
            .fail();
        }

        let meta = TableMeta {
            schema: options.schema,
            partition_columns: options.partition_columns,
            config: options.config,
            created_at: Utc::now(),
            format_version: FORMAT_VERSION,
        };

        let commit = table
            .log
            .commit_with_expected_version(
                None,
                CommitRequest::new(Operation::CreateTable, vec![LogAction::Metadata(meta)]),
            )
            .await?;

        info!("created table at {} (version {})", table.location, commit.version);
        Ok(table)
    }

    /// Open an existing table.
    pub async fn open(location: TableLocation) -> TableResult<Self> {
        match storage::ensure_root_exists(&location).await {
            Ok(()) => {}
            Err(StorageError::NotFound { .. }) => {
                return TableNotFoundSnafu {
                    location: location.to_string(),
                }
                .fail();
            }
            Err(source) => return Err(source).context(StorageSnafu),
        }

        let table = Self::at(location);
        ensure!(
            table.log.load_head_version().await?.is_some(),
            TableNotFoundSnafu {
                location: table.location.to_string(),
            }
        );
        Ok(table)
    }

    /// Table location.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    /// The commit log of this table.
    pub fn log(&self) -> &TransactionLogStore {
        &self.log
    }

    /// Latest committed version.
    pub async fn version(&self) -> TableResult<u64> {
        self.log
            .load_head_version()
            .await?
            .context(TableNotFoundSnafu {
                location: self.location.to_string(),
            })
    }

    /// Snapshot of the table at `spec`.
    pub async fn snapshot(&self, spec: VersionSpec) -> TableResult<TableSnapshot> {
        Ok(self.log.snapshot_at(spec).await?)
    }

    /// Begin a transaction on the latest snapshot.
    pub async fn begin(&self, operation: Operation) -> TableResult<Transaction> {
        let snapshot = self.snapshot(VersionSpec::Latest).await?;
        Ok(Transaction::new(self.log.clone(), snapshot, operation))
    }

    async fn snapshot_for_read(&self, options: &ReadOptions) -> TableResult<TableSnapshot> {
        let snapshot = self.snapshot(options.version_spec()?).await?;
        options
            .predicate
            .validate(snapshot.schema())
            .context(UnknownColumnSnafu)?;
        Ok(snapshot)
    }

    /// Read all rows matching the options into one batch.
    pub async fn read(&self, options: ReadOptions) -> TableResult<RowBatch> {
        let snapshot = self.snapshot_for_read(&options).await?;
        Ok(scan::scan_to_batch(&self.location, &snapshot, &options.predicate).await?)
    }

    /// Lazily stream matching rows, one batch per data file.
    pub async fn scan(&self, options: ReadOptions) -> TableResult<RowStream> {
        let snapshot = self.snapshot_for_read(&options).await?;
        let plan = scan::plan_scan(&snapshot, &options.predicate);
        Ok(scan::execute_scan(
            &self.location,
            &snapshot,
            plan,
            &options.predicate,
        ))
    }

    /// Commit history, newest first.
    pub async fn history(&self) -> TableResult<Vec<CommitSummary>> {
        let head = self.version().await?;
        let mut out: Vec<CommitSummary> = self
            .log
            .read_commits(0, head)
            .map_ok(|c| CommitSummary {
                version: c.version,
                timestamp: c.timestamp,
                operation: c.operation,
                predicate: c.predicate.clone(),
                read_version: c.base_version,
                files_added: c.added_files().count(),
                files_removed: c.removed_files().count(),
                operation_metrics: c.operation_metrics,
            })
            .try_collect()
            .await?;
        out.reverse();
        Ok(out)
    }

    /// Describe the latest version of the table.
    pub async fn detail(&self) -> TableResult<TableDetail> {
        let snapshot = self.snapshot(VersionSpec::Latest).await?;
        Ok(TableDetail {
            location: self.location.to_string(),
            version: snapshot.version,
            last_modified: snapshot.timestamp,
            created_at: snapshot.table_meta.created_at,
            format_version: snapshot.table_meta.format_version,
            schema: snapshot.schema().clone(),
            partition_columns: snapshot.partition_columns().to_vec(),
            properties: snapshot.config().to_properties(),
            num_files: snapshot.files.len(),
            size_bytes: snapshot.total_bytes(),
            num_rows: snapshot.total_rows(),
        })
    }

    /// Change table properties, returning the new version.
    pub async fn set_properties(&self, properties: &BTreeMap<String, String>) -> TableResult<u64> {
        let mut tx = self.begin(Operation::SetProperties).await?;
        let mut meta = tx.snapshot().table_meta.clone();
        for (key, value) in properties {
            meta.config
                .apply_property(key, value)
                .context(InvalidPropertySnafu)?;
        }
        tx.set_predicate(
            properties
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", "),
        );
        tx.stage_metadata(meta);
        Ok(tx.commit().await?.version)
    }

    /// Compact small files, optionally clustering by Z-order.
    pub async fn optimize(&self, options: OptimizeOptions) -> TableResult<OptimizeMetrics> {
        crate::maintenance::optimize(self, options).await
    }

    /// Delete files no longer referenced by any version inside the
    /// retention window.
    pub async fn vacuum(&self, options: VacuumOptions) -> TableResult<VacuumMetrics> {
        crate::maintenance::vacuum(self, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::Value;
    use test_util::{people_batch, people_schema, people_table};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn create_then_open_sees_version_zero() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        assert_eq!(table.version().await?, 0);

        let reopened = Table::open(TableLocation::local(tmp.path())).await?;
        let detail = reopened.detail().await?;
        assert_eq!(detail.version, 0);
        assert_eq!(detail.num_files, 0);
        assert_eq!(detail.partition_columns, vec!["addr_state".to_string()]);
        assert_eq!(detail.properties["checkpoint_interval"], "10");
        Ok(())
    }

    #[tokio::test]
    async fn create_twice_fails() -> TestResult {
        let tmp = TempDir::new()?;
        people_table(&tmp).await?;
        let err = Table::create(
            TableLocation::local(tmp.path()),
            CreateTableOptions::new(people_schema()),
        )
        .await
        .expect_err("second create must fail");
        assert!(matches!(
            err,
            TableError::AlreadyExists {
                current_version: 0,
                ..
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn open_missing_table_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let err = Table::open(TableLocation::local(tmp.path().join("nope")))
            .await
            .expect_err("no table");
        assert!(matches!(err, TableError::TableNotFound { .. }));

        let err = Table::open(TableLocation::local(tmp.path()))
            .await
            .expect_err("empty dir");
        assert!(matches!(err, TableError::TableNotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn create_rejects_unknown_partition_column() -> TestResult {
        let tmp = TempDir::new()?;
        let err = Table::create(
            TableLocation::local(tmp.path()),
            CreateTableOptions::new(people_schema()).with_partition_columns(["zip"]),
        )
        .await
        .expect_err("unknown partition column");
        assert!(matches!(err, TableError::UnknownColumn { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn read_rejects_version_and_timestamp_together() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        let options = ReadOptions {
            version: Some(0),
            timestamp: Some(Utc::now()),
            predicate: Predicate::True,
        };
        let err = table.read(options).await.expect_err("ambiguous");
        assert!(matches!(err, TableError::InvalidOptions { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn read_beyond_head_is_version_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        let err = table
            .read(ReadOptions::at_version(3))
            .await
            .expect_err("beyond head");
        assert!(matches!(
            err,
            TableError::VersionNotFound {
                version: 3,
                head: Some(0)
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn history_is_newest_first() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        table
            .write(people_batch(&[(1, "CA", 1.0)]), WriteOptions::default())
            .await?;
        table.delete(Predicate::eq("id", 1)).await?;

        let history = table.history().await?;
        let ops: Vec<Operation> = history.iter().map(|h| h.operation).collect();
        assert_eq!(
            ops,
            vec![Operation::Delete, Operation::Write, Operation::CreateTable]
        );
        assert_eq!(history[0].predicate.as_deref(), Some("id = 1"));
        assert_eq!(history[0].files_removed, 1);
        assert_eq!(history[1].read_version, Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn set_properties_changes_config() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        let version = table
            .set_properties(&BTreeMap::from([(
                "auto_compact".to_string(),
                "true".to_string(),
            )]))
            .await?;
        assert_eq!(version, 1);
        assert!(table.snapshot(VersionSpec::Latest).await?.config().auto_compact);

        let err = table
            .set_properties(&BTreeMap::from([("bogus".to_string(), "1".to_string())]))
            .await
            .expect_err("unknown property");
        assert!(matches!(err, TableError::InvalidProperty { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn read_unknown_predicate_column_fails() -> TestResult {
        let tmp = TempDir::new()?;
        let table = people_table(&tmp).await?;
        let err = table
            .read(ReadOptions::filtered(Predicate::eq("nope", Value::Null)))
            .await
            .expect_err("unknown column");
        assert!(matches!(err, TableError::UnknownColumn { .. }));
        Ok(())
    }
}
