//! Reconstructing table state at a version by replaying log commits.
//!
//! A [`TableSnapshot`] is the left fold of commits `0..=version`. It is
//! derived on demand and never mutated after construction. Replay may start
//! from a checkpoint (see [`super::checkpoint`]) to bound its cost, but a
//! replay from version 0 always produces the same snapshot.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::transaction_log::{
    CommitError, CorruptStateSnafu, EmptyLogSnafu, TimestampNotFoundSnafu, TransactionLogStore,
    VersionNotFoundSnafu,
    actions::{Commit, LogAction},
    data_files::DataFileMeta,
    schema::LogicalSchema,
    table_metadata::{TableConfig, TableMeta},
};

/// Which version of the table to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionSpec {
    /// The head of the log.
    #[default]
    Latest,
    /// An exact version.
    Version(u64),
    /// The latest version committed at or before this time.
    Timestamp(DateTime<Utc>),
}

/// Bookkeeping for a logically deleted file still present on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tombstone {
    /// Version whose commit removed the file.
    pub removed_in_version: u64,
    /// Deletion time recorded by the removing commit.
    pub deletion_timestamp: DateTime<Utc>,
    /// Whether the removal changed the table's content.
    pub data_change: bool,
}

/// Point-in-time view of the table.
///
/// Invariant: `table_meta`, `files` and `tombstones` are the result of
/// applying commits `0..=version` in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSnapshot {
    /// Version this snapshot reflects.
    pub version: u64,
    /// Commit timestamp of `version`.
    pub timestamp: DateTime<Utc>,
    /// Table-level metadata as of `version`.
    pub table_meta: TableMeta,
    /// Active data files keyed by path.
    pub files: BTreeMap<String, DataFileMeta>,
    /// Removed files keyed by path, for retention bookkeeping.
    pub tombstones: BTreeMap<String, Tombstone>,
}

impl TableSnapshot {
    /// Schema as of this snapshot.
    pub fn schema(&self) -> &LogicalSchema {
        &self.table_meta.schema
    }

    /// Table configuration as of this snapshot.
    pub fn config(&self) -> &TableConfig {
        &self.table_meta.config
    }

    /// Partition columns.
    pub fn partition_columns(&self) -> &[String] {
        &self.table_meta.partition_columns
    }

    /// Active files in path order.
    pub fn active_files(&self) -> impl Iterator<Item = &DataFileMeta> {
        self.files.values()
    }

    /// Total rows across active files.
    pub fn total_rows(&self) -> u64 {
        self.files.values().map(|f| f.row_count).sum()
    }

    /// Total bytes across active files.
    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|f| f.size_bytes).sum()
    }
}

/// Incremental fold of commits into a [`TableSnapshot`].
#[derive(Debug, Default)]
pub(crate) struct SnapshotBuilder {
    version: Option<u64>,
    timestamp: Option<DateTime<Utc>>,
    table_meta: Option<TableMeta>,
    files: BTreeMap<String, DataFileMeta>,
    tombstones: BTreeMap<String, Tombstone>,
}

impl SnapshotBuilder {
    pub(crate) fn from_snapshot(snapshot: TableSnapshot) -> Self {
        Self {
            version: Some(snapshot.version),
            timestamp: Some(snapshot.timestamp),
            table_meta: Some(snapshot.table_meta),
            files: snapshot.files,
            tombstones: snapshot.tombstones,
        }
    }

    pub(crate) fn apply(&mut self, commit: Commit) -> Result<(), CommitError> {
        let expected = self.version.map_or(0, |v| v + 1);
        ensure!(
            commit.version == expected,
            CorruptStateSnafu {
                msg: format!(
                    "log is not contiguous: expected version {expected}, found {}",
                    commit.version
                ),
            }
        );

        for action in commit.actions {
            match action {
                LogAction::AddFile(meta) => {
                    self.tombstones.remove(&meta.path);
                    self.files.insert(meta.path.clone(), meta);
                }
                LogAction::RemoveFile(removed) => {
                    self.files.remove(&removed.path);
                    self.tombstones.insert(
                        removed.path,
                        Tombstone {
                            removed_in_version: commit.version,
                            deletion_timestamp: removed.deletion_timestamp,
                            data_change: removed.data_change,
                        },
                    );
                }
                LogAction::Metadata(meta) => {
                    // Full replacement; the last one wins.
                    self.table_meta = Some(meta);
                }
            }
        }

        self.version = Some(commit.version);
        self.timestamp = Some(commit.timestamp);
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<TableSnapshot, CommitError> {
        let (Some(version), Some(timestamp)) = (self.version, self.timestamp) else {
            return EmptyLogSnafu.fail();
        };
        let table_meta = self.table_meta.context(CorruptStateSnafu {
            msg: format!("no table metadata found in commits up to version {version}"),
        })?;

        Ok(TableSnapshot {
            version,
            timestamp,
            table_meta,
            files: self.files,
            tombstones: self.tombstones,
        })
    }
}

impl TransactionLogStore {
    /// Resolve a [`VersionSpec`] to a concrete committed version.
    pub async fn resolve_version(&self, spec: VersionSpec) -> Result<u64, CommitError> {
        let head = self.load_head_version().await?;
        match spec {
            VersionSpec::Latest => head.context(EmptyLogSnafu),
            VersionSpec::Version(version) => match head {
                Some(h) if version <= h => Ok(version),
                _ => VersionNotFoundSnafu { version, head }.fail(),
            },
            VersionSpec::Timestamp(timestamp) => self
                .version_at_or_before(timestamp)
                .await?
                .context(TimestampNotFoundSnafu { timestamp }),
        }
    }

    /// Build the snapshot for `spec`, starting from the nearest checkpoint.
    pub async fn snapshot_at(&self, spec: VersionSpec) -> Result<TableSnapshot, CommitError> {
        let version = self.resolve_version(spec).await?;
        self.build_snapshot(version).await
    }

    /// Build the snapshot for an existing `version`, starting from the latest
    /// usable checkpoint at or before it.
    pub async fn build_snapshot(&self, version: u64) -> Result<TableSnapshot, CommitError> {
        let mut builder = SnapshotBuilder::default();

        if let Some(cp_version) = self.latest_checkpoint_at_or_before(version).await {
            match self.load_checkpoint(cp_version).await {
                Ok(cp) => {
                    debug!("replaying from checkpoint {cp_version} to version {version}");
                    builder = SnapshotBuilder::from_snapshot(cp);
                }
                Err(e) => {
                    warn!("ignoring unreadable checkpoint {cp_version}, replaying from 0: {e}");
                }
            }
        }

        let from = builder.version.map_or(0, |v| v + 1);
        self.replay_into(&mut builder, from, version).await?;
        builder.finish()
    }

    /// Build the snapshot for `version` from commit 0, ignoring checkpoints.
    pub async fn replay_from_scratch(&self, version: u64) -> Result<TableSnapshot, CommitError> {
        let mut builder = SnapshotBuilder::default();
        self.replay_into(&mut builder, 0, version).await?;
        builder.finish()
    }

    async fn replay_into(
        &self,
        builder: &mut SnapshotBuilder,
        from: u64,
        to: u64,
    ) -> Result<(), CommitError> {
        let mut commits = self.read_commits(from, to);
        while let Some(commit) = commits.try_next().await? {
            builder.apply(commit)?;
        }
        Ok(())
    }
}
