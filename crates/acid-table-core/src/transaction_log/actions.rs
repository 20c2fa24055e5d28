//! Log actions and commit payload definitions.
//!
//! Each commit file stores a [`Commit`] containing ordered [`LogAction`]
//! values: adding data files, removing data files, and replacing table
//! metadata. The commit also carries audit information (operation kind,
//! predicate, metrics) surfaced by table history.
use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transaction_log::{
    data_files::{DataFileMeta, RemovedFile},
    schema::LogicalSchema,
    table_metadata::TableMeta,
};

/// Kind of table mutation recorded by a commit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Table creation.
    CreateTable,
    /// Append or overwrite of rows.
    Write,
    /// Predicate delete.
    Delete,
    /// Predicate update.
    Update,
    /// Upsert from a source batch.
    Merge,
    /// Bin-packing compaction.
    Optimize,
    /// Compaction with Z-order clustering.
    ZOrder,
    /// Retention cleanup audit entry.
    Vacuum,
    /// Write that evolved the schema.
    SchemaChange,
    /// Table property change.
    SetProperties,
}

impl Operation {
    /// Whether commits of this kind may change the rows a reader sees.
    pub fn changes_data(self) -> bool {
        !matches!(
            self,
            Operation::Optimize | Operation::ZOrder | Operation::Vacuum | Operation::SetProperties
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::CreateTable => "CREATE TABLE",
            Operation::Write => "WRITE",
            Operation::Delete => "DELETE",
            Operation::Update => "UPDATE",
            Operation::Merge => "MERGE",
            Operation::Optimize => "OPTIMIZE",
            Operation::ZOrder => "ZORDER",
            Operation::Vacuum => "VACUUM",
            Operation::SchemaChange => "SCHEMA_CHANGE",
            Operation::SetProperties => "SET TBLPROPERTIES",
        };
        f.write_str(s)
    }
}

/// An action recorded in a commit.
///
/// Actions are applied in order when replaying the log.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    /// A new data file becomes active.
    AddFile(DataFileMeta),

    /// An active data file is logically deleted.
    RemoveFile(RemovedFile),

    /// Full replacement of the table metadata.
    Metadata(TableMeta),
}

/// Everything a writer supplies for a new commit. The log store assigns the
/// version and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRequest {
    /// Operation kind.
    pub operation: Operation,
    /// Optional audit predicate (WHERE-clause equivalent).
    pub predicate: Option<String>,
    /// Optional operation metrics.
    pub operation_metrics: BTreeMap<String, u64>,
    /// Ordered actions.
    pub actions: Vec<LogAction>,
}

impl CommitRequest {
    /// A request with no predicate and no metrics.
    pub fn new(operation: Operation, actions: Vec<LogAction>) -> Self {
        Self {
            operation,
            predicate: None,
            operation_metrics: BTreeMap::new(),
            actions,
        }
    }
}

/// A single, immutable commit in the log.
///
/// Commits are written to files such as `_acid_log/00000000000000000001.json`.
/// The version field must match the file name; `base_version` records which
/// version the writer validated against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    /// The version number of this commit (contiguous, starting from 0).
    pub version: u64,

    /// The head version the writer appended on top of; `None` for version 0.
    pub base_version: Option<u64>,

    /// Commit creation timestamp, stored as RFC3339 UTC. Strictly increasing
    /// across versions.
    pub timestamp: DateTime<Utc>,

    /// Kind of mutation.
    pub operation: Operation,

    /// Audit predicate, if the operation was scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,

    /// Operation metrics such as rows written or files removed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub operation_metrics: BTreeMap<String, u64>,

    /// Ordered list of actions that describe how table state changes.
    pub actions: Vec<LogAction>,
}

impl Commit {
    /// Files added by this commit.
    pub fn added_files(&self) -> impl Iterator<Item = &DataFileMeta> {
        self.actions.iter().filter_map(|a| match a {
            LogAction::AddFile(f) => Some(f),
            _ => None,
        })
    }

    /// Files removed by this commit.
    pub fn removed_files(&self) -> impl Iterator<Item = &RemovedFile> {
        self.actions.iter().filter_map(|a| match a {
            LogAction::RemoveFile(f) => Some(f),
            _ => None,
        })
    }

    /// Metadata replaced by this commit, if any (the last one wins).
    pub fn metadata(&self) -> Option<&TableMeta> {
        self.actions.iter().rev().find_map(|a| match a {
            LogAction::Metadata(m) => Some(m),
            _ => None,
        })
    }

    /// Schema recorded by this commit; present only on commits that set metadata.
    pub fn schema(&self) -> Option<&LogicalSchema> {
        self.metadata().map(|m| &m.schema)
    }
}
