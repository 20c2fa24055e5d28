//! Append-only commit log and table snapshots.
//!
//! This module implements the metadata layer of `acid-table` and defines the
//! logical model written to and read from the `_acid_log/` directory:
//!
//! - An append-only commit log of JSON files, one per version
//!   (`_acid_log/00000000000000000000.json`, ...). A version is created at
//!   most once; the create-once write is the only mutual-exclusion primitive
//!   between writers.
//! - A `CURRENT` hint naming the latest known version. It is advisory: head
//!   discovery probes for commit files beyond it, so a lost hint update never
//!   hides a commit.
//! - Strongly-typed metadata (`TableMeta`, `LogicalSchema`, `DataFileMeta`)
//!   and the actions (`LogAction`) that evolve it.
//! - [`TableSnapshot`], the state at a version, obtained by folding commits
//!   in order, optionally starting from a periodic checkpoint.
//!
//! ## On-disk layout (high level)
//!
//! ```text
//! table_root/
//!   _acid_log/
//!     CURRENT                                  # latest version hint, e.g. "11\n"
//!     00000000000000000000.json                # commit 0 (CREATE TABLE)
//!     00000000000000000001.json
//!     ...
//!     00000000000000000010.checkpoint.json     # full state at version 10
//!     _last_checkpoint                         # {"version": 10}
//!   data/
//!     part-<id>.parquet
//!     state=CA/part-<id>.parquet               # partitioned tables
//! ```
//!
//! This module knows nothing about rows or predicates; it only persists
//! metadata and provides a safe commit API.
pub mod actions;
pub mod checkpoint;
pub mod data_files;
pub mod log_store;
pub mod schema;
pub mod snapshot;
pub mod table_metadata;

pub use actions::{Commit, CommitRequest, LogAction, Operation};
pub use data_files::{ColumnStats, DataFileMeta, RemovedFile};
pub use log_store::{CommitStream, TransactionLogStore};
pub use schema::{
    LogicalDataType, LogicalField, LogicalSchema, LogicalSchemaError, SchemaCompatibilityError,
};
pub use snapshot::{TableSnapshot, Tombstone, VersionSpec};
pub use table_metadata::{TableConfig, TableMeta};

use chrono::{DateTime, Utc};
use snafu::{Backtrace, prelude::*};

use crate::storage::StorageError;

/// Errors that can occur while reading or writing the commit log.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommitError {
    /// The log head moved away from the version the writer expected.
    ///
    /// This is transient: the writer may re-validate and try again.
    #[snafu(display("Commit conflict: expected head {expected:?}, but found {found:?}"))]
    Conflict {
        /// The head version the caller expected.
        expected: Option<u64>,
        /// The head version actually found.
        found: Option<u64>,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Underlying storage error while working with the log.
    ///
    /// Backtraces are delegated to the inner StorageError.
    #[snafu(display("Storage error while accessing commit log: {source}"))]
    Storage {
        /// Underlying storage error returned by the storage backend.
        #[snafu(backtrace)]
        source: StorageError,
    },

    /// The log is in an unexpected or malformed state.
    #[snafu(display("Corrupt log state: {msg}"))]
    CorruptState {
        /// A description of the corrupt state.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The log has no commits at all.
    #[snafu(display("Commit log is empty"))]
    EmptyLog,

    /// The requested version is beyond the head of the log.
    #[snafu(display("Version {version} does not exist (head is {head:?})"))]
    VersionNotFound {
        /// Requested version.
        version: u64,
        /// Head at the time of the lookup.
        head: Option<u64>,
    },

    /// No commit exists at or before the requested timestamp.
    #[snafu(display("No version committed at or before {timestamp}"))]
    TimestampNotFound {
        /// Requested timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl CommitError {
    /// Whether this is the transient [`CommitError::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, CommitError::Conflict { .. })
    }
}
