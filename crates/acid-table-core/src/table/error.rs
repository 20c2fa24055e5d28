//! Error types and SNAFU context selectors for the table API.
//!
//! This module centralizes the `TableError` enum returned by every public
//! table operation and exposes context selectors (via
//! `#[snafu(visibility(pub(crate)))]`) so sibling modules can attach context
//! without re-exporting everything at the crate root.

use std::fmt;

use chrono::{DateTime, Utc};
use snafu::prelude::*;

use crate::{
    formats::parquet::DataFileError,
    predicate::UnknownColumnError,
    rows::RowBatchError,
    storage::StorageError,
    transaction_log::{
        CommitError, SchemaCompatibilityError,
        table_metadata::TablePropertyError,
    },
};

/// Why a transaction could not be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// A concurrent commit removed a file this transaction read or removes.
    ConcurrentDelete {
        /// Path of the file.
        path: String,
        /// Version of the conflicting commit.
        version: u64,
    },
    /// A concurrent commit added data this transaction's reads would have seen.
    ConcurrentAppend {
        /// Path of the added file.
        path: String,
        /// Version of the conflicting commit.
        version: u64,
    },
    /// A concurrent commit changed the table metadata (schema or properties).
    MetadataChanged {
        /// Version of the conflicting commit.
        version: u64,
    },
    /// The head kept moving and the retry budget ran out.
    RetriesExhausted {
        /// Number of append attempts made.
        attempts: u32,
    },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::ConcurrentDelete { path, version } => {
                write!(f, "file {path} was removed by concurrent version {version}")
            }
            ConflictReason::ConcurrentAppend { path, version } => write!(
                f,
                "concurrent version {version} added {path}, which matches this transaction's reads"
            ),
            ConflictReason::MetadataChanged { version } => {
                write!(f, "table metadata changed in concurrent version {version}")
            }
            ConflictReason::RetriesExhausted { attempts } => {
                write!(f, "gave up after {attempts} commit attempts")
            }
        }
    }
}

/// Errors from high-level table operations.
///
/// Each variant carries enough context for callers to surface actionable
/// messages or decide whether to re-read and retry.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// Any error coming from the commit log (storage failures, corrupt commits).
    #[snafu(display("Transaction log error: {source}"))]
    TransactionLog {
        /// Underlying commit log error.
        #[snafu(source, backtrace)]
        source: CommitError,
    },

    /// A validated conflict with a concurrent commit. The transaction is
    /// discarded; the caller must re-read and retry at a higher level.
    #[snafu(display(
        "Concurrent modification of transaction read at version {read_version}: {reason}"
    ))]
    ConcurrentModification {
        /// Version the transaction was opened against.
        read_version: u64,
        /// What conflicted.
        reason: ConflictReason,
    },

    /// The written rows do not fit the table schema under the requested policy.
    #[snafu(display("Schema mismatch: {source}"))]
    SchemaMismatch {
        /// Underlying compatibility error.
        source: SchemaCompatibilityError,
    },

    /// The table path holds no commits.
    #[snafu(display("No table found at {location}"))]
    TableNotFound {
        /// Table location.
        location: String,
    },

    /// The requested version does not exist.
    #[snafu(display("Version {version} not found (latest is {head:?})"))]
    VersionNotFound {
        /// Requested version.
        version: u64,
        /// Latest version.
        head: Option<u64>,
    },

    /// No version was committed at or before the requested time.
    #[snafu(display("No version committed at or before {timestamp}"))]
    TimestampNotFound {
        /// Requested timestamp.
        timestamp: DateTime<Utc>,
    },

    /// Attempt to create a table where commits already exist.
    #[snafu(display("Table already exists at {location} (latest version {current_version})"))]
    AlreadyExists {
        /// Table location.
        location: String,
        /// Latest version found.
        current_version: u64,
    },

    /// Storage error while accessing table data.
    #[snafu(display("Storage error while accessing table data: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// Writing or reading a data file failed.
    #[snafu(display("Data file error: {source}"))]
    DataFile {
        /// Underlying data file error.
        #[snafu(source, backtrace)]
        source: DataFileError,
    },

    /// Rows supplied by the caller are malformed.
    #[snafu(display("Invalid rows: {source}"))]
    InvalidBatch {
        /// Underlying row error.
        source: RowBatchError,
    },

    /// A predicate or option named a column the table does not have.
    #[snafu(display("{source}"))]
    UnknownColumn {
        /// Underlying error.
        source: UnknownColumnError,
    },

    /// A table property could not be applied.
    #[snafu(display("Invalid table property: {source}"))]
    InvalidProperty {
        /// Underlying property error.
        source: TablePropertyError,
    },

    /// The merge request is malformed or ambiguous.
    #[snafu(display("Invalid merge: {msg}"))]
    InvalidMerge {
        /// Description.
        msg: String,
    },

    /// Vacuum retention is below the table's minimum while the check is enforced.
    #[snafu(display(
        "Vacuum retention of {requested_hours}h is shorter than the table minimum of \
         {minimum_hours}h; readers of older snapshots may lose files. Disable \
         enforce_retention_duration to proceed anyway"
    ))]
    RetentionTooShort {
        /// Requested retention.
        requested_hours: u64,
        /// Minimum allowed retention.
        minimum_hours: u64,
    },

    /// Options passed to an operation are inconsistent.
    #[snafu(display("Invalid options: {msg}"))]
    InvalidOptions {
        /// Description.
        msg: String,
    },
}

impl From<CommitError> for TableError {
    fn from(source: CommitError) -> Self {
        match source {
            CommitError::VersionNotFound { version, head } => {
                TableError::VersionNotFound { version, head }
            }
            CommitError::TimestampNotFound { timestamp } => {
                TableError::TimestampNotFound { timestamp }
            }
            source => TableError::TransactionLog { source },
        }
    }
}

impl From<DataFileError> for TableError {
    fn from(source: DataFileError) -> Self {
        TableError::DataFile { source }
    }
}

/// [`TableError::UnknownColumn`] for `column`.
pub(crate) fn unknown_column(column: &str) -> TableError {
    TableError::UnknownColumn {
        source: UnknownColumnError {
            column: column.to_string(),
        },
    }
}

impl TableError {
    /// Whether this is a validated [`TableError::ConcurrentModification`].
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, TableError::ConcurrentModification { .. })
    }
}

/// Result alias for table operations.
pub type TableResult<T> = Result<T, TableError>;
