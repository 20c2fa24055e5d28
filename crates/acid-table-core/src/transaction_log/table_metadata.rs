//! Table-level metadata and persisted configuration.
//!
//! [`TableMeta`] is recorded in full by the creating commit and by every
//! commit that changes the schema or table properties; the last one wins on
//! replay. [`TableConfig`] holds the tunables that travel with the table
//! rather than with a process, so every writer observes the same settings.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::transaction_log::schema::LogicalSchema;

/// Current on-disk format version written into new tables.
pub const FORMAT_VERSION: u32 = 1;

/// Property key for [`TableConfig::checkpoint_interval`].
pub const PROP_CHECKPOINT_INTERVAL: &str = "checkpoint_interval";
/// Property key for [`TableConfig::target_file_rows`].
pub const PROP_TARGET_FILE_ROWS: &str = "target_file_rows";
/// Property key for [`TableConfig::deleted_file_retention_hours`].
pub const PROP_DELETED_FILE_RETENTION_HOURS: &str = "deleted_file_retention_hours";
/// Property key for [`TableConfig::auto_compact`].
pub const PROP_AUTO_COMPACT: &str = "auto_compact";
/// Property key for [`TableConfig::auto_compact_min_files`].
pub const PROP_AUTO_COMPACT_MIN_FILES: &str = "auto_compact_min_files";

/// Persisted table configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TableConfig {
    /// Write a checkpoint every this many commits (0 disables checkpoints).
    pub checkpoint_interval: u64,
    /// Target number of rows per file produced by optimize.
    pub target_file_rows: u64,
    /// Minimum vacuum retention accepted while the retention check is enforced.
    pub deleted_file_retention_hours: u64,
    /// Run a compaction after writes that leave many small files.
    pub auto_compact: bool,
    /// Number of small files in a partition that triggers auto-compaction.
    pub auto_compact_min_files: u64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: 10,
            target_file_rows: 100_000,
            deleted_file_retention_hours: 168,
            auto_compact: false,
            auto_compact_min_files: 50,
        }
    }
}

/// A table property could not be applied.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum TablePropertyError {
    /// The key is not a known table property.
    #[snafu(display("Unknown table property: {key}"))]
    UnknownProperty {
        /// The offending key.
        key: String,
    },

    /// The value does not parse for this property.
    #[snafu(display("Invalid value {value:?} for table property {key}"))]
    InvalidValue {
        /// Property key.
        key: String,
        /// Supplied value.
        value: String,
    },
}

impl TableConfig {
    /// Apply one `key = value` property.
    pub fn apply_property(&mut self, key: &str, value: &str) -> Result<(), TablePropertyError> {
        let invalid = || InvalidValueSnafu {
            key: key.to_string(),
            value: value.to_string(),
        };
        let v = value.trim();
        match key {
            PROP_CHECKPOINT_INTERVAL => {
                self.checkpoint_interval = v.parse().ok().with_context(invalid)?
            }
            PROP_TARGET_FILE_ROWS => {
                let rows: u64 = v.parse().ok().with_context(invalid)?;
                ensure!(rows > 0, invalid());
                self.target_file_rows = rows;
            }
            PROP_DELETED_FILE_RETENTION_HOURS => {
                self.deleted_file_retention_hours = v.parse().ok().with_context(invalid)?
            }
            PROP_AUTO_COMPACT => self.auto_compact = v.parse().ok().with_context(invalid)?,
            PROP_AUTO_COMPACT_MIN_FILES => {
                self.auto_compact_min_files = v.parse().ok().with_context(invalid)?
            }
            _ => {
                return UnknownPropertySnafu {
                    key: key.to_string(),
                }
                .fail();
            }
        }
        Ok(())
    }

    /// Render the configuration as `key -> value` properties.
    pub fn to_properties(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                PROP_CHECKPOINT_INTERVAL.to_string(),
                self.checkpoint_interval.to_string(),
            ),
            (
                PROP_TARGET_FILE_ROWS.to_string(),
                self.target_file_rows.to_string(),
            ),
            (
                PROP_DELETED_FILE_RETENTION_HOURS.to_string(),
                self.deleted_file_retention_hours.to_string(),
            ),
            (PROP_AUTO_COMPACT.to_string(), self.auto_compact.to_string()),
            (
                PROP_AUTO_COMPACT_MIN_FILES.to_string(),
                self.auto_compact_min_files.to_string(),
            ),
        ])
    }
}

/// Table-level metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableMeta {
    /// Logical schema of the table.
    pub schema: LogicalSchema,
    /// Columns used for Hive-style partition directories, in order.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    /// Persisted configuration.
    #[serde(default)]
    pub config: TableConfig,
    /// When the table was created.
    pub created_at: DateTime<Utc>,
    /// On-disk format version.
    pub format_version: u32,
}

impl TableMeta {
    /// Whether `column` is a partition column.
    pub fn is_partition_column(&self, column: &str) -> bool {
        self.partition_columns.iter().any(|c| c == column)
    }
}
