//! VACUUM: physically delete data files outside the retention window.
//!
//! A file under `data/` is deleted when it is not active in the latest
//! snapshot and either
//! - it was removed by a commit whose deletion timestamp is older than the
//!   retention cutoff, or
//! - no commit ever referenced it (an orphan of an aborted or failed write)
//!   and it was last modified before the cutoff.
//!
//! Files tombstoned inside the window stay, so readers of snapshots within
//! the window keep working. A zero-hour retention is only accepted with the
//! retention check disabled and can break concurrent readers of older
//! snapshots.

use std::path::Path;

use chrono::{TimeDelta, Utc};
use log::{debug, info, warn};
use snafu::prelude::*;

use crate::{
    storage::{self, layout},
    table::{
        Table,
        error::{RetentionTooShortSnafu, StorageSnafu, TableResult},
    },
    transaction::DEFAULT_MAX_COMMIT_RETRIES,
    transaction_log::{CommitError, CommitRequest, Operation, VersionSpec},
};

/// Options for [`vacuum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VacuumOptions {
    /// Retention window; defaults to the table's `deleted_file_retention_hours`.
    pub retention_hours: Option<u64>,
    /// Reject retentions shorter than the table's minimum.
    pub enforce_retention_duration: bool,
    /// Report what would be deleted without deleting.
    pub dry_run: bool,
}

impl Default for VacuumOptions {
    fn default() -> Self {
        Self {
            retention_hours: None,
            enforce_retention_duration: true,
            dry_run: false,
        }
    }
}

impl VacuumOptions {
    /// Retain `hours` of history.
    pub fn retain_hours(hours: u64) -> Self {
        Self {
            retention_hours: Some(hours),
            ..Self::default()
        }
    }

    /// Skip the minimum-retention check.
    pub fn unchecked(mut self) -> Self {
        self.enforce_retention_duration = false;
        self
    }

    /// Only report candidates.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Outcome of [`vacuum`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VacuumMetrics {
    /// Files actually deleted (0 on a dry run).
    pub deleted_files: u64,
    /// Bytes freed.
    pub deleted_bytes: u64,
    /// Paths deleted, or that would be deleted on a dry run.
    pub paths: Vec<String>,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Version of the audit commit; `None` when nothing was deleted.
    pub version: Option<u64>,
}

/// Delete unreachable data files of `table`.
pub async fn vacuum(table: &Table, options: VacuumOptions) -> TableResult<VacuumMetrics> {
    let snapshot = table.snapshot(VersionSpec::Latest).await?;
    let minimum_hours = snapshot.config().deleted_file_retention_hours;
    let retention_hours = options.retention_hours.unwrap_or(minimum_hours);

    ensure!(
        !options.enforce_retention_duration || retention_hours >= minimum_hours,
        RetentionTooShortSnafu {
            requested_hours: retention_hours,
            minimum_hours,
        }
    );
    if retention_hours < minimum_hours {
        warn!(
            "vacuum of {} with {retention_hours}h retention (table minimum {minimum_hours}h) \
             may remove files still needed by readers of older snapshots",
            table.location()
        );
    }

    // Saturate: a window too large for `TimeDelta` retains everything.
    let retention = i64::try_from(retention_hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .unwrap_or(TimeDelta::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(retention)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

    // 1) Select.
    let listing = storage::list_files(table.location(), &layout::data_rel_dir())
        .await
        .context(StorageSnafu)?;

    let mut metrics = VacuumMetrics {
        dry_run: options.dry_run,
        ..VacuumMetrics::default()
    };
    let mut candidates = Vec::new();
    for entry in listing {
        if snapshot.files.contains_key(&entry.rel_path) {
            continue;
        }
        let expired = match snapshot.tombstones.get(&entry.rel_path) {
            Some(t) => t.deletion_timestamp <= cutoff,
            None => entry.modified <= cutoff,
        };
        if expired {
            candidates.push(entry);
        }
    }

    if options.dry_run {
        metrics.paths = candidates.into_iter().map(|e| e.rel_path).collect();
        debug!(
            "vacuum dry run of {} found {} files",
            table.location(),
            metrics.paths.len()
        );
        return Ok(metrics);
    }

    // 2) Delete. Files already gone are skipped.
    for entry in candidates {
        let removed = storage::delete_file(table.location(), Path::new(&entry.rel_path))
            .await
            .context(StorageSnafu)?;
        if removed {
            metrics.deleted_files += 1;
            metrics.deleted_bytes += entry.size;
            metrics.paths.push(entry.rel_path);
        }
    }

    if metrics.deleted_files == 0 {
        return Ok(metrics);
    }

    // 3) Audit entry.
    let mut request = CommitRequest::new(Operation::Vacuum, Vec::new());
    request.predicate = Some(format!("RETAIN {retention_hours} HOURS"));
    request
        .operation_metrics
        .insert("num_deleted_files".to_string(), metrics.deleted_files);
    request
        .operation_metrics
        .insert("num_deleted_bytes".to_string(), metrics.deleted_bytes);

    let mut attempts = 0;
    let commit = loop {
        let head = table.log().load_head_version().await?;
        match table
            .log()
            .commit_with_expected_version(head, request.clone())
            .await
        {
            Ok(commit) => break commit,
            Err(CommitError::Conflict { .. }) if attempts < DEFAULT_MAX_COMMIT_RETRIES => {
                attempts += 1;
            }
            Err(e) => return Err(e.into()),
        }
    };

    info!(
        "vacuum of {} deleted {} files ({} bytes), recorded at version {}",
        table.location(),
        metrics.deleted_files,
        metrics.deleted_bytes,
        commit.version
    );
    metrics.version = Some(commit.version);
    Ok(metrics)
}
