//! Async helpers for persisting and reading the commit log.
//!
//! This module owns all on-disk interactions with `_acid_log/` commit files:
//! - Discovering the head version from the `CURRENT` hint plus a forward
//!   probe for commit files written after the hint.
//! - Writing zero-padded commit files with create-once semantics so each
//!   version is created exactly once and never observed half-written.
//! - Mapping storage-layer failures into [`CommitError`] variants so callers
//!   can differentiate between conflicts, storage errors, and corrupt state.
//!
//! Higher-level planning (which actions to commit, conflict detection) is
//! left to the transaction layer.
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, warn};
use snafu::{Backtrace, prelude::*};

use crate::storage::{self, StorageError, TableLocation, layout};
use crate::transaction_log::{
    CommitError, ConflictSnafu, CorruptStateSnafu, StorageSnafu,
    actions::{Commit, CommitRequest, LogAction},
};

/// Lazy, ordered stream of commits. Each call to
/// [`TransactionLogStore::read_commits`] yields a fresh stream, so a reader
/// can restart by asking again.
pub type CommitStream = BoxStream<'static, Result<Commit, CommitError>>;

/// Helper for reading and writing the commit log under a table root.
#[derive(Debug, Clone)]
pub struct TransactionLogStore {
    location: TableLocation,
}

impl TransactionLogStore {
    /// Create a new TransactionLogStore rooted at a table directory.
    pub fn new(location: TableLocation) -> Self {
        Self { location }
    }

    /// Get the TableLocation of the log store.
    pub fn location(&self) -> &TableLocation {
        &self.location
    }

    async fn read_to_string_rel(&self, rel: &Path) -> Result<String, CommitError> {
        storage::read_to_string(&self.location, rel)
            .await
            .context(StorageSnafu)
    }

    async fn commit_exists(&self, version: u64) -> Result<bool, CommitError> {
        storage::exists(&self.location, &layout::commit_rel_path(version))
            .await
            .context(StorageSnafu)
    }

    /// Load a single commit by version.
    ///
    /// - On storage-layer failures, returns `CommitError::Storage`.
    /// - On JSON parse failures or a version mismatch, returns
    ///   `CommitError::CorruptState`.
    pub async fn load_commit(&self, version: u64) -> Result<Commit, CommitError> {
        let rel = layout::commit_rel_path(version);
        let json = self.read_to_string_rel(&rel).await?;

        let commit: Commit = serde_json::from_str(&json).map_err(|e| CommitError::CorruptState {
            msg: format!("failed to parse commit {version}: {e}"),
            backtrace: Backtrace::capture(),
        })?;

        ensure!(
            commit.version == version,
            CorruptStateSnafu {
                msg: format!(
                    "commit version mismatch: file {version} holds version {}",
                    commit.version
                ),
            }
        );

        Ok(commit)
    }

    /// Load the `CURRENT` hint.
    ///
    /// - If CURRENT does not exist, returns `None`.
    /// - If CURRENT contains invalid or empty content, returns CorruptState.
    pub async fn load_current_hint(&self) -> Result<Option<u64>, CommitError> {
        let rel = layout::current_rel_path();

        let contents = match storage::read_to_string(&self.location, &rel).await {
            Ok(s) => s,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(source) => return Err(CommitError::Storage { source }),
        };

        let trimmed = contents.trim();
        if trimmed.is_empty() {
            return CorruptStateSnafu {
                msg: format!("CURRENT has empty content at {rel:?}"),
            }
            .fail();
        }
        let version = trimmed
            .parse::<u64>()
            .map_err(|e| CommitError::CorruptState {
                msg: format!("CURRENT has invalid content {trimmed:?}: {e}"),
                backtrace: Backtrace::capture(),
            })?;

        Ok(Some(version))
    }

    /// Discover the latest committed version, or `None` for an empty log.
    ///
    /// Starts from the `CURRENT` hint and probes forward for commit files the
    /// hint does not know about yet (a writer may have created its commit
    /// file and failed before updating `CURRENT`).
    pub async fn load_head_version(&self) -> Result<Option<u64>, CommitError> {
        let hint = self.load_current_hint().await?;

        if let Some(h) = hint {
            ensure!(
                self.commit_exists(h).await?,
                CorruptStateSnafu {
                    msg: format!("CURRENT points at version {h}, but its commit file is missing"),
                }
            );
        }

        let mut next = hint.map_or(0, |h| h + 1);
        while self.commit_exists(next).await? {
            next += 1;
        }

        let head = next.checked_sub(1);
        if head != hint {
            debug!("log head {head:?} is ahead of CURRENT hint {hint:?}");
        }
        Ok(head)
    }

    /// Append a commit on top of `expected` (the head the caller validated
    /// against; `None` for the creating commit).
    ///
    /// ## Concurrency semantics
    ///
    /// - The head check is advisory. Two writers may both observe the same
    ///   head and race for the same version.
    /// - The actual guard is the create-once write of the commit file: the
    ///   payload is staged in a temporary file and hard-linked into place, so
    ///   exactly one writer wins and readers never see a partial commit.
    /// - Both a stale `expected` and a lost race surface as
    ///   [`CommitError::Conflict`]; callers re-validate and retry.
    ///
    /// ## Crash recovery
    ///
    /// `CURRENT` is updated after the commit file exists. If that update
    /// fails, the commit is still durable and is found by
    /// [`Self::load_head_version`]; the failure is logged and not returned.
    ///
    /// Returns the commit as written, including its assigned version and
    /// timestamp.
    pub async fn commit_with_expected_version(
        &self,
        expected: Option<u64>,
        request: CommitRequest,
    ) -> Result<Commit, CommitError> {
        // 1) Guard on the head
        let head = self.load_head_version().await?;
        if head != expected {
            return ConflictSnafu {
                expected,
                found: head,
            }
            .fail();
        }

        // 2) Compute next version with overflow guard
        let version = match expected {
            None => 0,
            Some(v) => v.checked_add(1).context(CorruptStateSnafu {
                msg: "version counter overflow".to_string(),
            })?,
        };

        // 3) Timestamps must strictly increase for time travel lookups.
        let previous = match expected {
            Some(v) => Some(self.load_commit(v).await?.timestamp),
            None => None,
        };
        let timestamp = next_commit_timestamp(previous, Utc::now());

        // Removals take effect at commit time, which is where vacuum
        // measures retention from.
        let mut actions = request.actions;
        for action in &mut actions {
            if let LogAction::RemoveFile(removed) = action {
                removed.deletion_timestamp = timestamp;
            }
        }

        let commit = Commit {
            version,
            base_version: expected,
            timestamp,
            operation: request.operation,
            predicate: request.predicate,
            operation_metrics: request.operation_metrics,
            actions,
        };

        let json = serde_json::to_vec(&commit).map_err(|e| CommitError::CorruptState {
            msg: format!("failed to serialize commit {version}: {e}"),
            backtrace: Backtrace::capture(),
        })?;

        // 4) Create the commit file only if it does not already exist.
        let commit_rel = layout::commit_rel_path(version);
        match storage::write_new_atomic(&self.location, &commit_rel, &json).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists { .. }) => {
                return ConflictSnafu {
                    expected,
                    found: Some(version),
                }
                .fail();
            }
            Err(source) => return Err(CommitError::Storage { source }),
        }

        // 5) Best-effort CURRENT update.
        let current_contents = format!("{version}\n");
        if let Err(e) = storage::write_atomic(
            &self.location,
            &layout::current_rel_path(),
            current_contents.as_bytes(),
        )
        .await
        {
            warn!("committed version {version} but failed to update CURRENT: {e}");
        }

        debug!(
            "committed version {version} ({}) at {}",
            commit.operation, self.location
        );
        Ok(commit)
    }

    /// Lazily read commits `from..=to` in order.
    ///
    /// The stream yields an error and stops being useful if a commit in the
    /// range is missing or corrupt. An empty range yields nothing.
    pub fn read_commits(&self, from: u64, to: u64) -> CommitStream {
        let store = self.clone();
        stream::iter(from..=to)
            .then(move |v| {
                let store = store.clone();
                async move { store.load_commit(v).await }
            })
            .boxed()
    }

    /// Latest version whose commit timestamp is at or before `timestamp`.
    ///
    /// Commit timestamps strictly increase with version, so this is a binary
    /// search over the log.
    pub async fn version_at_or_before(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<u64>, CommitError> {
        let Some(head) = self.load_head_version().await? else {
            return Ok(None);
        };

        let mut lo = 0u64;
        let mut hi = head + 1;
        // Invariant: versions < lo are <= timestamp, versions >= hi are > timestamp.
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.load_commit(mid).await?.timestamp <= timestamp {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo.checked_sub(1))
    }
}

fn next_commit_timestamp(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + TimeDelta::milliseconds(1),
        _ => now,
    }
}
