//! Periodic checkpoints of table state.
//!
//! A checkpoint is a [`TableSnapshot`] serialized as JSON next to the commit
//! files (`<version>.checkpoint.json`). `_last_checkpoint` names the most
//! recent one. Both are pure optimizations: a missing or unreadable
//! checkpoint only makes replay longer.
use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

use crate::storage::{self, StorageError, layout};
use crate::transaction_log::{
    CommitError, CorruptStateSnafu, StorageSnafu, TransactionLogStore, snapshot::TableSnapshot,
};

/// Contents of `_last_checkpoint`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastCheckpoint {
    /// Version of the most recent checkpoint.
    pub version: u64,
    /// Number of active files it holds.
    pub num_files: u64,
}

/// Whether a commit at `version` should be followed by a checkpoint.
pub fn is_checkpoint_version(version: u64, interval: u64) -> bool {
    interval > 0 && version > 0 && version % interval == 0
}

impl TransactionLogStore {
    /// Persist `snapshot` as a checkpoint and advance `_last_checkpoint`.
    ///
    /// Writing the same checkpoint twice is harmless: the content is a pure
    /// function of the log.
    pub async fn write_checkpoint(&self, snapshot: &TableSnapshot) -> Result<(), CommitError> {
        let json = serde_json::to_vec(snapshot).map_err(|e| CommitError::CorruptState {
            msg: format!("failed to serialize checkpoint {}: {e}", snapshot.version),
            backtrace: Backtrace::capture(),
        })?;

        storage::write_atomic(
            self.location(),
            &layout::checkpoint_rel_path(snapshot.version),
            &json,
        )
        .await
        .context(StorageSnafu)?;

        let newer = self
            .load_last_checkpoint()
            .await
            .is_none_or(|last| last.version < snapshot.version);
        if newer {
            let hint = LastCheckpoint {
                version: snapshot.version,
                num_files: snapshot.files.len() as u64,
            };
            let hint_json = serde_json::to_vec(&hint).map_err(|e| CommitError::CorruptState {
                msg: format!("failed to serialize checkpoint hint: {e}"),
                backtrace: Backtrace::capture(),
            })?;
            storage::write_atomic(
                self.location(),
                &layout::last_checkpoint_rel_path(),
                &hint_json,
            )
            .await
            .context(StorageSnafu)?;
        }

        debug!("wrote checkpoint at version {}", snapshot.version);
        Ok(())
    }

    /// Read `_last_checkpoint`, treating a missing or malformed hint as absent.
    pub async fn load_last_checkpoint(&self) -> Option<LastCheckpoint> {
        let rel = layout::last_checkpoint_rel_path();
        match storage::read_to_string(self.location(), &rel).await {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(hint) => Some(hint),
                Err(e) => {
                    warn!("ignoring malformed {}: {e}", rel.display());
                    None
                }
            },
            Err(StorageError::NotFound { .. }) => None,
            Err(e) => {
                warn!("failed to read {}: {e}", rel.display());
                None
            }
        }
    }

    /// Load the checkpoint written for `version`.
    pub async fn load_checkpoint(&self, version: u64) -> Result<TableSnapshot, CommitError> {
        let json = storage::read_to_string(self.location(), &layout::checkpoint_rel_path(version))
            .await
            .context(StorageSnafu)?;
        let snapshot: TableSnapshot =
            serde_json::from_str(&json).map_err(|e| CommitError::CorruptState {
                msg: format!("failed to parse checkpoint {version}: {e}"),
                backtrace: Backtrace::capture(),
            })?;
        ensure!(
            snapshot.version == version,
            CorruptStateSnafu {
                msg: format!(
                    "checkpoint file {version} holds version {}",
                    snapshot.version
                ),
            }
        );
        Ok(snapshot)
    }

    /// Versions of all checkpoint files present, ascending.
    pub async fn list_checkpoint_versions(&self) -> Result<Vec<u64>, CommitError> {
        let files = storage::list_files(self.location(), &layout::log_rel_dir())
            .await
            .context(StorageSnafu)?;
        let mut versions: Vec<u64> = files
            .iter()
            .filter_map(|f| {
                let name = Path::new(&f.rel_path).file_name()?.to_str()?;
                name.strip_suffix(".checkpoint.json")?.parse().ok()
            })
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// The newest checkpoint at or before `target`, if any.
    ///
    /// Uses `_last_checkpoint` when it qualifies, otherwise scans the log
    /// directory (time travel to before the latest checkpoint).
    pub async fn latest_checkpoint_at_or_before(&self, target: u64) -> Option<u64> {
        if let Some(last) = self.load_last_checkpoint().await {
            if last.version <= target {
                return Some(last.version);
            }
        }
        match self.list_checkpoint_versions().await {
            Ok(versions) => versions.into_iter().rev().find(|v| *v <= target),
            Err(e) => {
                warn!("failed to list checkpoints: {e}");
                None
            }
        }
    }

    /// Write a checkpoint for `version` if the interval calls for one.
    ///
    /// Failures are logged and swallowed; checkpoints never affect
    /// correctness.
    pub async fn maybe_checkpoint(&self, version: u64, interval: u64) {
        if !is_checkpoint_version(version, interval) {
            return;
        }
        let result: Result<(), CommitError> = async {
            let snapshot = self.build_snapshot(version).await?;
            self.write_checkpoint(&snapshot).await
        }
        .await;
        if let Err(e) = result {
            warn!("failed to write checkpoint at version {version}: {e}");
        }
    }
}
