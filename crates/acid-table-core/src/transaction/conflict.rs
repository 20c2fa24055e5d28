//! Conflict detection between a transaction and commits that won the race.
//!
//! A transaction conflicts with an intervening commit when that commit
//! changes something the transaction depended on:
//!
//! - it removed a file the transaction read or is removing;
//! - it added data files the transaction's reads would have matched
//!   (or any data files when the transaction read the whole table);
//! - it replaced the table metadata.
//!
//! Blind appends read nothing and therefore never conflict. Rewrites that
//! preserve content (`data_change = false`) never count as appends.

use std::collections::BTreeSet;

use crate::{
    predicate::{IntervalTruth, Predicate},
    table::error::ConflictReason,
    transaction_log::actions::Commit,
};

/// What a transaction read and intends to remove.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReadSet {
    /// Predicates used for reads.
    pub predicates: Vec<Predicate>,
    /// Whether the transaction depends on the full table content.
    pub whole_table: bool,
    /// Paths of files read.
    pub files: BTreeSet<String>,
}

impl ReadSet {
    fn matches_added(&self, file: &crate::transaction_log::DataFileMeta) -> bool {
        if self.whole_table {
            return true;
        }
        self.predicates
            .iter()
            .any(|p| p.eval_on_file(file) != IntervalTruth::AlwaysFalse)
    }
}

/// Check one intervening commit against the transaction's reads and removes.
pub(crate) fn check_commit(
    reads: &ReadSet,
    removes: &BTreeSet<String>,
    winner: &Commit,
) -> Result<(), ConflictReason> {
    if winner.metadata().is_some() {
        return Err(ConflictReason::MetadataChanged {
            version: winner.version,
        });
    }

    for removed in winner.removed_files() {
        if reads.files.contains(&removed.path) || removes.contains(&removed.path) {
            return Err(ConflictReason::ConcurrentDelete {
                path: removed.path.clone(),
                version: winner.version,
            });
        }
    }

    for added in winner.added_files().filter(|f| f.data_change) {
        if reads.matches_added(added) {
            return Err(ConflictReason::ConcurrentAppend {
                path: added.path.clone(),
                version: winner.version,
            });
        }
    }

    Ok(())
}
