//! Query executor: file pruning and lazy row streams over a snapshot.
//!
//! Planning is pure metadata work: every active file is tested against the
//! predicate using its statistics and skipped when no row can match. The
//! surviving files are read lazily, one [`RowBatch`] per file, with the
//! predicate applied row by row. Pruning affects cost, never results.

use futures::{
    TryStreamExt,
    stream::{self, BoxStream, StreamExt},
};
use log::debug;

use crate::{
    formats::parquet::{DataFileResult, read_data_file},
    predicate::{IntervalTruth, Predicate},
    rows::RowBatch,
    storage::TableLocation,
    transaction_log::{data_files::DataFileMeta, snapshot::TableSnapshot},
};

/// Lazy stream of row batches, one per scanned file.
pub type RowStream = BoxStream<'static, DataFileResult<RowBatch>>;

/// Files selected for a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    /// Files that may contain matching rows, in path order.
    pub files: Vec<DataFileMeta>,
    /// Files whose statistics proved no row can match.
    pub files_skipped: usize,
}

impl ScanPlan {
    /// Paths of the selected files.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }
}

/// Select the active files of `snapshot` that may hold rows matching
/// `predicate`.
pub fn plan_scan(snapshot: &TableSnapshot, predicate: &Predicate) -> ScanPlan {
    let mut files = Vec::new();
    let mut files_skipped = 0;
    for file in snapshot.active_files() {
        if predicate.eval_on_file(file) == IntervalTruth::AlwaysFalse {
            files_skipped += 1;
        } else {
            files.push(file.clone());
        }
    }
    debug!(
        "scan at version {} selected {} files, skipped {} ({predicate})",
        snapshot.version,
        files.len(),
        files_skipped
    );
    ScanPlan {
        files,
        files_skipped,
    }
}

/// Lazily read the planned files and keep rows matching `predicate`.
///
/// Rows are projected onto the snapshot's schema. Files with no matching
/// rows yield nothing.
pub fn execute_scan(
    location: &TableLocation,
    snapshot: &TableSnapshot,
    plan: ScanPlan,
    predicate: &Predicate,
) -> RowStream {
    let location = location.clone();
    let schema = snapshot.schema().clone();
    let predicate = predicate.clone();

    stream::iter(plan.files)
        .then(move |file| {
            let location = location.clone();
            let schema = schema.clone();
            let predicate = predicate.clone();
            async move {
                let batch = read_data_file(&location, &file, &schema).await?;
                if predicate.is_true() {
                    return Ok(batch);
                }
                let rows = batch
                    .into_rows()
                    .into_iter()
                    .filter(|r| predicate.matches(&schema, r))
                    .collect();
                Ok(RowBatch::from_trusted(schema, rows))
            }
        })
        .try_filter(|b| futures::future::ready(!b.is_empty()))
        .boxed()
}

/// Plan and execute a scan, collecting every matching row into one batch.
pub async fn scan_to_batch(
    location: &TableLocation,
    snapshot: &TableSnapshot,
    predicate: &Predicate,
) -> DataFileResult<RowBatch> {
    let plan = plan_scan(snapshot, predicate);
    let mut stream = execute_scan(location, snapshot, plan, predicate);
    let mut out = RowBatch::empty(snapshot.schema().clone());
    while let Some(batch) = stream.try_next().await? {
        out.extend_from(&batch);
    }
    Ok(out)
}
