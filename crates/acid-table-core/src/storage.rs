//! Storage backend and path utilities.
//!
//! This module centralizes all filesystem access for `acid-table-core`. Higher
//! layers (the commit log, the data file layer, vacuum) never touch `tokio::fs`
//! directly; they go through the helpers here with paths relative to a
//! [`TableLocation`]:
//!
//! - [`write_atomic`]: write-then-rename replacement (used for `CURRENT` and
//!   checkpoint hints).
//! - [`write_new`]: create-only-if-absent writes (used for data files).
//! - [`write_new_atomic`]: create-only-if-absent *and* never partially visible
//!   (used for commit files; this is the mutual-exclusion primitive between
//!   concurrent writers).
//! - Reads, recursive listings and idempotent deletes.
//!
//! Only the local filesystem is supported, but the API is shaped so that an
//! object-store adapter could be slotted in behind [`TableLocation`].

pub mod error;
pub mod layout;

use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use snafu::{Backtrace, prelude::*};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

pub use error::{BackendError, StorageError};
use error::{NotFoundSnafu, OtherIoSnafu};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Represents the location of a table root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TableLocation {
    /// A table stored on the local filesystem at the given path.
    Local(PathBuf),
}

impl TableLocation {
    /// Creates a new `TableLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        TableLocation::Local(root.into())
    }

    /// Root path of the table.
    pub fn root(&self) -> &Path {
        match self {
            TableLocation::Local(root) => root,
        }
    }

    /// Resolve a table-relative path into an absolute local path.
    pub fn join(&self, rel: &Path) -> PathBuf {
        match self {
            TableLocation::Local(root) => root.join(rel),
        }
    }
}

impl std::fmt::Display for TableLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableLocation::Local(root) => write!(f, "{}", root.display()),
        }
    }
}

fn classify_io(path: &Path, e: io::Error) -> StorageError {
    let path = path.display().to_string();
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        },
        io::ErrorKind::AlreadyExists => StorageError::AlreadyExists {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        },
        _ => StorageError::OtherIo {
            path,
            source: BackendError::Local(e),
            backtrace: Backtrace::capture(),
        },
    }
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Guard that removes a temporary file on drop unless disarmed.
/// Used to ensure cleanup on error paths during atomic writes.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Disarm the guard so the file is NOT removed on drop.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup; we are likely already handling another error.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique temporary sibling of `abs`, so concurrent writers of the same target
/// never share a temp file.
fn temp_sibling(abs: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let file_name = abs
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    abs.with_file_name(format!(".{file_name}.{}.{n}.tmp", std::process::id()))
}

async fn write_synced(path: &Path, contents: &[u8]) -> StorageResult<()> {
    let mut file = fs::File::create(path)
        .await
        .map_err(|e| classify_io(path, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| classify_io(path, e))?;
    file.sync_all().await.map_err(|e| classify_io(path, e))?;
    Ok(())
}

/// Write `contents` to `rel_path` inside `location` using an atomic write.
///
/// The payload is written to a temporary file next to the target, synced,
/// and renamed into place, replacing any existing file.
pub async fn write_atomic(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = location.join(rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = temp_sibling(&abs);
    let mut guard = TempFileGuard::new(tmp_path.clone());

    write_synced(&tmp_path, contents).await?;

    fs::rename(&tmp_path, &abs)
        .await
        .map_err(BackendError::Local)
        .context(OtherIoSnafu {
            path: abs.display().to_string(),
        })?;

    guard.disarm();
    Ok(())
}

/// Create a *new* file at `rel_path` and write `contents`, failing with
/// [`StorageError::AlreadyExists`] if the file already exists.
///
/// Readers may observe the file before the write completes; use this only
/// for files that are not reachable until something else references them
/// (data files are invisible until a commit adds them).
pub async fn write_new(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = location.join(rel_path);
    create_parent_dir(&abs).await?;

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&abs)
        .await
        .map_err(|e| classify_io(&abs, e))?;

    file.write_all(contents)
        .await
        .map_err(|e| classify_io(&abs, e))?;
    file.sync_all().await.map_err(|e| classify_io(&abs, e))?;

    Ok(())
}

/// Create a new file at `rel_path` with create-if-absent semantics such that
/// no reader can ever observe a partially written file.
///
/// The payload is fully written and synced to a temporary sibling, which is
/// then hard-linked to the target name. Link creation is atomic and fails
/// with [`StorageError::AlreadyExists`] if the target exists, so exactly one
/// of several concurrent callers wins.
pub async fn write_new_atomic(
    location: &TableLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    let abs = location.join(rel_path);
    create_parent_dir(&abs).await?;

    let tmp_path = temp_sibling(&abs);
    // The temp file is always removed: on success the link keeps the data.
    let _guard = TempFileGuard::new(tmp_path.clone());

    write_synced(&tmp_path, contents).await?;

    fs::hard_link(&tmp_path, &abs)
        .await
        .map_err(|e| classify_io(&abs, e))?;

    Ok(())
}

/// Read the file at `rel_path` as UTF-8.
///
/// Missing files produce [`StorageError::NotFound`].
pub async fn read_to_string(location: &TableLocation, rel_path: &Path) -> StorageResult<String> {
    let abs = location.join(rel_path);
    fs::read_to_string(&abs)
        .await
        .map_err(|e| classify_io(&abs, e))
}

/// Read the full contents of a file at `rel_path`.
pub async fn read_all_bytes(location: &TableLocation, rel_path: &Path) -> StorageResult<Vec<u8>> {
    let abs = location.join(rel_path);
    fs::read(&abs).await.map_err(|e| classify_io(&abs, e))
}

/// Whether a file exists at `rel_path`.
pub async fn exists(location: &TableLocation, rel_path: &Path) -> StorageResult<bool> {
    let abs = location.join(rel_path);
    fs::try_exists(&abs).await.map_err(|e| classify_io(&abs, e))
}

/// Delete the file at `rel_path`.
///
/// Returns `Ok(false)` when the file did not exist, which makes repeated
/// deletes idempotent.
pub async fn delete_file(location: &TableLocation, rel_path: &Path) -> StorageResult<bool> {
    let abs = location.join(rel_path);
    match fs::remove_file(&abs).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(classify_io(&abs, e)),
    }
}

/// A file discovered by [`list_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the table root, always `/`-separated.
    pub rel_path: String,
    /// File size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Recursively list regular files under `rel_dir`.
///
/// A missing directory yields an empty listing. Temporary files left behind
/// by interrupted writes (`.*.tmp`) are included; callers decide what to do
/// with them.
pub async fn list_files(location: &TableLocation, rel_dir: &Path) -> StorageResult<Vec<FileEntry>> {
    let mut out = Vec::new();
    let mut pending = vec![rel_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let abs = location.join(&dir);
        let mut entries = match fs::read_dir(&abs).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(classify_io(&abs, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| classify_io(&abs, e))?
        {
            let rel = dir.join(entry.file_name());
            let meta = entry
                .metadata()
                .await
                .map_err(|e| classify_io(&entry.path(), e))?;

            if meta.is_dir() {
                pending.push(rel);
            } else if meta.is_file() {
                let modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .map_err(|e| classify_io(&entry.path(), e))?;
                out.push(FileEntry {
                    rel_path: to_slash(&rel),
                    size: meta.len(),
                    modified,
                });
            }
        }
    }

    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(out)
}

/// Render a relative path with `/` separators, as stored in the log.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Ensure the table root directory exists, failing with
/// [`StorageError::NotFound`] when it does not.
pub async fn ensure_root_exists(location: &TableLocation) -> StorageResult<()> {
    let root = location.root();
    match fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(BackendError::Local(io::Error::other("not a directory")))
            .context(NotFoundSnafu {
                path: root.display().to_string(),
            }),
        Err(e) => Err(classify_io(root, e)),
    }
}
