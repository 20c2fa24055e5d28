//! On-disk layout helpers for a table root.
//!
//! All *relative* path conventions live here:
//! - commit log directory and file naming (`_acid_log/`)
//! - checkpoint files and the `_last_checkpoint` hint
//! - the data directory (`data/`) and Hive-style partition directories
//!
//! The functions return relative [`PathBuf`] values; callers join them with a
//! [`crate::storage::TableLocation`] before doing I/O.

use std::path::PathBuf;

// ====================
// Data layout
// ====================

/// Directory where data files are stored.
pub const DATA_DIR_NAME: &str = "data";

/// Extension of data files.
pub const DATA_FILE_EXT: &str = "parquet";

/// Relative path: `data/`
pub fn data_rel_dir() -> PathBuf {
    PathBuf::from(DATA_DIR_NAME)
}

/// Relative path of a data file: `data/[<col>=<value>/...]part-<id>.parquet`.
///
/// `partition` is the ordered list of `(column, rendered value)` pairs.
pub fn data_file_rel_path(partition: &[(String, String)], file_id: &str) -> PathBuf {
    let mut path = data_rel_dir();
    for (col, value) in partition {
        path.push(format!("{col}={}", escape_partition_value(value)));
    }
    path.push(format!("part-{file_id}.{DATA_FILE_EXT}"));
    path
}

/// Escape characters that cannot appear in a single path component.
fn escape_partition_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '/' | '\\' | '%' | '=' | ':' | '\0' => out.push_str(&format!("%{:02X}", ch as u32)),
            _ => out.push(ch),
        }
    }
    if out.is_empty() || out == "." || out == ".." {
        out = format!("%{}", out.len());
    }
    out
}

// ====================
// Transaction log layout
// ====================

/// Name of the subdirectory containing the commit log.
pub const LOG_DIR_NAME: &str = "_acid_log";

/// Name of the file that stores the current version hint.
pub const CURRENT_FILE_NAME: &str = "CURRENT";

/// Name of the file pointing at the most recent checkpoint.
pub const LAST_CHECKPOINT_FILE_NAME: &str = "_last_checkpoint";

/// Number of digits used in zero-padded commit file names.
pub const COMMIT_FILENAME_DIGITS: usize = 20;

/// Relative path: `_acid_log/`
pub fn log_rel_dir() -> PathBuf {
    PathBuf::from(LOG_DIR_NAME)
}

/// Relative path: `_acid_log/CURRENT`
pub fn current_rel_path() -> PathBuf {
    log_rel_dir().join(CURRENT_FILE_NAME)
}

/// Relative path: `_acid_log/<zero-padded>.json`
pub fn commit_rel_path(version: u64) -> PathBuf {
    let file_name = format!("{:0width$}.json", version, width = COMMIT_FILENAME_DIGITS);
    log_rel_dir().join(file_name)
}

/// Relative path: `_acid_log/<zero-padded>.checkpoint.json`
pub fn checkpoint_rel_path(version: u64) -> PathBuf {
    let file_name = format!(
        "{:0width$}.checkpoint.json",
        version,
        width = COMMIT_FILENAME_DIGITS
    );
    log_rel_dir().join(file_name)
}

/// Relative path: `_acid_log/_last_checkpoint`
pub fn last_checkpoint_rel_path() -> PathBuf {
    log_rel_dir().join(LAST_CHECKPOINT_FILE_NAME)
}

/// Parse a commit file name (`<digits>.json`) back into its version.
pub fn parse_commit_file_name(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(".json")?;
    if digits.len() != COMMIT_FILENAME_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_paths_are_zero_padded() {
        assert_eq!(
            commit_rel_path(7),
            PathBuf::from("_acid_log/00000000000000000007.json")
        );
        assert_eq!(
            checkpoint_rel_path(10),
            PathBuf::from("_acid_log/00000000000000000010.checkpoint.json")
        );
    }

    #[test]
    fn parse_commit_file_name_rejects_other_files() {
        assert_eq!(parse_commit_file_name("00000000000000000042.json"), Some(42));
        assert_eq!(parse_commit_file_name("00000000000000000042.checkpoint.json"), None);
        assert_eq!(parse_commit_file_name("CURRENT"), None);
        assert_eq!(parse_commit_file_name("42.json"), None);
    }

    #[test]
    fn partition_directories_are_hive_style() {
        let part = vec![
            ("region".to_string(), "eu".to_string()),
            ("day".to_string(), "2024/01/02".to_string()),
        ];
        assert_eq!(
            data_file_rel_path(&part, "abc"),
            PathBuf::from("data/region=eu/day=2024%2F01%2F02/part-abc.parquet")
        );
        assert_eq!(
            data_file_rel_path(&[], "abc"),
            PathBuf::from("data/part-abc.parquet")
        );
    }
}
