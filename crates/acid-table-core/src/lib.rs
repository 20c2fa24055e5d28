//! Core engine for a file-based transactional table format.
//!
//! This crate provides the pieces of `acid-table`:
//!
//! - An append-only JSON commit log with create-once version files and a
//!   `CURRENT` hint (`transaction_log` module), plus snapshot reconstruction
//!   by replay from periodic checkpoints.
//! - Immutable Parquet data files with per-column statistics recorded in the
//!   log (`formats` module).
//! - Row predicates with three-valued logic, used both for filtering rows and
//!   for skipping files by their statistics (`predicate`, `scan` modules).
//! - Optimistic concurrency control: transactions read a snapshot, stage
//!   changes, and validate against intervening commits before appending
//!   (`transaction` module).
//! - A [`table::Table`] handle exposing reads, writes, deletes, updates,
//!   merges, time travel and history.
//! - Compaction, Z-order clustering and vacuum (`maintenance` module).
//!
//! Front-ends (for example the `acidtable` CLI) depend on this crate rather
//! than touching the on-disk layout directly.
#![deny(missing_docs)]
pub mod formats;
pub mod maintenance;
pub mod predicate;
pub mod rows;
pub mod scan;
pub mod storage;
pub mod table;
pub mod transaction;
pub mod transaction_log;

pub use predicate::Predicate;
pub use rows::{RowBatch, Value};
pub use table::Table;
