//! Maintenance engine: compaction, Z-order clustering and vacuum.
//!
//! - [`optimize`] rewrites small files of each partition into files of about
//!   the target row count, optionally sorting rows along a Z-order curve. The
//!   rewrite changes layout only, so its files are committed with
//!   `data_change = false` and never conflict with concurrent appends.
//! - [`vacuum`] physically deletes files no reader inside the retention
//!   window can reach. It is the only operation that deletes data files.

pub mod optimize;
pub mod vacuum;
mod zorder;

pub use optimize::{OptimizeMetrics, OptimizeOptions, optimize};
pub use vacuum::{VacuumMetrics, VacuumOptions, vacuum};
