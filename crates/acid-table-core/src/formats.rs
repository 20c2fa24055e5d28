//! Format-specific helpers.
//!
//! Data files are Parquet; this module is the only place that encodes or
//! decodes them.

pub mod parquet;
