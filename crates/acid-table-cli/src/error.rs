use std::path::PathBuf;

use acid_table_core::{
    rows::RowBatchError,
    table::TableError,
    transaction_log::{
        LogicalDataType, LogicalSchemaError, table_metadata::TablePropertyError,
    },
};
use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("Failed to create table at {table}. Ensure the directory is writable."))]
    CreateTable {
        table: String,
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    #[snafu(display("Failed to open table at {table}"))]
    OpenTable {
        table: String,
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    #[snafu(display("{op} failed for table {table}: {source}"))]
    TableOp {
        op: &'static str,
        table: String,
        #[snafu(source(from(TableError, Box::new)))]
        source: Box<TableError>,
    },

    #[snafu(display("Invalid --schema '{spec}': {msg}"))]
    InvalidSchemaSpec { spec: String, msg: String },

    #[snafu(display("Invalid schema: {source}"))]
    InvalidSchema { source: LogicalSchemaError },

    #[snafu(display("Invalid predicate '{input}': {msg}"))]
    InvalidPredicate { input: String, msg: String },

    #[snafu(display("Invalid table property: {source}"))]
    InvalidProperty { source: TablePropertyError },

    #[snafu(display("Invalid assignment '{input}': {msg}"))]
    InvalidAssignment { input: String, msg: String },

    #[snafu(display("Invalid literal '{literal}' for {data_type} column {column}"))]
    InvalidLiteral {
        literal: String,
        column: String,
        data_type: LogicalDataType,
    },

    #[snafu(display("Failed to read input {}", path.display()))]
    ReadInput {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Invalid JSON on input line {line}: {source}"))]
    InvalidJson {
        line: usize,
        source: serde_json::Error,
    },

    #[snafu(display("Input line {line}: {msg}"))]
    InvalidRow { line: usize, msg: String },

    #[snafu(display("Rows do not fit the table: {source}"))]
    Rows { source: RowBatchError },

    #[snafu(display("Failed to render output: {source}"))]
    Render { source: arrow::error::ArrowError },

    #[snafu(display("Failed to encode output: {source}"))]
    EncodeOutput { source: serde_json::Error },
}
