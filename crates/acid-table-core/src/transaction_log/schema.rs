//! Logical schema definitions, Arrow conversion and write-compatibility rules.
//!
//! The logical schema is what the commit log records: an ordered list of
//! `(name, type, nullable)` columns. Writers are checked against it with one
//! of two explicit policies:
//!
//! - **enforcement** (default): a batch may omit nullable table columns, but
//!   may not introduce columns the table does not have;
//! - **evolution** (opt-in): new batch columns are appended to the table
//!   schema as nullable columns and the commit records the merged schema.
//!
//! A shared column whose type differs is rejected under both policies.
use std::{collections::HashSet, fmt, sync::Arc};

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Logical data types supported by the table format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LogicalDataType {
    /// Boolean value.
    Bool,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// UTF-8 encoded string.
    Utf8,
}

impl LogicalDataType {
    /// Arrow type used for this logical type in data files.
    pub fn to_arrow_datatype(self) -> DataType {
        match self {
            LogicalDataType::Bool => DataType::Boolean,
            LogicalDataType::Int64 => DataType::Int64,
            LogicalDataType::Float64 => DataType::Float64,
            LogicalDataType::Utf8 => DataType::Utf8,
        }
    }

    /// Map an Arrow type back to a logical type, if supported.
    pub fn from_arrow_datatype(dt: &DataType) -> Option<Self> {
        match dt {
            DataType::Boolean => Some(LogicalDataType::Bool),
            DataType::Int64 => Some(LogicalDataType::Int64),
            DataType::Float64 => Some(LogicalDataType::Float64),
            DataType::Utf8 | DataType::LargeUtf8 => Some(LogicalDataType::Utf8),
            _ => None,
        }
    }
}

impl fmt::Display for LogicalDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalDataType::Bool => write!(f, "bool"),
            LogicalDataType::Int64 => write!(f, "int64"),
            LogicalDataType::Float64 => write!(f, "float64"),
            LogicalDataType::Utf8 => write!(f, "utf8"),
        }
    }
}

impl std::str::FromStr for LogicalDataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(LogicalDataType::Bool),
            "int64" | "long" | "bigint" | "int" => Ok(LogicalDataType::Int64),
            "float64" | "double" | "float" => Ok(LogicalDataType::Float64),
            "utf8" | "string" | "str" => Ok(LogicalDataType::Utf8),
            other => Err(format!("unknown column type: {other}")),
        }
    }
}

/// Logical column definition in a schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalField {
    /// Column name as stored in the schema.
    pub name: String,
    /// Logical data type for the column.
    pub data_type: LogicalDataType,
    /// Whether the column allows null values.
    pub nullable: bool,
}

impl LogicalField {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, data_type: LogicalDataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }

    fn to_arrow_field(&self) -> Field {
        Field::new(
            self.name.clone(),
            self.data_type.to_arrow_datatype(),
            self.nullable,
        )
    }
}

impl fmt::Display for LogicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{}?: {}", self.name, self.data_type)
        } else {
            write!(f, "{}: {}", self.name, self.data_type)
        }
    }
}

/// Ordered collection of logical columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogicalSchema {
    columns: Vec<LogicalField>,
}

impl LogicalSchema {
    /// Build a schema, rejecting empty and duplicate column names.
    pub fn new(columns: Vec<LogicalField>) -> Result<Self, LogicalSchemaError> {
        let mut seen = HashSet::with_capacity(columns.len());
        for col in &columns {
            ensure!(!col.name.is_empty(), EmptyColumnNameSnafu);
            ensure!(
                seen.insert(col.name.as_str()),
                DuplicateColumnSnafu {
                    column: col.name.clone()
                }
            );
        }
        Ok(Self { columns })
    }

    /// Columns in schema order.
    pub fn columns(&self) -> &[LogicalField] {
        &self.columns
    }

    /// Look up a column by name.
    pub fn field(&self, name: &str) -> Option<&LogicalField> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Column names in schema order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Convert to an owned Arrow [`Schema`].
    pub fn to_arrow_schema(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(LogicalField::to_arrow_field)
                .collect::<Vec<_>>(),
        )
    }

    /// Convert to a shared Arrow [`SchemaRef`].
    pub fn to_arrow_schema_ref(&self) -> SchemaRef {
        Arc::new(self.to_arrow_schema())
    }

    /// Build a logical schema from an Arrow schema.
    pub fn from_arrow_schema(schema: &Schema) -> Result<Self, LogicalSchemaError> {
        let mut cols = Vec::with_capacity(schema.fields().len());
        for f in schema.fields() {
            let data_type = LogicalDataType::from_arrow_datatype(f.data_type()).context(
                UnsupportedArrowTypeSnafu {
                    column: f.name().clone(),
                    data_type: f.data_type().to_string(),
                },
            )?;
            cols.push(LogicalField::new(f.name().clone(), data_type, f.is_nullable()));
        }
        Self::new(cols)
    }
}

impl fmt::Display for LogicalSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{col}")?;
        }
        write!(f, "}}")
    }
}

/// Errors that can occur while constructing a logical schema.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
pub enum LogicalSchemaError {
    /// Duplicate column names are not allowed.
    #[snafu(display("Duplicate column name: {column}"))]
    DuplicateColumn {
        /// The duplicate column name.
        column: String,
    },

    /// Column names must be non-empty.
    #[snafu(display("Column name must be non-empty"))]
    EmptyColumnName,

    /// The Arrow type has no logical counterpart.
    #[snafu(display("Unsupported Arrow type for column {column}: {data_type}"))]
    UnsupportedArrowType {
        /// Column name.
        column: String,
        /// Rendered Arrow type.
        data_type: String,
    },
}

/// Errors raised when a batch schema is not compatible with the table.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum SchemaCompatibilityError {
    /// The batch omits a column the table declares non-nullable.
    #[snafu(display("Write schema is missing required column {column}"))]
    MissingColumn {
        /// The name of the missing column.
        column: String,
    },

    /// The batch has a column the table does not, and evolution was not requested.
    #[snafu(display(
        "Write schema has extra column {column} not present in table schema \
         (enable schema evolution to add it)"
    ))]
    ExtraColumn {
        /// The name of the extra column.
        column: String,
    },

    /// Column exists in both schemas with different logical types.
    #[snafu(display(
        "Type mismatch for column {column}: table has {table_type}, write has {write_type}"
    ))]
    TypeMismatch {
        /// The name of the column with mismatched type.
        column: String,
        /// The type in the table schema.
        table_type: LogicalDataType,
        /// The type in the written batch.
        write_type: LogicalDataType,
    },

    /// A partition column cannot be added by evolution or omitted from a write.
    #[snafu(display("Write schema is missing partition column {column}"))]
    MissingPartitionColumn {
        /// The partition column name.
        column: String,
    },
}

/// A convenience type alias for results of schema compatibility checks.
pub type SchemaResult<T> = Result<T, SchemaCompatibilityError>;

/// Outcome of checking a write against the table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaCheck {
    /// The batch fits the existing table schema.
    Compatible,
    /// The batch adds columns; the table schema must become this merged schema.
    Evolved(LogicalSchema),
}

/// Check a batch schema against the table schema under the given policy.
///
/// With `allow_evolution`, batch-only columns are appended (nullable) to a
/// merged schema returned as [`SchemaCheck::Evolved`]. Without it they are
/// rejected with [`SchemaCompatibilityError::ExtraColumn`].
pub fn check_write_schema(
    table: &LogicalSchema,
    batch: &LogicalSchema,
    partition_columns: &[String],
    allow_evolution: bool,
) -> SchemaResult<SchemaCheck> {
    for col in table.columns() {
        match batch.field(&col.name) {
            Some(incoming) => {
                ensure!(
                    incoming.data_type == col.data_type,
                    TypeMismatchSnafu {
                        column: col.name.clone(),
                        table_type: col.data_type,
                        write_type: incoming.data_type,
                    }
                );
            }
            None => {
                ensure!(
                    !partition_columns.contains(&col.name),
                    MissingPartitionColumnSnafu {
                        column: col.name.clone()
                    }
                );
                ensure!(
                    col.nullable,
                    MissingColumnSnafu {
                        column: col.name.clone()
                    }
                );
            }
        }
    }

    let extras: Vec<&LogicalField> = batch
        .columns()
        .iter()
        .filter(|c| table.field(&c.name).is_none())
        .collect();

    if extras.is_empty() {
        return Ok(SchemaCheck::Compatible);
    }

    if !allow_evolution {
        return ExtraColumnSnafu {
            column: extras[0].name.clone(),
        }
        .fail();
    }

    let mut merged = table.columns().to_vec();
    merged.extend(
        extras
            .into_iter()
            .map(|c| LogicalField::new(c.name.clone(), c.data_type, true)),
    );
    // Names were unique in both inputs and extras exclude table names.
    Ok(SchemaCheck::Evolved(LogicalSchema { columns: merged }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(cols: &[(&str, LogicalDataType, bool)]) -> LogicalSchema {
        LogicalSchema::new(
            cols.iter()
                .map(|(n, t, null)| LogicalField::new(*n, *t, *null))
                .collect(),
        )
        .expect("valid schema")
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let err = LogicalSchema::new(vec![
            LogicalField::new("a", LogicalDataType::Int64, false),
            LogicalField::new("a", LogicalDataType::Utf8, true),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            LogicalSchemaError::DuplicateColumn {
                column: "a".to_string()
            }
        );
    }

    #[test]
    fn arrow_round_trip_preserves_types_and_nullability() {
        let s = schema(&[
            ("id", LogicalDataType::Int64, false),
            ("name", LogicalDataType::Utf8, true),
            ("score", LogicalDataType::Float64, true),
            ("ok", LogicalDataType::Bool, true),
        ]);
        let back = LogicalSchema::from_arrow_schema(&s.to_arrow_schema()).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn enforcement_rejects_extra_column() {
        let table = schema(&[("id", LogicalDataType::Int64, false)]);
        let batch = schema(&[
            ("id", LogicalDataType::Int64, false),
            ("zip_code", LogicalDataType::Utf8, true),
        ]);
        let err = check_write_schema(&table, &batch, &[], false).unwrap_err();
        assert!(matches!(err, SchemaCompatibilityError::ExtraColumn { column } if column == "zip_code"));
    }

    #[test]
    fn evolution_appends_new_columns_as_nullable() {
        let table = schema(&[("id", LogicalDataType::Int64, false)]);
        let batch = schema(&[
            ("zip_code", LogicalDataType::Utf8, false),
            ("id", LogicalDataType::Int64, false),
        ]);
        let check = check_write_schema(&table, &batch, &[], true).unwrap();
        assert_eq!(
            check,
            SchemaCheck::Evolved(schema(&[
                ("id", LogicalDataType::Int64, false),
                ("zip_code", LogicalDataType::Utf8, true),
            ]))
        );
    }

    #[test]
    fn type_mismatch_is_rejected_even_with_evolution() {
        let table = schema(&[("id", LogicalDataType::Int64, false)]);
        let batch = schema(&[("id", LogicalDataType::Utf8, false)]);
        let err = check_write_schema(&table, &batch, &[], true).unwrap_err();
        assert!(matches!(err, SchemaCompatibilityError::TypeMismatch { .. }));
    }

    #[test]
    fn missing_nullable_column_is_allowed_but_required_is_not() {
        let table = schema(&[
            ("id", LogicalDataType::Int64, false),
            ("note", LogicalDataType::Utf8, true),
        ]);
        let only_id = schema(&[("id", LogicalDataType::Int64, false)]);
        assert_eq!(
            check_write_schema(&table, &only_id, &[], false).unwrap(),
            SchemaCheck::Compatible
        );

        let only_note = schema(&[("note", LogicalDataType::Utf8, true)]);
        let err = check_write_schema(&table, &only_note, &[], false).unwrap_err();
        assert!(matches!(err, SchemaCompatibilityError::MissingColumn { .. }));
    }

    #[test]
    fn partition_columns_must_be_present() {
        let table = schema(&[
            ("id", LogicalDataType::Int64, false),
            ("state", LogicalDataType::Utf8, true),
        ]);
        let batch = schema(&[("id", LogicalDataType::Int64, false)]);
        let err = check_write_schema(&table, &batch, &["state".to_string()], false).unwrap_err();
        assert!(matches!(
            err,
            SchemaCompatibilityError::MissingPartitionColumn { .. }
        ));
    }
}
