//! Row model: scalar [`Value`]s and [`RowBatch`]es under a logical schema.
//!
//! Rows are the unit callers exchange with the table (writes, reads, DML
//! sources). Data files store them column-wise in Parquet; conversion to and
//! from Arrow [`RecordBatch`]es lives here so both the file layer and the CLI
//! can share it.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use arrow::{
    array::{
        Array, ArrayRef, BooleanArray, BooleanBuilder, Float64Array, Float64Builder, Int64Array,
        Int64Builder, LargeStringArray, StringArray, StringBuilder,
    },
    datatypes::DataType,
    error::ArrowError,
    record_batch::RecordBatch,
};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::transaction_log::schema::{LogicalDataType, LogicalSchema, LogicalSchemaError};

/// A single scalar cell value.
///
/// Serialized untagged, so JSON `null`, booleans, integers, floats and strings
/// map directly onto the variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    /// Whether this is [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Logical type of a non-null value.
    pub fn data_type(&self) -> Option<LogicalDataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(LogicalDataType::Bool),
            Value::Int64(_) => Some(LogicalDataType::Int64),
            Value::Float64(_) => Some(LogicalDataType::Float64),
            Value::Utf8(_) => Some(LogicalDataType::Utf8),
        }
    }

    /// Coerce this value to `dt`, widening integers to floats.
    ///
    /// Returns `None` when the value cannot represent `dt`.
    pub fn coerce_to(&self, dt: LogicalDataType) -> Option<Value> {
        match (self, dt) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Bool(_), LogicalDataType::Bool)
            | (Value::Int64(_), LogicalDataType::Int64)
            | (Value::Float64(_), LogicalDataType::Float64)
            | (Value::Utf8(_), LogicalDataType::Utf8) => Some(self.clone()),
            (Value::Int64(v), LogicalDataType::Float64) => Some(Value::Float64(*v as f64)),
            _ => None,
        }
    }

    /// Compare two values. Integers and floats compare numerically; nulls
    /// and values of unrelated types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Utf8(a), Value::Utf8(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used for sorting rows: nulls first, then by type, then by value.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Int64(_) | Value::Float64(_) => 2,
                Value::Utf8(_) => 3,
            }
        }
        self.compare(other).unwrap_or_else(|| match (self, other) {
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            _ => rank(self).cmp(&rank(other)),
        })
    }

    /// Raw textual form without quoting, used for partition directory names.
    pub fn to_partition_string(&self) -> String {
        match self {
            Value::Null => "__NULL__".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int64(v) => v.to_string(),
            Value::Float64(v) => v.to_string(),
            Value::Utf8(s) => s.clone(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Utf8(a), Value::Utf8(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => {
                let canonical = if v.is_nan() {
                    f64::NAN
                } else if *v == 0.0 {
                    0.0
                } else {
                    *v
                };
                canonical.to_bits().hash(state);
            }
            Value::Utf8(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v:?}"),
            Value::Utf8(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Utf8(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Errors raised when constructing or converting a [`RowBatch`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RowBatchError {
    /// A row does not have one value per schema column.
    #[snafu(display("Row {row} has {actual} values, schema has {expected} columns"))]
    RowWidth {
        /// Row index.
        row: usize,
        /// Column count of the schema.
        expected: usize,
        /// Value count of the row.
        actual: usize,
    },

    /// A value does not match its column type.
    #[snafu(display("Value {value} in row {row} does not fit column {column} of type {expected}"))]
    ValueType {
        /// Row index.
        row: usize,
        /// Column name.
        column: String,
        /// Declared column type.
        expected: LogicalDataType,
        /// Rendered offending value.
        value: String,
    },

    /// A null was supplied for a non-nullable column.
    #[snafu(display("Null value in row {row} for non-nullable column {column}"))]
    NullInNonNullable {
        /// Row index.
        row: usize,
        /// Column name.
        column: String,
    },

    /// Partition values are kept in the JSON log, which cannot hold NaN or
    /// infinities.
    #[snafu(display("Non-finite value {value} in row {row} for partition column {column}"))]
    NonFinitePartitionValue {
        /// Row index.
        row: usize,
        /// Partition column name.
        column: String,
        /// Rendered offending value.
        value: String,
    },

    /// The Arrow schema of a record batch has no logical counterpart.
    #[snafu(display("Unsupported record batch schema: {source}"))]
    UnsupportedSchema {
        /// Underlying schema error.
        source: LogicalSchemaError,
    },

    /// Building the Arrow record batch failed.
    #[snafu(display("Arrow error while building record batch: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },
}

/// A batch of rows sharing one logical schema.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    schema: LogicalSchema,
    rows: Vec<Vec<Value>>,
}

impl RowBatch {
    /// Build a batch, validating widths, types and nullability.
    ///
    /// Integer values in float columns are widened.
    pub fn new(schema: LogicalSchema, rows: Vec<Vec<Value>>) -> Result<Self, RowBatchError> {
        let mut rows = rows;
        for (row_idx, row) in rows.iter_mut().enumerate() {
            ensure!(
                row.len() == schema.len(),
                RowWidthSnafu {
                    row: row_idx,
                    expected: schema.len(),
                    actual: row.len(),
                }
            );
            for (value, field) in row.iter_mut().zip(schema.columns()) {
                if value.is_null() {
                    ensure!(
                        field.nullable,
                        NullInNonNullableSnafu {
                            row: row_idx,
                            column: field.name.clone(),
                        }
                    );
                    continue;
                }
                *value = value.coerce_to(field.data_type).context(ValueTypeSnafu {
                    row: row_idx,
                    column: field.name.clone(),
                    expected: field.data_type,
                    value: value.to_string(),
                })?;
            }
        }
        Ok(Self { schema, rows })
    }

    /// Fail if a partition column holds NaN or an infinity.
    pub fn check_partition_values(&self, partition_columns: &[String]) -> Result<(), RowBatchError> {
        for column in partition_columns {
            let Some(idx) = self.schema.index_of(column) else {
                continue;
            };
            for (row_idx, row) in self.rows.iter().enumerate() {
                if let Value::Float64(v) = &row[idx] {
                    ensure!(
                        v.is_finite(),
                        NonFinitePartitionValueSnafu {
                            row: row_idx,
                            column: column.clone(),
                            value: v.to_string(),
                        }
                    );
                }
            }
        }
        Ok(())
    }

    /// An empty batch under `schema`.
    pub fn empty(schema: LogicalSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Build without validation; callers guarantee rows already match `schema`.
    pub(crate) fn from_trusted(schema: LogicalSchema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// Schema of the batch.
    pub fn schema(&self) -> &LogicalSchema {
        &self.schema
    }

    /// Rows of the batch.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Consume the batch, returning its rows.
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, by name.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &Value>> {
        let idx = self.schema.index_of(name)?;
        Some(self.rows.iter().map(move |r| &r[idx]))
    }

    /// Re-shape rows onto `target`: columns are matched by name and columns
    /// absent from this batch are filled with nulls.
    pub fn project_onto(&self, target: &LogicalSchema) -> RowBatch {
        let mapping: Vec<Option<usize>> = target
            .columns()
            .iter()
            .map(|c| self.schema.index_of(&c.name))
            .collect();

        let rows = self
            .rows
            .iter()
            .map(|row| {
                mapping
                    .iter()
                    .map(|m| m.map_or(Value::Null, |i| row[i].clone()))
                    .collect()
            })
            .collect();

        RowBatch {
            schema: target.clone(),
            rows,
        }
    }

    /// Append the rows of `other`, projected onto this batch's schema.
    pub fn extend_from(&mut self, other: &RowBatch) {
        if other.schema == self.schema {
            self.rows.extend(other.rows.iter().cloned());
        } else {
            self.rows.extend(other.project_onto(&self.schema).rows);
        }
    }

    /// Convert to an Arrow [`RecordBatch`].
    pub fn to_record_batch(&self) -> Result<RecordBatch, RowBatchError> {
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.schema.len());
        for (idx, field) in self.schema.columns().iter().enumerate() {
            let values = self.rows.iter().map(|r| &r[idx]);
            let array: ArrayRef = match field.data_type {
                LogicalDataType::Bool => {
                    let mut b = BooleanBuilder::with_capacity(self.rows.len());
                    for v in values {
                        match v {
                            Value::Bool(x) => b.append_value(*x),
                            _ => b.append_null(),
                        }
                    }
                    Arc::new(b.finish())
                }
                LogicalDataType::Int64 => {
                    let mut b = Int64Builder::with_capacity(self.rows.len());
                    for v in values {
                        match v {
                            Value::Int64(x) => b.append_value(*x),
                            _ => b.append_null(),
                        }
                    }
                    Arc::new(b.finish())
                }
                LogicalDataType::Float64 => {
                    let mut b = Float64Builder::with_capacity(self.rows.len());
                    for v in values {
                        match v {
                            Value::Float64(x) => b.append_value(*x),
                            Value::Int64(x) => b.append_value(*x as f64),
                            _ => b.append_null(),
                        }
                    }
                    Arc::new(b.finish())
                }
                LogicalDataType::Utf8 => {
                    let mut b = StringBuilder::new();
                    for v in values {
                        match v {
                            Value::Utf8(x) => b.append_value(x),
                            _ => b.append_null(),
                        }
                    }
                    Arc::new(b.finish())
                }
            };
            arrays.push(array);
        }

        RecordBatch::try_new(self.schema.to_arrow_schema_ref(), arrays).context(ArrowSnafu)
    }

    /// Convert an Arrow [`RecordBatch`] back into rows.
    pub fn from_record_batch(batch: &RecordBatch) -> Result<RowBatch, RowBatchError> {
        let schema =
            LogicalSchema::from_arrow_schema(batch.schema().as_ref()).context(UnsupportedSchemaSnafu)?;

        let mut rows: Vec<Vec<Value>> = (0..batch.num_rows())
            .map(|_| Vec::with_capacity(schema.len()))
            .collect();

        for column in batch.columns() {
            for (row_idx, row) in rows.iter_mut().enumerate() {
                row.push(array_value(column.as_ref(), row_idx));
            }
        }

        Ok(RowBatch { schema, rows })
    }
}

fn array_value(array: &dyn Array, idx: usize) -> Value {
    if array.is_null(idx) {
        return Value::Null;
    }
    let any = array.as_any();
    match array.data_type() {
        DataType::Boolean => any
            .downcast_ref::<BooleanArray>()
            .map_or(Value::Null, |a| Value::Bool(a.value(idx))),
        DataType::Int64 => any
            .downcast_ref::<Int64Array>()
            .map_or(Value::Null, |a| Value::Int64(a.value(idx))),
        DataType::Float64 => any
            .downcast_ref::<Float64Array>()
            .map_or(Value::Null, |a| Value::Float64(a.value(idx))),
        DataType::Utf8 => any
            .downcast_ref::<StringArray>()
            .map_or(Value::Null, |a| Value::Utf8(a.value(idx).to_string())),
        DataType::LargeUtf8 => any
            .downcast_ref::<LargeStringArray>()
            .map_or(Value::Null, |a| Value::Utf8(a.value(idx).to_string())),
        _ => Value::Null,
    }
}
