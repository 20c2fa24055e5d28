use tempfile::TempDir;

use crate::{
    rows::{RowBatch, Value},
    storage::TableLocation,
    table::{CreateTableOptions, Table},
    transaction_log::{LogicalDataType, LogicalField, LogicalSchema},
};

pub(crate) type TestResult = Result<(), Box<dyn std::error::Error>>;

pub(crate) fn people_schema() -> LogicalSchema {
    LogicalSchema::new(vec![
        LogicalField::new("id", LogicalDataType::Int64, false),
        LogicalField::new("addr_state", LogicalDataType::Utf8, true),
        LogicalField::new("amount", LogicalDataType::Float64, true),
    ])
    .expect("valid schema")
}

/// `id, addr_state, amount` table partitioned by `addr_state`.
pub(crate) async fn people_table(tmp: &TempDir) -> Result<Table, Box<dyn std::error::Error>> {
    let table = Table::create(
        TableLocation::local(tmp.path()),
        CreateTableOptions::new(people_schema()).with_partition_columns(["addr_state"]),
    )
    .await?;
    Ok(table)
}

pub(crate) fn people_batch(rows: &[(i64, &str, f64)]) -> RowBatch {
    RowBatch::new(
        people_schema(),
        rows.iter()
            .map(|(id, state, amount)| vec![Value::Int64(*id), (*state).into(), (*amount).into()])
            .collect(),
    )
    .expect("valid rows")
}

/// Sorted `(id, amount)` pairs of a batch laid out per [`people_schema`].
pub(crate) fn ids_and_amounts(batch: &RowBatch) -> Vec<(i64, Option<f64>)> {
    let id_idx = batch.schema().index_of("id").expect("id column");
    let amount_idx = batch.schema().index_of("amount").expect("amount column");
    let mut out: Vec<(i64, Option<f64>)> = batch
        .rows()
        .iter()
        .filter_map(|r| match (&r[id_idx], &r[amount_idx]) {
            (Value::Int64(id), Value::Float64(a)) => Some((*id, Some(*a))),
            (Value::Int64(id), Value::Null) => Some((*id, None)),
            _ => None,
        })
        .collect();
    out.sort_by_key(|(id, _)| *id);
    out
}
