//! End-to-end table workflows over the public API.
#![allow(missing_docs)]

use std::collections::BTreeMap;

use acid_table_core::{
    Predicate, RowBatch, Table, Value,
    maintenance::{OptimizeOptions, VacuumOptions},
    storage::TableLocation,
    table::{CreateTableOptions, MergeOptions, ReadOptions, TableError, WriteOptions},
    transaction_log::{
        LogicalDataType, LogicalField, LogicalSchema, Operation, SchemaCompatibilityError,
        VersionSpec,
    },
};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn loan_schema() -> Result<LogicalSchema, Box<dyn std::error::Error>> {
    Ok(LogicalSchema::new(vec![
        LogicalField::new("loan_id", LogicalDataType::Int64, false),
        LogicalField::new("addr_state", LogicalDataType::Utf8, true),
        LogicalField::new("amount", LogicalDataType::Float64, true),
    ])?)
}

fn loans(rows: &[(i64, &str, f64)]) -> Result<RowBatch, Box<dyn std::error::Error>> {
    Ok(RowBatch::new(
        loan_schema()?,
        rows.iter()
            .map(|(id, st, amt)| vec![Value::Int64(*id), (*st).into(), (*amt).into()])
            .collect(),
    )?)
}

async fn loan_table(tmp: &TempDir) -> Result<Table, Box<dyn std::error::Error>> {
    Ok(Table::create(
        TableLocation::local(tmp.path()),
        CreateTableOptions::new(loan_schema()?).with_partition_columns(["addr_state"]),
    )
    .await?)
}

fn sorted_ids(batch: &RowBatch) -> Vec<i64> {
    let mut ids: Vec<i64> = batch
        .column("loan_id")
        .into_iter()
        .flatten()
        .filter_map(|v| match v {
            Value::Int64(i) => Some(*i),
            _ => None,
        })
        .collect();
    ids.sort_unstable();
    ids
}

fn amount_of(batch: &RowBatch, id: i64) -> Option<Value> {
    let id_idx = batch.schema().index_of("loan_id")?;
    let amount_idx = batch.schema().index_of("amount")?;
    batch
        .rows()
        .iter()
        .find(|r| r[id_idx] == Value::Int64(id))
        .map(|r| r[amount_idx].clone())
}

#[tokio::test]
async fn written_rows_read_back_exactly() -> TestResult {
    let tmp = TempDir::new()?;
    let table = loan_table(&tmp).await?;
    let v1 = table
        .write(
            loans(&[(1, "CA", 100.0), (2, "WA", 200.0), (3, "NY", 300.0)])?,
            WriteOptions::default(),
        )
        .await?;
    let v2 = table
        .write(loans(&[(4, "CA", 400.0)])?, WriteOptions::default())
        .await?;
    table.delete(Predicate::eq("loan_id", 2)).await?;

    assert_eq!(
        sorted_ids(&table.read(ReadOptions::at_version(v1)).await?),
        vec![1, 2, 3]
    );
    assert_eq!(
        sorted_ids(&table.read(ReadOptions::at_version(v2)).await?),
        vec![1, 2, 3, 4]
    );
    assert_eq!(
        sorted_ids(&table.read(ReadOptions::default()).await?),
        vec![1, 3, 4]
    );

    // Reopening from disk sees the same state.
    let reopened = Table::open(TableLocation::local(tmp.path())).await?;
    assert_eq!(
        sorted_ids(&reopened.read(ReadOptions::default()).await?),
        vec![1, 3, 4]
    );
    Ok(())
}

#[tokio::test]
async fn filtered_reads_skip_other_partitions() -> TestResult {
    let tmp = TempDir::new()?;
    let table = loan_table(&tmp).await?;
    table
        .write(
            loans(&[(1, "CA", 1.0), (2, "WA", 2.0), (3, "NY", 3.0)])?,
            WriteOptions::default(),
        )
        .await?;

    let snapshot = table.snapshot(VersionSpec::Latest).await?;
    let plan = acid_table_core::scan::plan_scan(&snapshot, &Predicate::eq("addr_state", "CA"));
    assert_eq!(plan.files.len(), 1);
    assert_eq!(plan.files_skipped, 2);

    let ca = table
        .read(ReadOptions::filtered(Predicate::eq("addr_state", "CA")))
        .await?;
    assert_eq!(sorted_ids(&ca), vec![1]);
    Ok(())
}

#[tokio::test]
async fn incompatible_write_fails_then_evolves() -> TestResult {
    let tmp = TempDir::new()?;
    let table = loan_table(&tmp).await?;
    table
        .write(loans(&[(1, "CA", 1.0)])?, WriteOptions::default())
        .await?;
    let schema_before = table.snapshot(VersionSpec::Latest).await?.schema().clone();

    let mut cols = loan_schema()?.columns().to_vec();
    cols.push(LogicalField::new("zip_code", LogicalDataType::Utf8, true));
    let wide = RowBatch::new(
        LogicalSchema::new(cols)?,
        vec![vec![2.into(), "WA".into(), 2.0.into(), "98101".into()]],
    )?;

    let err = table
        .write(wide.clone(), WriteOptions::default())
        .await
        .expect_err("extra column without evolution");
    assert!(matches!(
        err,
        TableError::SchemaMismatch {
            source: SchemaCompatibilityError::ExtraColumn { .. }
        }
    ));
    assert_eq!(
        table.snapshot(VersionSpec::Latest).await?.schema(),
        &schema_before
    );

    table
        .write(wide, WriteOptions::default().with_schema_evolution())
        .await?;
    let rows = table.read(ReadOptions::default()).await?;
    let zip = rows.schema().index_of("zip_code").expect("evolved column");
    let id = rows.schema().index_of("loan_id").expect("id column");
    for row in rows.rows() {
        match &row[id] {
            Value::Int64(1) => assert_eq!(row[zip], Value::Null),
            Value::Int64(2) => assert_eq!(row[zip], Value::from("98101")),
            other => panic!("unexpected row id {other}"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn time_travel_by_version_and_timestamp() -> TestResult {
    let tmp = TempDir::new()?;
    let table = Table::create(
        TableLocation::local(tmp.path()),
        CreateTableOptions::new(loan_schema()?),
    )
    .await?;
    for i in 1..=4 {
        table
            .write(loans(&[(i, "CA", i as f64)])?, WriteOptions::default())
            .await?;
    }
    let mut cols = loan_schema()?.columns().to_vec();
    cols.push(LogicalField::new("zip_code", LogicalDataType::Utf8, true));
    let v5 = table
        .write(
            RowBatch::new(
                LogicalSchema::new(cols)?,
                vec![vec![5.into(), "CA".into(), 5.0.into(), "94105".into()]],
            )?,
            WriteOptions::default().with_schema_evolution(),
        )
        .await?;
    assert_eq!(v5, 5);

    let at0 = table.read(ReadOptions::at_version(0)).await?;
    assert!(at0.is_empty());
    assert!(at0.schema().field("zip_code").is_none());

    let at5 = table.read(ReadOptions::at_version(5)).await?;
    assert!(at5.schema().field("zip_code").is_some());
    assert_eq!(sorted_ids(&at5), vec![1, 2, 3, 4, 5]);

    let history = table.history().await?;
    let t2 = history
        .iter()
        .find(|h| h.version == 2)
        .map(|h| h.timestamp)
        .expect("version 2");
    let by_time = table.read(ReadOptions::at_timestamp(t2)).await?;
    assert_eq!(sorted_ids(&by_time), vec![1, 2]);

    let before_first = history.last().map(|h| h.timestamp).expect("version 0")
        - chrono::TimeDelta::seconds(1);
    let err = table
        .read(ReadOptions::at_timestamp(before_first))
        .await
        .expect_err("before the first commit");
    assert!(matches!(err, TableError::TimestampNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn merge_updates_match_and_inserts_new_keys() -> TestResult {
    let tmp = TempDir::new()?;
    let table = loan_table(&tmp).await?;
    table
        .write(loans(&[(1, "CA", 999.0)])?, WriteOptions::default())
        .await?;

    table
        .merge(
            loans(&[(1, "CA", 10.0), (2, "WA", 20.0)])?,
            MergeOptions::upsert(["loan_id"]),
        )
        .await?;

    let rows = table.read(ReadOptions::default()).await?;
    assert_eq!(sorted_ids(&rows), vec![1, 2]);
    assert_eq!(amount_of(&rows, 1), Some(Value::Float64(10.0)));
    assert_eq!(amount_of(&rows, 2), Some(Value::Float64(20.0)));
    assert_eq!(table.history().await?[0].operation, Operation::Merge);
    Ok(())
}

#[tokio::test]
async fn update_then_history_records_operations() -> TestResult {
    let tmp = TempDir::new()?;
    let table = loan_table(&tmp).await?;
    table
        .write(
            loans(&[(1, "CA", 1.0), (2, "WA", 2.0)])?,
            WriteOptions::default(),
        )
        .await?;
    table
        .update(
            Predicate::eq("addr_state", "WA"),
            &BTreeMap::from([("amount".to_string(), Value::Float64(0.5))]),
        )
        .await?;

    let rows = table.read(ReadOptions::default()).await?;
    assert_eq!(amount_of(&rows, 2), Some(Value::Float64(0.5)));
    assert_eq!(amount_of(&rows, 1), Some(Value::Float64(1.0)));

    let ops: Vec<Operation> = table
        .history()
        .await?
        .into_iter()
        .map(|h| h.operation)
        .collect();
    assert_eq!(
        ops,
        vec![Operation::Update, Operation::Write, Operation::CreateTable]
    );
    Ok(())
}

#[tokio::test]
async fn optimize_preserves_rows_and_vacuum_is_idempotent() -> TestResult {
    let tmp = TempDir::new()?;
    let table = loan_table(&tmp).await?;
    for i in 0..6 {
        table
            .write(loans(&[(i, "CA", i as f64)])?, WriteOptions::default())
            .await?;
    }
    let before = sorted_ids(&table.read(ReadOptions::default()).await?);

    let metrics = table.optimize(OptimizeOptions::default()).await?;
    assert_eq!(metrics.files_removed, 6);
    assert_eq!(metrics.files_added, 1);
    assert_eq!(sorted_ids(&table.read(ReadOptions::default()).await?), before);

    let err = table
        .vacuum(VacuumOptions::retain_hours(0))
        .await
        .expect_err("retention check");
    assert!(matches!(err, TableError::RetentionTooShort { .. }));

    let first = table
        .vacuum(VacuumOptions::retain_hours(0).unchecked())
        .await?;
    assert_eq!(first.deleted_files, 6);
    let second = table
        .vacuum(VacuumOptions::retain_hours(0).unchecked())
        .await?;
    assert_eq!(second.deleted_files, 0);

    assert_eq!(sorted_ids(&table.read(ReadOptions::default()).await?), before);
    Ok(())
}

#[tokio::test]
async fn auto_compaction_runs_after_writes() -> TestResult {
    let tmp = TempDir::new()?;
    let table = loan_table(&tmp).await?;
    table
        .set_properties(&BTreeMap::from([
            ("auto_compact".to_string(), "true".to_string()),
            ("auto_compact_min_files".to_string(), "3".to_string()),
        ]))
        .await?;

    for i in 0..3 {
        table
            .write(loans(&[(i, "CA", 0.0)])?, WriteOptions::default())
            .await?;
    }

    let detail = table.detail().await?;
    assert_eq!(detail.num_files, 1);
    assert_eq!(detail.num_rows, 3);
    assert_eq!(table.history().await?[0].operation, Operation::Optimize);
    Ok(())
}
