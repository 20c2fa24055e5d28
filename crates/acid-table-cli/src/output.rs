//! Rendering of rows, history and table details to stdout.

use acid_table_core::{
    RowBatch,
    maintenance::{OptimizeMetrics, VacuumMetrics},
    table::{CommitSummary, TableDetail},
};
use snafu::ResultExt;

use crate::error::{CliResult, EncodeOutputSnafu, RenderSnafu, RowsSnafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Jsonl,
}

/// Render `batch` as an ASCII table, or one JSON object per row.
pub fn render_rows(
    batch: &RowBatch,
    format: OutputFormat,
    limit: Option<usize>,
) -> CliResult<String> {
    let shown = match limit {
        Some(n) if n < batch.num_rows() => {
            RowBatch::new(batch.schema().clone(), batch.rows()[..n].to_vec()).context(RowsSnafu)?
        }
        _ => batch.clone(),
    };

    match format {
        OutputFormat::Table => {
            let record_batch = shown.to_record_batch().context(RowsSnafu)?;
            let rendered = arrow::util::pretty::pretty_format_batches(&[record_batch])
                .context(RenderSnafu)?;
            let mut out = rendered.to_string();
            out.push('\n');
            if shown.num_rows() < batch.num_rows() {
                out.push_str(&format!(
                    "({} of {} rows shown)\n",
                    shown.num_rows(),
                    batch.num_rows()
                ));
            }
            Ok(out)
        }
        OutputFormat::Jsonl => {
            let mut out = String::new();
            for row in shown.rows() {
                let object: serde_json::Map<String, serde_json::Value> = shown
                    .schema()
                    .column_names()
                    .zip(row)
                    .map(|(name, value)| {
                        serde_json::to_value(value).map(|v| (name.to_string(), v))
                    })
                    .collect::<Result<_, _>>()
                    .context(EncodeOutputSnafu)?;
                out.push_str(&serde_json::to_string(&object).context(EncodeOutputSnafu)?);
                out.push('\n');
            }
            Ok(out)
        }
    }
}

fn history_json(entry: &CommitSummary) -> serde_json::Value {
    serde_json::json!({
        "version": entry.version,
        "timestamp": entry.timestamp.to_rfc3339(),
        "operation": entry.operation.to_string(),
        "predicate": entry.predicate,
        "read_version": entry.read_version,
        "files_added": entry.files_added,
        "files_removed": entry.files_removed,
        "operation_metrics": entry.operation_metrics,
    })
}

/// Render commit history, newest first.
pub fn render_history(history: &[CommitSummary], format: OutputFormat) -> CliResult<String> {
    let mut out = String::new();
    for entry in history {
        let line = match format {
            OutputFormat::Jsonl => {
                serde_json::to_string(&history_json(entry)).context(EncodeOutputSnafu)?
            }
            OutputFormat::Table => {
                let metrics = entry
                    .operation_metrics
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!(
                    "{:>4}  {}  {:<13} +{} -{}  {}  {}",
                    entry.version,
                    entry.timestamp.to_rfc3339(),
                    entry.operation.to_string(),
                    entry.files_added,
                    entry.files_removed,
                    entry.predicate.as_deref().unwrap_or("-"),
                    metrics
                )
            }
        };
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

/// Render the latest table state as `key: value` lines.
pub fn render_detail(detail: &TableDetail) -> String {
    let columns = detail
        .schema
        .columns()
        .iter()
        .map(|f| {
            format!(
                "{}:{}{}",
                f.name,
                f.data_type,
                if f.nullable { "" } else { "!" }
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    let mut out = String::new();
    out.push_str(&format!("location: {}\n", detail.location));
    out.push_str(&format!("version: {}\n", detail.version));
    out.push_str(&format!("created_at: {}\n", detail.created_at.to_rfc3339()));
    out.push_str(&format!(
        "last_modified: {}\n",
        detail.last_modified.to_rfc3339()
    ));
    out.push_str(&format!("format_version: {}\n", detail.format_version));
    out.push_str(&format!("schema: {columns}\n"));
    out.push_str(&format!(
        "partition_columns: {}\n",
        detail.partition_columns.join(", ")
    ));
    out.push_str(&format!("num_files: {}\n", detail.num_files));
    out.push_str(&format!("num_rows: {}\n", detail.num_rows));
    out.push_str(&format!("size_bytes: {}\n", detail.size_bytes));
    for (key, value) in &detail.properties {
        out.push_str(&format!("property.{key}: {value}\n"));
    }
    out
}

pub fn render_optimize(metrics: &OptimizeMetrics) -> String {
    match metrics.version {
        Some(version) => format!(
            "Optimized {} partitions at version {version}: {} files -> {} files ({} rows)\n",
            metrics.partitions_optimized,
            metrics.files_removed,
            metrics.files_added,
            metrics.rows_rewritten
        ),
        None => "Nothing to optimize\n".to_string(),
    }
}

pub fn render_vacuum(metrics: &VacuumMetrics) -> String {
    let mut out = String::new();
    if metrics.dry_run {
        out.push_str(&format!("Would delete {} files\n", metrics.paths.len()));
    } else {
        out.push_str(&format!(
            "Deleted {} files ({} bytes)\n",
            metrics.deleted_files, metrics.deleted_bytes
        ));
    }
    for path in &metrics.paths {
        out.push_str(&format!("  {path}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse_schema, rows_from_jsonl};

    fn batch() -> RowBatch {
        let schema = parse_schema("id:int64!,state:utf8").expect("schema");
        rows_from_jsonl(
            "{\"id\":1,\"state\":\"CA\"}\n{\"id\":2}\n{\"id\":3,\"state\":\"NY\"}",
            &schema,
        )
        .expect("rows")
    }

    #[test]
    fn jsonl_rows_keep_nulls() {
        let out = render_rows(&batch(), OutputFormat::Jsonl, None).expect("render");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "{\"id\":2,\"state\":null}");
    }

    #[test]
    fn table_output_respects_limit() {
        let out = render_rows(&batch(), OutputFormat::Table, Some(2)).expect("render");
        assert!(out.contains("| CA"), "{out}");
        assert!(!out.contains("NY"), "{out}");
        assert!(out.contains("(2 of 3 rows shown)"), "{out}");
    }
}
