//! CLI tool for managing transactional tables.

mod error;
mod output;
mod parse;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use acid_table_core::{
    Predicate, RowBatch, Table,
    maintenance::{OptimizeOptions, VacuumOptions},
    storage::TableLocation,
    table::{
        CreateTableOptions, MatchedAction, MergeOptions, NotMatchedAction, ReadOptions,
        TableError, WriteMode, WriteOptions,
    },
    transaction_log::{LogicalSchema, TableConfig, VersionSpec},
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use futures::TryStreamExt;
use log::debug;
use snafu::ResultExt;

use crate::{
    error::{
        CliResult, CreateTableSnafu, InvalidPropertySnafu, OpenTableSnafu, RowsSnafu,
        TableOpSnafu,
    },
    output::OutputFormat,
    parse::{parse_assignment, parse_key_value, parse_predicate, parse_schema, rows_from_jsonl},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormatArg {
    Table,
    Jsonl,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(v: OutputFormatArg) -> Self {
        match v {
            OutputFormatArg::Table => OutputFormat::Table,
            OutputFormatArg::Jsonl => OutputFormat::Jsonl,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WriteModeArg {
    Append,
    Overwrite,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WhenMatchedArg {
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WhenNotMatchedArg {
    Insert,
    Ignore,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create an empty table (commits version 0)
    Create {
        #[arg(long)]
        table: PathBuf,

        /// Columns as name:type[!], comma separated; `!` marks NOT NULL.
        /// Types: bool, int64, float64, utf8
        #[arg(long)]
        schema: String,

        /// Repeatable partition column names
        #[arg(long = "partition-by")]
        partition_by: Vec<String>,

        /// Repeatable table property, key=value
        #[arg(long = "property")]
        property: Vec<String>,
    },

    /// Append (or overwrite with) rows from a JSON-lines file
    Write {
        #[arg(long)]
        table: PathBuf,

        /// JSON-lines input; `-` reads stdin
        #[arg(long)]
        input: PathBuf,

        #[arg(long, value_enum, default_value_t = WriteModeArg::Append)]
        mode: WriteModeArg,

        /// Add columns the table does not have yet
        #[arg(long = "evolve-schema", default_value_t = false)]
        evolve_schema: bool,
    },

    /// Read rows, optionally filtered and as of an older version
    Read {
        #[arg(long)]
        table: PathBuf,

        #[arg(long, conflicts_with_all = ["timestamp", "since_version"])]
        version: Option<u64>,

        /// Only rows appended after this version, up to the latest
        #[arg(long = "since-version", conflicts_with = "timestamp")]
        since_version: Option<u64>,

        /// RFC3339 timestamp, e.g. 2024-05-01T12:00:00Z
        #[arg(long)]
        timestamp: Option<DateTime<Utc>>,

        #[arg(long = "where")]
        filter: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormatArg::Table)]
        format: OutputFormatArg,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete rows matching a predicate
    Delete {
        #[arg(long)]
        table: PathBuf,

        #[arg(long = "where")]
        filter: String,
    },

    /// Set columns on rows matching a predicate
    Update {
        #[arg(long)]
        table: PathBuf,

        #[arg(long = "where")]
        filter: Option<String>,

        /// Repeatable column=literal
        #[arg(long = "set", required = true)]
        set: Vec<String>,
    },

    /// Upsert rows from a JSON-lines file keyed by one or more columns
    Merge {
        #[arg(long)]
        table: PathBuf,

        #[arg(long)]
        input: PathBuf,

        /// Repeatable key column
        #[arg(long = "on", required = true)]
        on: Vec<String>,

        #[arg(long = "when-matched", value_enum, default_value_t = WhenMatchedArg::Update)]
        when_matched: WhenMatchedArg,

        /// Restrict matched updates to these columns (repeatable)
        #[arg(long = "update-column")]
        update_column: Vec<String>,

        #[arg(long = "when-not-matched", value_enum, default_value_t = WhenNotMatchedArg::Insert)]
        when_not_matched: WhenNotMatchedArg,
    },

    /// Show the commit history, newest first
    History {
        #[arg(long)]
        table: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputFormatArg::Table)]
        format: OutputFormatArg,
    },

    /// Describe the latest version of the table
    Detail {
        #[arg(long)]
        table: PathBuf,
    },

    /// Compact small files, optionally clustering by Z-order
    Optimize {
        #[arg(long)]
        table: PathBuf,

        /// Repeatable Z-order column
        #[arg(long = "zorder-by")]
        zorder_by: Vec<String>,

        #[arg(long = "target-file-rows")]
        target_file_rows: Option<u64>,
    },

    /// Delete data files no longer referenced inside the retention window
    Vacuum {
        #[arg(long)]
        table: PathBuf,

        #[arg(long = "retain-hours")]
        retain_hours: Option<u64>,

        /// Allow retentions shorter than the table minimum
        #[arg(long = "no-retention-check", default_value_t = false)]
        no_retention_check: bool,

        #[arg(long = "dry-run", default_value_t = false)]
        dry_run: bool,
    },

    /// Change table properties
    SetProperty {
        #[arg(long)]
        table: PathBuf,

        /// key=value pairs
        #[arg(required = true)]
        properties: Vec<String>,
    },
}

#[derive(Debug, Parser)]
#[command(name = "acidtable", version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

fn table_name(table: &Path) -> String {
    table.display().to_string()
}

async fn open_table(table: &Path) -> CliResult<Table> {
    Table::open(TableLocation::local(table))
        .await
        .context(OpenTableSnafu {
            table: table_name(table),
        })
}

async fn latest_schema(t: &Table, table: &Path) -> CliResult<LogicalSchema> {
    let snapshot = t
        .snapshot(VersionSpec::Latest)
        .await
        .context(TableOpSnafu {
            op: "snapshot",
            table: table_name(table),
        })?;
    Ok(snapshot.schema().clone())
}

fn optional_predicate(filter: Option<&str>, schema: &LogicalSchema) -> CliResult<Predicate> {
    match filter {
        Some(f) => parse_predicate(f, schema),
        None => Ok(Predicate::True),
    }
}

fn load_rows(input: &Path, schema: &LogicalSchema) -> CliResult<RowBatch> {
    let text = parse::read_input(input)?;
    let rows = rows_from_jsonl(&text, schema)?;
    debug!("read {} rows from {}", rows.num_rows(), input.display());
    Ok(rows)
}

async fn cmd_create(
    table: &Path,
    schema: &str,
    partition_by: Vec<String>,
    properties: &[String],
) -> CliResult<()> {
    let schema = parse_schema(schema)?;
    let mut config = TableConfig::default();
    for prop in properties {
        let (key, value) = parse_key_value(prop)?;
        config
            .apply_property(&key, &value)
            .context(InvalidPropertySnafu)?;
    }

    Table::create(
        TableLocation::local(table),
        CreateTableOptions::new(schema)
            .with_partition_columns(partition_by)
            .with_config(config),
    )
    .await
    .context(CreateTableSnafu {
        table: table_name(table),
    })?;

    println!("Created table at {} (version 0)", table.display());
    Ok(())
}

async fn cmd_write(table: &Path, input: &Path, mode: WriteModeArg, evolve: bool) -> CliResult<()> {
    let t = open_table(table).await?;
    let schema = latest_schema(&t, table).await?;
    let rows = load_rows(input, &schema)?;
    let num_rows = rows.num_rows();

    let mut options = WriteOptions {
        mode: match mode {
            WriteModeArg::Append => WriteMode::Append,
            WriteModeArg::Overwrite => WriteMode::Overwrite,
        },
        ..WriteOptions::default()
    };
    if evolve {
        options = options.with_schema_evolution();
    }

    let version = t.write(rows, options).await.context(TableOpSnafu {
        op: "write",
        table: table_name(table),
    })?;
    println!("Wrote {num_rows} rows at version {version}");
    Ok(())
}

struct ReadArgs {
    table: PathBuf,
    version: Option<u64>,
    since_version: Option<u64>,
    timestamp: Option<DateTime<Utc>>,
    filter: Option<String>,
    format: OutputFormatArg,
    limit: Option<usize>,
}

async fn cmd_read(args: ReadArgs) -> CliResult<()> {
    let t = open_table(&args.table).await?;
    if let Some(since) = args.since_version {
        return cmd_read_appended(&t, since, &args).await;
    }
    let spec = match (args.version, args.timestamp) {
        (Some(v), _) => VersionSpec::Version(v),
        (None, Some(ts)) => VersionSpec::Timestamp(ts),
        (None, None) => VersionSpec::Latest,
    };
    // Literals are typed against the schema of the version being read.
    let snapshot = t.snapshot(spec).await.context(TableOpSnafu {
        op: "read",
        table: table_name(&args.table),
    })?;
    let predicate = optional_predicate(args.filter.as_deref(), snapshot.schema())?;

    let rows = t
        .read(ReadOptions {
            version: Some(snapshot.version),
            timestamp: None,
            predicate,
        })
        .await
        .context(TableOpSnafu {
            op: "read",
            table: table_name(&args.table),
        })?;
    print!(
        "{}",
        output::render_rows(&rows, args.format.into(), args.limit)?
    );
    Ok(())
}

async fn cmd_read_appended(t: &Table, since: u64, args: &ReadArgs) -> CliResult<()> {
    let table = table_name(&args.table);
    let (head, stream) = t
        .changes_since(since)
        .await
        .context(TableOpSnafu {
            op: "read",
            table: table.clone(),
        })?;
    let batches: Vec<RowBatch> = stream
        .try_collect()
        .await
        .map_err(TableError::from)
        .context(TableOpSnafu {
            op: "read",
            table: table.clone(),
        })?;

    let schema = latest_schema(t, &args.table).await?;
    let predicate = optional_predicate(args.filter.as_deref(), &schema)?;
    let rows = batches
        .iter()
        .flat_map(|b| b.project_onto(&schema).into_rows())
        .filter(|r| predicate.matches(&schema, r))
        .collect();
    let rows = RowBatch::new(schema, rows).context(RowsSnafu)?;
    debug!("{} rows appended after version {since} through {head}", rows.num_rows());

    let format = OutputFormat::from(args.format);
    print!("{}", output::render_rows(&rows, format, args.limit)?);
    if format == OutputFormat::Table {
        println!("(appended after version {since}, through version {head})");
    }
    Ok(())
}

async fn cmd_delete(table: &Path, filter: &str) -> CliResult<()> {
    let t = open_table(table).await?;
    let schema = latest_schema(&t, table).await?;
    let predicate = parse_predicate(filter, &schema)?;
    let version = t.delete(predicate).await.context(TableOpSnafu {
        op: "delete",
        table: table_name(table),
    })?;
    println!("Deleted at version {version}");
    Ok(())
}

async fn cmd_update(table: &Path, filter: Option<&str>, set: &[String]) -> CliResult<()> {
    let t = open_table(table).await?;
    let schema = latest_schema(&t, table).await?;
    let predicate = optional_predicate(filter, &schema)?;
    let assignments = set
        .iter()
        .map(|s| parse_assignment(s, &schema))
        .collect::<CliResult<BTreeMap<_, _>>>()?;

    let version = t
        .update(predicate, &assignments)
        .await
        .context(TableOpSnafu {
            op: "update",
            table: table_name(table),
        })?;
    println!("Updated at version {version}");
    Ok(())
}

struct MergeArgs {
    table: PathBuf,
    input: PathBuf,
    on: Vec<String>,
    when_matched: WhenMatchedArg,
    update_column: Vec<String>,
    when_not_matched: WhenNotMatchedArg,
}

async fn cmd_merge(args: MergeArgs) -> CliResult<()> {
    let t = open_table(&args.table).await?;
    let schema = latest_schema(&t, &args.table).await?;
    let source = load_rows(&args.input, &schema)?;

    let matched = match args.when_matched {
        WhenMatchedArg::Delete => MatchedAction::Delete,
        WhenMatchedArg::Update if args.update_column.is_empty() => MatchedAction::UpdateAll,
        WhenMatchedArg::Update => MatchedAction::UpdateColumns(args.update_column),
    };
    let not_matched = match args.when_not_matched {
        WhenNotMatchedArg::Insert => NotMatchedAction::InsertAll,
        WhenNotMatchedArg::Ignore => NotMatchedAction::Ignore,
    };

    let version = t
        .merge(
            source,
            MergeOptions {
                on: args.on,
                matched,
                not_matched,
            },
        )
        .await
        .context(TableOpSnafu {
            op: "merge",
            table: table_name(&args.table),
        })?;
    println!("Merged at version {version}");
    Ok(())
}

async fn cmd_history(table: &Path, format: OutputFormatArg) -> CliResult<()> {
    let t = open_table(table).await?;
    let history = t.history().await.context(TableOpSnafu {
        op: "history",
        table: table_name(table),
    })?;
    print!("{}", output::render_history(&history, format.into())?);
    Ok(())
}

async fn cmd_detail(table: &Path) -> CliResult<()> {
    let t = open_table(table).await?;
    let detail = t.detail().await.context(TableOpSnafu {
        op: "detail",
        table: table_name(table),
    })?;
    print!("{}", output::render_detail(&detail));
    Ok(())
}

async fn cmd_optimize(
    table: &Path,
    zorder_by: Vec<String>,
    target_file_rows: Option<u64>,
) -> CliResult<()> {
    let t = open_table(table).await?;
    let metrics = t
        .optimize(OptimizeOptions {
            zorder_by,
            target_file_rows,
        })
        .await
        .context(TableOpSnafu {
            op: "optimize",
            table: table_name(table),
        })?;
    print!("{}", output::render_optimize(&metrics));
    Ok(())
}

async fn cmd_vacuum(
    table: &Path,
    retain_hours: Option<u64>,
    no_retention_check: bool,
    dry_run: bool,
) -> CliResult<()> {
    let t = open_table(table).await?;
    let options = VacuumOptions {
        retention_hours: retain_hours,
        enforce_retention_duration: !no_retention_check,
        dry_run,
    };
    let metrics = t.vacuum(options).await.context(TableOpSnafu {
        op: "vacuum",
        table: table_name(table),
    })?;
    print!("{}", output::render_vacuum(&metrics));
    Ok(())
}

async fn cmd_set_property(table: &Path, properties: &[String]) -> CliResult<()> {
    let t = open_table(table).await?;
    let properties = properties
        .iter()
        .map(|p| parse_key_value(p))
        .collect::<CliResult<BTreeMap<_, _>>>()?;
    let version = t.set_properties(&properties).await.context(TableOpSnafu {
        op: "set-property",
        table: table_name(table),
    })?;
    println!("Set properties at version {version}");
    Ok(())
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Create {
            table,
            schema,
            partition_by,
            property,
        } => cmd_create(&table, &schema, partition_by, &property).await,

        Command::Write {
            table,
            input,
            mode,
            evolve_schema,
        } => cmd_write(&table, &input, mode, evolve_schema).await,

        Command::Read {
            table,
            version,
            since_version,
            timestamp,
            filter,
            format,
            limit,
        } => {
            cmd_read(ReadArgs {
                table,
                version,
                since_version,
                timestamp,
                filter,
                format,
                limit,
            })
            .await
        }

        Command::Delete { table, filter } => cmd_delete(&table, &filter).await,

        Command::Update { table, filter, set } => {
            cmd_update(&table, filter.as_deref(), &set).await
        }

        Command::Merge {
            table,
            input,
            on,
            when_matched,
            update_column,
            when_not_matched,
        } => {
            cmd_merge(MergeArgs {
                table,
                input,
                on,
                when_matched,
                update_column,
                when_not_matched,
            })
            .await
        }

        Command::History { table, format } => cmd_history(&table, format).await,

        Command::Detail { table } => cmd_detail(&table).await,

        Command::Optimize {
            table,
            zorder_by,
            target_file_rows,
        } => cmd_optimize(&table, zorder_by, target_file_rows).await,

        Command::Vacuum {
            table,
            retain_hours,
            no_retention_check,
            dry_run,
        } => cmd_vacuum(&table, retain_hours, no_retention_check, dry_run).await,

        Command::SetProperty { table, properties } => {
            cmd_set_property(&table, &properties).await
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
