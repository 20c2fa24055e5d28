//! Integration tests for the CLI binary.
#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_acidtable"))
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn create_loans(tmp: &TempDir) -> PathBuf {
    let table = tmp.path().join("loans");
    cli()
        .args([
            "create",
            "--table",
            &path_arg(&table),
            "--schema",
            "loan_id:int64!,addr_state:utf8,amount:float64",
            "--partition-by",
            "addr_state",
        ])
        .assert()
        .success()
        .stdout(contains("Created table at"));
    table
}

fn write_jsonl(tmp: &TempDir, name: &str, lines: &[&str]) -> Result<PathBuf, std::io::Error> {
    let path = tmp.path().join(name);
    std::fs::write(&path, lines.join("\n"))?;
    Ok(path)
}

fn seed(tmp: &TempDir, table: &Path) -> TestResult {
    let input = write_jsonl(
        tmp,
        "seed.jsonl",
        &[
            r#"{"loan_id": 1, "addr_state": "CA", "amount": 100}"#,
            r#"{"loan_id": 2, "addr_state": "WA", "amount": 200}"#,
            r#"{"loan_id": 3, "addr_state": "NY", "amount": 300}"#,
        ],
    )?;
    cli()
        .args(["write", "--table", &path_arg(table), "--input", &path_arg(&input)])
        .assert()
        .success()
        .stdout(contains("Wrote 3 rows at version 1"));
    Ok(())
}

fn read_jsonl(table: &Path, extra: &[&str]) -> Result<String, Box<dyn std::error::Error>> {
    let mut args = vec![
        "read".to_string(),
        "--table".to_string(),
        path_arg(table),
        "--format".to_string(),
        "jsonl".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    let output = cli().args(&args).output()?;
    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(String::from_utf8(output.stdout)?)
}

#[test]
fn create_write_and_filtered_read() -> TestResult {
    let tmp = TempDir::new()?;
    let table = create_loans(&tmp);
    seed(&tmp, &table)?;

    let ca = read_jsonl(&table, &["--where", "addr_state = 'CA'"])?;
    assert_eq!(ca.lines().count(), 1);
    assert!(ca.contains(r#""loan_id":1"#), "{ca}");

    cli()
        .args(["read", "--table", &path_arg(&table), "--where", "amount >= 200"])
        .assert()
        .success()
        .stdout(contains("WA"))
        .stdout(contains("NY"));
    Ok(())
}

#[test]
fn update_delete_and_history() -> TestResult {
    let tmp = TempDir::new()?;
    let table = create_loans(&tmp);
    seed(&tmp, &table)?;

    cli()
        .args([
            "update",
            "--table",
            &path_arg(&table),
            "--where",
            "addr_state = WA",
            "--set",
            "amount=0.5",
        ])
        .assert()
        .success()
        .stdout(contains("Updated at version 2"));
    cli()
        .args(["delete", "--table", &path_arg(&table), "--where", "loan_id = 3"])
        .assert()
        .success()
        .stdout(contains("Deleted at version 3"));

    let rows = read_jsonl(&table, &[])?;
    assert_eq!(rows.lines().count(), 2);
    assert!(rows.contains(r#""amount":0.5"#), "{rows}");

    cli()
        .args(["history", "--table", &path_arg(&table)])
        .assert()
        .success()
        .stdout(contains("DELETE"))
        .stdout(contains("UPDATE"))
        .stdout(contains("CREATE TABLE"));
    Ok(())
}

#[test]
fn merge_from_stdin_upserts() -> TestResult {
    let tmp = TempDir::new()?;
    let table = create_loans(&tmp);
    seed(&tmp, &table)?;

    cli()
        .args(["merge", "--table", &path_arg(&table), "--input", "-", "--on", "loan_id"])
        .write_stdin(
            "{\"loan_id\": 1, \"addr_state\": \"CA\", \"amount\": 999}\n\
             {\"loan_id\": 4, \"addr_state\": \"TX\", \"amount\": 40}\n",
        )
        .assert()
        .success()
        .stdout(contains("Merged at version 2"));

    let rows = read_jsonl(&table, &[])?;
    assert_eq!(rows.lines().count(), 4);
    assert!(rows.contains(r#""amount":999.0"#), "{rows}");
    assert!(rows.contains(r#""addr_state":"TX""#), "{rows}");
    Ok(())
}

#[test]
fn time_travel_reads_older_versions() -> TestResult {
    let tmp = TempDir::new()?;
    let table = create_loans(&tmp);
    seed(&tmp, &table)?;
    cli()
        .args(["delete", "--table", &path_arg(&table), "--where", "loan_id IN (1, 2)"])
        .assert()
        .success();

    assert_eq!(read_jsonl(&table, &["--version", "0"])?.lines().count(), 0);
    assert_eq!(read_jsonl(&table, &["--version", "1"])?.lines().count(), 3);
    assert_eq!(read_jsonl(&table, &[])?.lines().count(), 1);

    cli()
        .args(["read", "--table", &path_arg(&table), "--version", "42"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn since_version_reads_only_newer_appends() -> TestResult {
    let tmp = TempDir::new()?;
    let table = create_loans(&tmp);
    seed(&tmp, &table)?;

    let more = write_jsonl(
        &tmp,
        "more.jsonl",
        &[r#"{"loan_id": 4, "addr_state": "TX", "amount": 40}"#],
    )?;
    cli()
        .args(["write", "--table", &path_arg(&table), "--input", &path_arg(&more)])
        .assert()
        .success();
    cli()
        .args(["delete", "--table", &path_arg(&table), "--where", "loan_id = 1"])
        .assert()
        .success();

    let appended = read_jsonl(&table, &["--since-version", "1"])?;
    assert_eq!(appended.lines().count(), 1, "{appended}");
    assert!(appended.contains(r#""loan_id":4"#), "{appended}");

    assert_eq!(read_jsonl(&table, &["--since-version", "3"])?.lines().count(), 0);
    assert_eq!(
        read_jsonl(&table, &["--since-version", "0", "--where", "amount > 150"])?
            .lines()
            .count(),
        2
    );

    cli()
        .args(["read", "--table", &path_arg(&table), "--since-version", "2"])
        .assert()
        .success()
        .stdout(contains("(appended after version 2, through version 3)"));
    cli()
        .args(["read", "--table", &path_arg(&table), "--since-version", "9"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn schema_evolution_requires_opt_in() -> TestResult {
    let tmp = TempDir::new()?;
    let table = create_loans(&tmp);
    let wide = write_jsonl(
        &tmp,
        "wide.jsonl",
        &[r#"{"loan_id": 7, "addr_state": "CA", "amount": 1.5, "zip_code": "94105"}"#],
    )?;

    cli()
        .args(["write", "--table", &path_arg(&table), "--input", &path_arg(&wide)])
        .assert()
        .failure()
        .stderr(contains("write failed"));

    cli()
        .args([
            "write",
            "--table",
            &path_arg(&table),
            "--input",
            &path_arg(&wide),
            "--evolve-schema",
        ])
        .assert()
        .success();

    cli()
        .args(["detail", "--table", &path_arg(&table)])
        .assert()
        .success()
        .stdout(contains("zip_code:utf8"))
        .stdout(contains("num_rows: 1"));
    Ok(())
}

#[test]
fn write_without_required_column_is_a_schema_mismatch() -> TestResult {
    let tmp = TempDir::new()?;
    let table = create_loans(&tmp);
    let input = write_jsonl(
        &tmp,
        "no_id.jsonl",
        &[r#"{"addr_state": "CA", "amount": 1}"#, r#"{"amount": 2.5}"#],
    )?;

    cli()
        .args(["write", "--table", &path_arg(&table), "--input", &path_arg(&input)])
        .assert()
        .failure()
        .stderr(contains("missing required column loan_id"));
    Ok(())
}

#[test]
fn optimize_then_vacuum() -> TestResult {
    let tmp = TempDir::new()?;
    let table = create_loans(&tmp);
    for i in 0..3 {
        let line = format!(r#"{{"loan_id": {i}, "addr_state": "CA", "amount": 1}}"#);
        let input = write_jsonl(&tmp, &format!("row{i}.jsonl"), &[line.as_str()])?;
        cli()
            .args(["write", "--table", &path_arg(&table), "--input", &path_arg(&input)])
            .assert()
            .success();
    }

    cli()
        .args(["optimize", "--table", &path_arg(&table)])
        .assert()
        .success()
        .stdout(contains("3 files -> 1 files"));

    cli()
        .args(["vacuum", "--table", &path_arg(&table), "--retain-hours", "0"])
        .assert()
        .failure()
        .stderr(contains("vacuum failed"));

    cli()
        .args([
            "vacuum",
            "--table",
            &path_arg(&table),
            "--retain-hours",
            "0",
            "--no-retention-check",
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(contains("Would delete 3 files"));

    cli()
        .args([
            "vacuum",
            "--table",
            &path_arg(&table),
            "--retain-hours",
            "0",
            "--no-retention-check",
        ])
        .assert()
        .success()
        .stdout(contains("Deleted 3 files"));

    assert_eq!(read_jsonl(&table, &[])?.lines().count(), 3);
    Ok(())
}

#[test]
fn properties_and_errors() -> TestResult {
    let tmp = TempDir::new()?;
    let table = create_loans(&tmp);

    cli()
        .args([
            "set-property",
            "--table",
            &path_arg(&table),
            "checkpoint_interval=2",
        ])
        .assert()
        .success()
        .stdout(contains("Set properties at version 1"));
    cli()
        .args(["detail", "--table", &path_arg(&table)])
        .assert()
        .success()
        .stdout(contains("property.checkpoint_interval: 2"));

    cli()
        .args(["read", "--table", &path_arg(&table), "--where", "zip = 1"])
        .assert()
        .failure()
        .stderr(contains("Invalid predicate"));

    cli()
        .args(["detail", "--table", &path_arg(&tmp.path().join("missing"))])
        .assert()
        .failure()
        .stderr(contains("Failed to open table"));
    Ok(())
}
