//! Integration tests for the `date-recur` CLI binary.
//!
//! These tests use `assert_cmd` and `predicates` to exercise the occurrences,
//! validate, range and query subcommands through the actual binary, including
//! config loading, file I/O and error handling.

// `Command::cargo_bin` was deprecated in assert_cmd 2.1.2 in favor of
// `cargo::cargo_bin_cmd!`. Allow it until we migrate.
#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn values_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/values.json")
}

fn grid_config_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/grid.toml")
}

/// The binary with a clean environment, so a developer's config or RUST_LOG
/// does not leak into the tests.
fn cli() -> Command {
    let mut cmd = Command::cargo_bin("date-recur").unwrap();
    cmd.env_remove("DATE_RECUR_CONFIG").env_remove("RUST_LOG");
    cmd
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("binary should run");
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

// ─────────────────────────────────────────────────────────────────────────────
// occurrences
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn occurrences_weekly_count() {
    let json = stdout_json(cli().args([
        "occurrences",
        "--start",
        "2024-01-01T09:00:00",
        "--end",
        "2024-01-01T10:00:00",
        "--rrule",
        "FREQ=WEEKLY;BYDAY=MO,WE,FR;COUNT=6",
    ]));

    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 6);
    assert_eq!(items[0]["start"], "2024-01-01T09:00:00Z");
    assert_eq!(items[0]["end"], "2024-01-01T10:00:00Z");
    assert_eq!(items[5]["start"], "2024-01-12T09:00:00Z");
}

#[test]
fn occurrences_keep_local_time_across_dst() {
    let json = stdout_json(cli().args([
        "occurrences",
        "--start",
        "2026-03-28T10:00:00+01:00",
        "--timezone",
        "Europe/Berlin",
        "--rrule",
        "FREQ=DAILY;COUNT=2",
    ]));

    assert_eq!(json[0]["start"], "2026-03-28T09:00:00Z");
    assert_eq!(json[1]["start"], "2026-03-29T08:00:00Z");
}

#[test]
fn occurrences_without_rule_is_single() {
    let json = stdout_json(cli().args(["occurrences", "--start", "2024-05-01T18:00:00"]));
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[test]
fn occurrences_range_and_limit() {
    let json = stdout_json(cli().args([
        "occurrences",
        "--start",
        "2024-01-01T09:00:00",
        "--rrule",
        "FREQ=DAILY",
        "--from",
        "2024-01-10T00:00:00",
        "--until",
        "2024-02-01T00:00:00",
        "--limit",
        "3",
    ]));

    let items = json.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["start"], "2024-01-10T09:00:00Z");
}

#[test]
fn occurrences_infinite_without_bound_fails() {
    cli()
        .args(["occurrences", "--start", "2024-01-01T09:00:00", "--rrule", "FREQ=DAILY"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires a range end or a limit"));
}

#[test]
fn occurrences_malformed_rule_fails() {
    cli()
        .args([
            "occurrences",
            "--start",
            "2024-01-01T09:00:00",
            "--rrule",
            "FREQ=DAILY;COUNT=2;UNTIL=20240301T000000Z",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid --rrule"));
}

#[test]
fn occurrences_bad_timezone_fails() {
    cli()
        .args(["occurrences", "--start", "2024-01-01T09:00:00", "--timezone", "Mars/Base"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid --timezone"));
}

#[test]
fn occurrences_write_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.json");

    cli()
        .args([
            "occurrences",
            "--start",
            "2024-01-01T09:00:00",
            "--rrule",
            "FREQ=YEARLY;COUNT=3",
            "-o",
            path.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written.as_array().unwrap().len(), 3);
}

#[test]
fn occurrences_apply_part_grid_from_config() {
    // MONTHLY allows only COUNT and BYDAY here, so INTERVAL=2 is dropped.
    let json = stdout_json(cli().args([
        "--config",
        grid_config_path(),
        "occurrences",
        "--start",
        "2024-01-15T09:00:00",
        "--rrule",
        "FREQ=MONTHLY;INTERVAL=2;COUNT=2",
    ]));
    assert_eq!(json[1]["start"], "2024-02-15T09:00:00Z");
}

// ─────────────────────────────────────────────────────────────────────────────
// validate
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn validate_normalizes_rule() {
    let json = stdout_json(cli().args(["validate", "--rrule", "rrule:freq=weekly;byday=mo,fr"]));

    assert_eq!(json["rule"], "FREQ=WEEKLY;BYDAY=MO,FR");
    assert_eq!(json["filtered"], "FREQ=WEEKLY;BYDAY=MO,FR");
    assert_eq!(json["frequency"], "WEEKLY");
    assert_eq!(json["infinite"], true);
    assert_eq!(json["dropped"], serde_json::json!([]));
}

#[test]
fn validate_reports_dropped_parts() {
    let json = stdout_json(cli().args([
        "validate",
        "--config",
        grid_config_path(),
        "--rrule",
        "FREQ=MONTHLY;INTERVAL=2;BYDAY=-1FR;COUNT=3",
    ]));

    assert_eq!(json["filtered"], "FREQ=MONTHLY;BYDAY=-1FR;COUNT=3");
    assert_eq!(json["dropped"], serde_json::json!(["INTERVAL"]));
    assert_eq!(json["infinite"], false);
}

#[test]
fn validate_rejects_count_with_until() {
    cli()
        .args(["validate", "--rrule", "FREQ=DAILY;COUNT=5;UNTIL=20240101"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid RRULE"))
        .stderr(predicate::str::contains("COUNT"));
}

// ─────────────────────────────────────────────────────────────────────────────
// range
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn range_month_in_berlin() {
    let json = stdout_json(cli().args([
        "range",
        "--granularity",
        "month",
        "--input",
        "2023-09",
        "--timezone",
        "Europe/Berlin",
    ]));

    assert_eq!(json["granularity"], "month");
    assert_eq!(json["smallest"], "2023-08-31T22:00:00Z");
    assert_eq!(json["largest"], "2023-09-30T21:59:59.999999Z");
}

#[test]
fn range_bad_input_echoes_format() {
    cli()
        .args(["range", "--granularity", "day", "--input", "2023-9-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("YYYY-MM-DD"));
}

#[test]
fn range_unknown_granularity_fails() {
    cli()
        .args(["range", "--granularity", "week", "--input", "2023-09"])
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// query
// ─────────────────────────────────────────────────────────────────────────────

fn query(extra: &[&str]) -> Value {
    let mut cmd = cli();
    cmd.args(["query", "-i", values_path(), "--now", "2023-01-01T00:00:00"])
        .args(extra);
    stdout_json(&mut cmd)
}

#[test]
fn query_month_in_berlin() {
    let ids = query(&["--granularity", "month", "--input", "2023-09", "--timezone", "Europe/Berlin"]);
    assert_eq!(ids, serde_json::json!([1, 3, 5]));
}

#[test]
fn query_month_in_utc_includes_late_evening_value() {
    let ids = query(&["--granularity", "month", "--input", "2023-09"]);
    assert_eq!(ids, serde_json::json!([1, 2, 3, 5]));
}

#[test]
fn query_explicit_window_is_inclusive() {
    let ids = query(&["--from", "2023-01-01T00:00:00", "--to", "2023-01-01T00:00:00"]);
    assert_eq!(ids, serde_json::json!([4]));
}

#[test]
fn query_finds_long_running_weekly_value_at_present() {
    // Over 100 weekly occurrences lie before September 2023; the row cap from the
    // config does not hide them since the precreate window bounds the rule.
    let ids = query(&[
        "--config",
        grid_config_path(),
        "--granularity",
        "month",
        "--input",
        "2023-09",
        "--timezone",
        "Europe/Berlin",
    ]);
    assert_eq!(ids, serde_json::json!([1, 3, 5]));
}

#[test]
fn query_precreate_window_from_config() {
    // June 2024 is inside the default P2Y window but past the configured P1Y.
    let ids = query(&["--granularity", "month", "--input", "2024-06"]);
    assert_eq!(ids, serde_json::json!([5]));

    let ids = query(&["--config", grid_config_path(), "--granularity", "month", "--input", "2024-06"]);
    assert_eq!(ids, serde_json::json!([]));
}

#[test]
fn query_reads_stdin() {
    let records = r#"[{"entity_id": 9, "columns": {"value": "2024-02-29T12:00:00", "timezone": "UTC"}}]"#;
    cli()
        .args(["query", "--granularity", "day", "--input", "2024-02-29"])
        .write_stdin(records)
        .assert()
        .success()
        .stdout(predicate::str::contains("[9]"));
}

#[test]
fn query_needs_a_window() {
    cli()
        .args(["query", "-i", values_path()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--granularity"));
}

#[test]
fn query_rejects_invalid_records() {
    let records = r#"[{"entity_id": 1, "columns": {"value": "2024-02-29T12:00:00"}}]"#;
    cli()
        .args(["query", "--from", "2024-01-01T00:00:00", "--to", "2024-12-31T00:00:00"])
        .write_stdin(records)
        .assert()
        .failure()
        .stderr(predicate::str::contains("entity 1"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Global options
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn missing_config_file_fails() {
    cli()
        .args(["--config", "/nonexistent/date-recur.toml", "validate", "--rrule", "FREQ=DAILY"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn config_from_environment() {
    let json = stdout_json(
        cli()
            .env("DATE_RECUR_CONFIG", grid_config_path())
            .args(["validate", "--rrule", "FREQ=MONTHLY;INTERVAL=2"]),
    );
    assert_eq!(json["filtered"], "FREQ=MONTHLY");
}

#[test]
fn invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "precreate = \"soon\"\n").unwrap();

    cli()
        .args(["--config", path.to_str().unwrap(), "validate", "--rrule", "FREQ=DAILY"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config file"));
}

#[test]
fn verbose_logs_to_stderr() {
    cli()
        .args(["-vv", "validate", "--rrule", "FREQ=DAILY"])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed recurrence rule"));
}

#[test]
fn help_flag_shows_usage() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("occurrences"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("range"))
        .stdout(predicate::str::contains("query"));
}

#[test]
fn unknown_subcommand_fails() {
    cli().arg("frobnicate").assert().failure();
}
