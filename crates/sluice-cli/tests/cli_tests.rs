//! End-to-end tests for the sluice binary
//!
//! Only the in-memory store is exercised here; the PostgreSQL store has its
//! own container-backed tests in sluice-coordination.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn sluice() -> Command {
    let mut cmd = Command::cargo_bin("sluice").expect("binary should build");
    cmd.env_remove("DATABASE_URL").env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_help_lists_commands() {
    sluice()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_no_arguments_prints_help() {
    sluice()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_simulate_completes_all_partitions() {
    sluice()
        .args([
            "simulate",
            "--nodes",
            "3",
            "--partitions",
            "6",
            "--poll-interval-ms",
            "20",
            "--admission",
            "disabled",
        ])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("All 6 partitions completed"))
        .stdout(predicate::str::contains("node-2"));
}

#[test]
fn test_simulate_recovers_from_crashed_node() {
    sluice()
        .args([
            "simulate",
            "--nodes",
            "2",
            "--partitions",
            "4",
            "--poll-interval-ms",
            "20",
            "--lease-secs",
            "1",
            "--admission",
            "disabled",
            "--crash-first-node",
        ])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("All 4 partitions completed"));
}

#[test]
fn test_simulate_with_seeded_admission() {
    sluice()
        .args([
            "simulate",
            "--nodes",
            "2",
            "--partitions",
            "3",
            "--poll-interval-ms",
            "50",
            "--admission",
            "identity-hash",
            "--seed",
            "7",
        ])
        .timeout(std::time::Duration::from_secs(90))
        .assert()
        .success();
}

#[test]
fn test_simulate_reads_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sluice.toml");
    fs::write(
        &path,
        r#"
source_identifier = "from-file"
partition_prefix = "team"

[admission]
mode = "disabled"
"#,
    )
    .unwrap();

    sluice()
        .args(["--config", path.to_str().unwrap()])
        .args(["simulate", "--nodes", "1", "--partitions", "2", "--poll-interval-ms", "20"])
        .timeout(std::time::Duration::from_secs(60))
        .assert()
        .success()
        .stdout(predicate::str::contains("team|from-file|PARTITION"));
}

#[test]
fn test_simulate_rejects_zero_nodes() {
    sluice()
        .args(["simulate", "--nodes", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least one node"));
}

#[test]
fn test_simulate_rejects_unknown_admission_mode() {
    sluice()
        .args(["simulate", "--admission", "sometimes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown admission mode"));
}

#[test]
fn test_simulate_rejects_invalid_source() {
    sluice()
        .args(["simulate", "--source", "bad|source"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_migrate_rejects_non_postgres_url() {
    sluice()
        .args(["migrate", "--database-url", "mysql://localhost/sluice"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("postgres://"));
}
