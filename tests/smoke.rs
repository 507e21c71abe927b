//! Smoke tests -- verify the binary runs and key subcommands exist.

use assert_cmd::Command;

#[test]
fn test_cli_help() {
    Command::cargo_bin("logwarden")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains(
            "Self-retraining anomaly detection",
        ));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("logwarden")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("logwarden"));
}

#[test]
fn test_train_subcommand_exists() {
    Command::cargo_bin("logwarden")
        .unwrap()
        .args(["train", "--help"])
        .assert()
        .success();
}

#[test]
fn test_rollback_subcommand_exists() {
    Command::cargo_bin("logwarden")
        .unwrap()
        .args(["rollback", "--help"])
        .assert()
        .success();
}

#[test]
fn test_recent_on_fresh_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("smoke.db");
    Command::cargo_bin("logwarden")
        .unwrap()
        .args(["recent", "--db", db.to_str().unwrap()])
        .assert()
        .success();
}

#[test]
fn test_purge_on_fresh_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("smoke.db");
    Command::cargo_bin("logwarden")
        .unwrap()
        .args(["purge", "--db", db.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicates::str::contains("Purged 0"));
}
