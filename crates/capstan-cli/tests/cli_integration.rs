//! CLI integration tests
//!
//! Tests the capstan CLI surface using assert_cmd.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn capstan() -> Command {
    Command::cargo_bin("capstan")
        .expect("Failed to locate capstan binary - ensure it's built before running tests")
}

/// Write a minimal valid config file and return its directory handle
fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deploy.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    (dir, path)
}

#[test]
fn test_cli_help() {
    capstan()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("capstan"))
        .stdout(predicate::str::contains(
            "Remote deployment orchestrator",
        ));
}

#[test]
fn test_cli_version() {
    capstan()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("capstan"));
}

#[test]
fn test_cli_deploy_help() {
    capstan()
        .args(["deploy", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pipeline"))
        .stdout(predicate::str::contains("--upload-only"));
}

#[test]
fn test_cli_probe_help() {
    capstan()
        .args(["probe", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("candidate"));
}

#[test]
fn test_cli_config_help() {
    capstan()
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_cli_unknown_command() {
    capstan()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_cli_config_path() {
    capstan()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy.toml"));
}

#[test]
fn test_cli_config_show_with_explicit_file() {
    let (_dir, path) = write_config(
        r#"
        [target]
        host = "203.0.113.7"
        user = "deployer"
        candidate_roots = ["/srv/app"]

        [target.auth]
        method = "private-key"
        key_path = "/tmp/none"

        [[artifacts]]
        local_path = "bundle.tar.gz"
        "#,
    );

    capstan()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("203.0.113.7"))
        .stdout(predicate::str::contains("candidate_roots"));
}

#[test]
fn test_cli_config_show_without_file_shows_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such.toml");

    capstan()
        .args(["config", "show", "--config"])
        .arg(&missing)
        .assert()
        .success()
        .stdout(predicate::str::contains("connect_timeout"));
}

#[test]
fn test_cli_deploy_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("no-such.toml");

    capstan()
        .args(["deploy", "--config"])
        .arg(&missing)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_cli_deploy_rejects_config_without_artifacts() {
    let (_dir, path) = write_config(
        r#"
        [target]
        host = "203.0.113.7"
        user = "deployer"
        candidate_roots = ["/srv/app"]

        [target.auth]
        method = "private-key"
        key_path = "/tmp/none"
        "#,
    );

    capstan()
        .args(["deploy", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid deployment config"));
}

#[test]
fn test_cli_probe_requires_candidates() {
    let (_dir, path) = write_config(
        r#"
        [target]
        host = "203.0.113.7"
        user = "deployer"

        [target.auth]
        method = "private-key"
        key_path = "/tmp/none"
        "#,
    );

    capstan()
        .args(["probe", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No candidate paths"));
}
