//! End-to-end CLI flows against a durable storage directory: issue, consume,
//! replay denial, metrics rebuilt from the WAL, export.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let storage = dir.join("state");
    let config_path = dir.join("writ.yaml");
    let config = format!(
        r#"
default_tier: T1
storage_dir: {}
gated_tools: [fs_write]
tiers:
  T1: [fs_write]
"#,
        storage.display()
    );
    std::fs::write(&config_path, config).unwrap();
    config_path
}

fn writ() -> Command {
    Command::cargo_bin("writ").unwrap()
}

#[test]
fn issue_consume_replay_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = writ()
        .args(["--config", config.to_str().unwrap()])
        .args(["issue", "--tool", "fs_write", "--session", "tg:alice"])
        .args(["--args", r#"{"path":"/notes/today.md"}"#])
        .output()
        .unwrap();
    assert!(output.status.success());
    let issued: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let token_id = issued["token_id"].as_str().unwrap().to_string();

    writ()
        .args(["--config", config.to_str().unwrap()])
        .args(["consume", "--token", &token_id])
        .args(["--tool", "fs_write", "--session", "tg:alice"])
        .args(["--args", r#"{"path":"/notes/today.md"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"allowed\": true"));

    // Replay: denied with E_ALREADY_CONSUMED and exit code 1.
    writ()
        .args(["--config", config.to_str().unwrap()])
        .args(["consume", "--token", &token_id])
        .args(["--tool", "fs_write", "--session", "tg:alice"])
        .args(["--args", r#"{"path":"/notes/today.md"}"#])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("E_ALREADY_CONSUMED"));
}

#[test]
fn metrics_are_rebuilt_from_the_wal() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    writ()
        .args(["--config", config.to_str().unwrap()])
        .args(["issue", "--tool", "fs_write", "--session", "tg:alice"])
        .args(["--context-hash", "sha256:h1"])
        .assert()
        .success();

    // A separate process sees the issuance through WAL replay.
    writ()
        .args(["--config", config.to_str().unwrap()])
        .arg("metrics")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"issues\": 1"));
}

#[test]
fn export_emits_ndjson_lines() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    writ()
        .args(["--config", config.to_str().unwrap()])
        .args(["issue", "--tool", "fs_write", "--session", "tg:alice"])
        .args(["--context-hash", "sha256:h1"])
        .assert()
        .success();

    let output = writ()
        .args(["--config", config.to_str().unwrap()])
        .arg("export")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.lines().count(), 1);
    let event: serde_json::Value = serde_json::from_str(stdout.lines().next().unwrap()).unwrap();
    assert_eq!(event["kind"], "issue");
}

#[test]
fn export_without_storage_fails_with_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("writ.yaml");
    std::fs::write(&config_path, "default_tier: T0\ngated_tools: [fs_write]\n").unwrap();

    writ()
        .args(["--config", config_path.to_str().unwrap()])
        .arg("export")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("export"));
}

#[test]
fn revoked_token_cannot_be_consumed_across_processes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = writ()
        .args(["--config", config.to_str().unwrap()])
        .args(["issue", "--tool", "fs_write", "--session", "tg:alice"])
        .args(["--context-hash", "sha256:h1"])
        .output()
        .unwrap();
    let issued: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let token_id = issued["token_id"].as_str().unwrap().to_string();

    writ()
        .args(["--config", config.to_str().unwrap()])
        .args(["revoke", "--jti", &token_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"revoked_count\": 1"));

    // Idempotent second revoke.
    writ()
        .args(["--config", config.to_str().unwrap()])
        .args(["revoke", "--jti", &token_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"revoked_count\": 0"));

    writ()
        .args(["--config", config.to_str().unwrap()])
        .args(["consume", "--token", &token_id])
        .args(["--tool", "fs_write", "--session", "tg:alice"])
        .args(["--context-hash", "sha256:h1"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("E_REVOKED"));
}
