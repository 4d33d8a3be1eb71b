//! Integration tests for the corral CLI.
//!
//! These run the real binary against an isolated state directory and check
//! output and exit codes. None of them need a container backend: every case
//! fails or finishes before the runtime is contacted.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the corral binary.
#[allow(deprecated)]
fn corral() -> Command {
    Command::cargo_bin("corral").expect("failed to find corral binary")
}

/// Creates a Command whose config and state live under `dir`.
fn corral_in(dir: &TempDir) -> Command {
    let mut cmd = corral();
    cmd.current_dir(dir.path())
        .env("CORRAL_CONFIG", dir.path().join("config.toml"))
        .env("CORRAL_STATE_DIR", dir.path().join("state"))
        .env_remove("RUST_LOG");
    cmd
}

fn write_record(dir: &TempDir, name: &str, content: &str) {
    let records = dir.path().join("state/sandboxes");
    fs::create_dir_all(&records).unwrap();
    fs::write(records.join(format!("{name}.json")), content).unwrap();
}

// -----------------------------------------------------------------------------
// Help and version
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    let mut assert = corral().arg("--help").assert().success();
    for command in [
        "up", "down", "start", "stop", "reset", "gc", "ps", "status", "exec", "shell", "logs",
        "net", "monitor",
    ] {
        assert = assert.stdout(predicate::str::contains(command));
    }
}

#[test]
fn test_version_shows_version() {
    corral()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("corral"));
}

#[test]
fn test_up_help_shows_options() {
    corral()
        .args(["up", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--template"))
        .stdout(predicate::str::contains("--mode"))
        .stdout(predicate::str::contains("--path"));
}

#[test]
fn test_gc_help_shows_force() {
    corral()
        .args(["gc", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--force"));
}

// -----------------------------------------------------------------------------
// Usage errors (exit 2)
// -----------------------------------------------------------------------------

#[test]
fn test_exec_requires_command() {
    let dir = TempDir::new().unwrap();
    corral_in(&dir).args(["exec", "alpha"]).assert().code(2);
}

#[test]
fn test_net_rejects_unknown_policy() {
    let dir = TempDir::new().unwrap();
    corral_in(&dir)
        .args(["net", "alpha", "--policy", "firewall"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown network policy"));
}

#[test]
fn test_up_rejects_unknown_mode() {
    let dir = TempDir::new().unwrap();
    corral_in(&dir)
        .args(["up", "alpha", "--mode", "svn"])
        .assert()
        .code(2);
}

// -----------------------------------------------------------------------------
// Validation errors (exit 3)
// -----------------------------------------------------------------------------

#[test]
fn test_up_rejects_invalid_name() {
    let dir = TempDir::new().unwrap();
    corral_in(&dir)
        .args(["up", "bad;name"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid request"));
    assert!(!dir.path().join("state/sandboxes/bad;name.json").exists());
}

#[test]
fn test_up_rejects_unknown_template() {
    let dir = TempDir::new().unwrap();
    corral_in(&dir)
        .args(["up", "alpha", "--template", "nope"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("unknown template 'nope'"));
}

#[test]
fn test_down_rejects_path_traversal() {
    let dir = TempDir::new().unwrap();
    corral_in(&dir).args(["down", "../etc"]).assert().code(3);
}

// -----------------------------------------------------------------------------
// Not found (exit 4)
// -----------------------------------------------------------------------------

#[test]
fn test_down_missing_sandbox_is_not_found() {
    let dir = TempDir::new().unwrap();
    corral_in(&dir)
        .args(["down", "ghost"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Sandbox not found: ghost"));
}

#[test]
fn test_lifecycle_commands_on_missing_sandbox() {
    let dir = TempDir::new().unwrap();
    for args in [
        vec!["start", "ghost"],
        vec!["stop", "ghost"],
        vec!["reset", "ghost"],
        vec!["status", "ghost"],
        vec!["logs", "ghost"],
        vec!["net", "ghost", "--policy", "deny"],
        vec!["exec", "ghost", "--", "true"],
    ] {
        corral_in(&dir).args(&args).assert().code(4);
    }
}

// -----------------------------------------------------------------------------
// Config errors (exit 8)
// -----------------------------------------------------------------------------

#[test]
fn test_malformed_config_is_config_error() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.toml"), "[network\nslot_min = ").unwrap();
    corral_in(&dir).arg("ps").assert().code(8);
}

#[test]
fn test_invalid_slot_range_is_config_error() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("config.toml"),
        "[network]\nslot_min = 10\nslot_max = 5\n",
    )
    .unwrap();
    corral_in(&dir)
        .arg("ps")
        .assert()
        .code(8)
        .stderr(predicate::str::contains("Invalid slot range"));
}

#[test]
fn test_explicit_missing_config_is_config_error() {
    let dir = TempDir::new().unwrap();
    corral_in(&dir)
        .args(["--config", "does-not-exist.toml", "ps"])
        .assert()
        .code(8);
}

#[test]
fn test_corrupt_record_is_config_error() {
    let dir = TempDir::new().unwrap();
    write_record(&dir, "alpha", "{ not json");
    corral_in(&dir)
        .args(["status", "alpha"])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("malformed"));
}

// -----------------------------------------------------------------------------
// Listing
// -----------------------------------------------------------------------------

#[test]
fn test_ps_with_no_sandboxes() {
    let dir = TempDir::new().unwrap();
    corral_in(&dir)
        .arg("ps")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sandboxes"));
    assert!(dir.path().join("state/sandboxes").is_dir());
}

#[test]
fn test_ps_reports_unreadable_records() {
    let dir = TempDir::new().unwrap();
    write_record(&dir, "broken", "[]");
    corral_in(&dir)
        .arg("ps")
        .assert()
        .success()
        .stdout(predicate::str::contains("No sandboxes"))
        .stderr(predicate::str::contains("broken"));
}
