//! Basic CLI tests for the nativebridge command-line interface.

use assert_cmd::Command;
use predicates::prelude::*;

fn nativebridge() -> Command {
    let mut cmd = Command::cargo_bin("nativebridge").unwrap();
    cmd.env_remove("NATIVEBRIDGE_EXTENSION_PATH");
    cmd
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    nativebridge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("info"))
        .stdout(predicate::str::contains("call"));
}

/// Test that the CLI shows version information.
#[test]
fn test_cli_version() {
    nativebridge()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("nativebridge"));
}

/// Test that providing no subcommand shows an error.
#[test]
fn test_no_subcommand_shows_error() {
    nativebridge().assert().failure();
}

#[test]
fn test_resolve_unknown_extension_fails() {
    let dir = tempfile::tempdir().unwrap();
    nativebridge()
        .current_dir(dir.path())
        .args(["resolve", "does-not-exist"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_resolve_finds_library_in_extensions_dir() {
    let dir = tempfile::tempdir().unwrap();
    let ext_dir = dir.path().join("extensions");
    std::fs::create_dir(&ext_dir).unwrap();
    let file_name = format!(
        "{}battery{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    );
    std::fs::write(ext_dir.join(&file_name), b"").unwrap();

    nativebridge()
        .current_dir(dir.path())
        .args(["resolve", "battery"])
        .assert()
        .success()
        .stdout(predicate::str::contains(file_name));
}

#[test]
fn test_list_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    nativebridge()
        .current_dir(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No extensions found"));
}

#[test]
fn test_malformed_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bridge.toml");
    std::fs::write(&config, "search_dirs = 5").unwrap();

    nativebridge()
        .arg("--config")
        .arg(&config)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_call_rejects_non_array_args() {
    let dir = tempfile::tempdir().unwrap();
    nativebridge()
        .current_dir(dir.path())
        .args(["call", "battery", "getLevel", "--args", "{}"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON array"));
}
