//! CLI integration tests for the Deskline command-line interface.
//!
//! These tests need no backend: they cover parsing, help output, and the
//! commands that work entirely from local state.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A deskline command isolated in its own config directory.
fn deskline(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("deskline").unwrap();
    cmd.env("DESKLINE_CONFIG_DIR", config_dir.path())
        .env_remove("DESKLINE_SERVER_URL");
    cmd
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    deskline(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("logout"))
        .stdout(predicate::str::contains("whoami"))
        .stdout(predicate::str::contains("request"))
        .stdout(predicate::str::contains("listen"));
}

#[test]
fn test_version_displays() {
    let dir = TempDir::new().unwrap();
    deskline(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("deskline"));
}

#[test]
fn test_login_requires_email() {
    let dir = TempDir::new().unwrap();
    deskline(&dir)
        .arg("login")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--email"));
}

#[test]
fn test_request_rejects_bad_method() {
    let dir = TempDir::new().unwrap();
    deskline(&dir)
        .args(["request", "NOT A METHOD", "leads"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid HTTP method"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Local State Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_whoami_without_session() {
    let dir = TempDir::new().unwrap();
    deskline(&dir)
        .arg("whoami")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_logout_without_session() {
    let dir = TempDir::new().unwrap();
    deskline(&dir)
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not logged in"));
}

#[test]
fn test_request_without_session() {
    let dir = TempDir::new().unwrap();
    deskline(&dir)
        .args(["request", "get", "leads"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_invalid_server_url_is_rejected() {
    let dir = TempDir::new().unwrap();
    deskline(&dir)
        .args(["--server", "ftp://example.com", "whoami"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("server.api_url"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = TempDir::new().unwrap();
    deskline(&dir)
        .args(["--config"])
        .arg(dir.path().join("absent.toml"))
        .arg("whoami")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}
