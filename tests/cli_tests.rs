//! Smoke tests for the dirsweep binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn dirsweep() -> Command {
    Command::cargo_bin("dirsweep").unwrap()
}

#[test]
fn unknown_flag_is_a_usage_error() {
    dirsweep()
        .arg("--definitely-not-a-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn invalid_directory_is_fatal() {
    dirsweep()
        .args(["-d", "/nonexistent/deeply/nested", "-w", "-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a valid directory"));
}

#[test]
fn scan_creates_the_state_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("hello"), b"Hello, world!\n").unwrap();

    dirsweep()
        .args(["-d", dir.path().to_str().unwrap(), "-w", "-1"])
        .assert()
        .success();

    assert!(dir.path().join(dirsweep::STATE_FILE).is_file());
}

#[test]
fn dry_run_writes_no_state() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("hello"), b"Hello, world!\n").unwrap();

    dirsweep()
        .args(["-d", dir.path().to_str().unwrap(), "-w", "-1", "-n"])
        .assert()
        .success();

    assert!(!dir.path().join(dirsweep::STATE_FILE).exists());
    assert!(dir.path().join("hello").exists());
}

#[test]
fn past_limit_deletes_by_default() {
    let dir = TempDir::new().unwrap();
    let hello = dir.path().join("hello");
    fs::write(&hello, b"Hello, world!\n").unwrap();

    let args = ["-d", dir.path().to_str().unwrap(), "-w", "0"];

    // First run begins tracking; the second finds the entry past the
    // zero-day ceiling and removes it.
    dirsweep().args(args).assert().success();
    assert!(hello.exists());

    dirsweep().args(args).assert().success();
    assert!(!hello.exists());
}

#[test]
fn ages_mode_lists_and_preserves() {
    let dir = TempDir::new().unwrap();
    let hello = dir.path().join("hello");
    fs::write(&hello, b"Hello, world!\n").unwrap();

    let args = ["-d", dir.path().to_str().unwrap(), "-w", "7", "-A"];

    dirsweep().args(args).assert().success();
    dirsweep()
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("hello").and(predicate::str::contains("0.0")));

    assert!(hello.exists());
}

#[test]
fn status_mode_prints_event_lines() {
    let dir = TempDir::new().unwrap();
    let hello = dir.path().join("hello");
    fs::write(&hello, b"Hello, world!\n").unwrap();

    dirsweep()
        .args(["-d", dir.path().to_str().unwrap(), "-w", "-1", "-u"])
        .assert()
        .success()
        .stdout(predicate::str::contains("A ").and(predicate::str::contains("hello")));
}

#[test]
fn version_flag_reports_the_binary() {
    dirsweep()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dirsweep"));
}
