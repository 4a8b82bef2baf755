//! Binary-level tests that need no running redis-server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn missing_arguments_are_a_usage_error() {
    Command::cargo_bin("relock")
        .unwrap()
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn a_key_without_a_command_is_a_usage_error() {
    Command::cargo_bin("relock")
        .unwrap()
        .arg("job")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn version_flag_reports_the_tool_version() {
    Command::cargo_bin("relock")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unreachable_store_fails_fast_under_no_delay() {
    // Port 1 refuses immediately on loopback; -n makes the dial a single
    // attempt, so the whole invocation stays well under a second of work.
    let start = Instant::now();
    Command::cargo_bin("relock")
        .unwrap()
        .args(["--redis", "127.0.0.1:1", "-n", "job", "true"])
        .assert()
        .failure()
        .code(111);
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn unreachable_store_is_an_error_even_with_exit_zero() {
    // -x only softens lock contention, not a store that is down.
    Command::cargo_bin("relock")
        .unwrap()
        .args(["--redis", "127.0.0.1:1", "-n", "-x", "job", "true"])
        .assert()
        .failure()
        .code(111);
}
