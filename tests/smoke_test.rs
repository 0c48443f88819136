//! Smoke tests for the Keyward CLI.
//!
//! - `keyward --version` outputs version info
//! - `keyward --help` lists the commands
//! - `keyward` (no args) reports status as JSON

mod common;

use assert_cmd::Command;
use common::TestEnv;
use predicates::prelude::*;

fn keyward() -> Command {
    Command::new(env!("CARGO_BIN_EXE_keyward"))
}

#[test]
fn test_version_flag() {
    keyward()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("keyward"))
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn test_help_flag() {
    keyward()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("profile"))
        .stdout(predicate::str::contains("keybox"));
}

#[test]
fn test_no_args_outputs_status_json() {
    let env = TestEnv::new();
    env.keyward()
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{"))
        .stdout(predicate::str::contains("\"running\""));
}

#[test]
fn test_missing_config_dir_is_an_error() {
    let env = TestEnv::new();
    env.keyward()
        .arg("-d")
        .arg(env.path().join("does-not-exist"))
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error\""));
}
