//! CLI argument tests.

use super::varianter;
use predicates::prelude::*;

#[test]
fn test_help() {
    varianter()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--mux-yaml"))
        .stdout(predicate::str::contains("--json-variants-dump"));
}

#[test]
fn test_version() {
    varianter()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("varianter"));
}

#[test]
fn test_unknown_argument() {
    varianter()
        .arg("--no-such-flag")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_invalid_format() {
    varianter()
        .args(["-m", "hw.yaml", "--format", "yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown format: yaml"));
}
