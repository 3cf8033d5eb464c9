//! Dump and replay tests.

use super::varianter;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_dump_then_load() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let dump = dir.path().join("variants.json");

    let listed = varianter()
        .args(["-m", "domains.yaml", "--format", "json", "--json-variants-dump"])
        .arg(&dump)
        .output()?;
    assert!(listed.status.success());
    assert!(dump.exists());

    let replayed = varianter()
        .args(["--format", "json", "--json-variants-load"])
        .arg(&dump)
        .output()?;
    assert!(replayed.status.success());

    let before: serde_json::Value = serde_json::from_slice(&listed.stdout)?;
    let after: serde_json::Value = serde_json::from_slice(&replayed.stdout)?;
    let on_disk: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&dump)?)?;
    assert_eq!(before, after);
    assert_eq!(before, on_disk);
    Ok(())
}

#[test]
fn test_load_lists_environment() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let dump = dir.path().join("variants.json");
    varianter()
        .args(["-m", "hw.yaml", "--json-variants-dump"])
        .arg(&dump)
        .assert()
        .success();

    varianter()
        .arg("--json-variants-load")
        .arg(&dump)
        .assert()
        .success()
        .stdout(predicate::str::contains("/run/hw/cpu:arch => x86"));
    Ok(())
}

#[test]
fn test_load_missing_dump() {
    varianter()
        .args(["--json-variants-load", "no-such-dump.json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no-such-dump.json"));
}
