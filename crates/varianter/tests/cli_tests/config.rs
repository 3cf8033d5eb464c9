//! Configuration file tests.

use super::{fixtures_dir, varianter};
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_config_file() {
    varianter()
        .args(["-c", "config.yaml", "--variants", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Multiplex variants (1):"))
        .stdout(predicate::str::contains("/run/hw/cpu:cores"))
        .stdout(predicate::str::contains("/run/hw/gpu").not());
}

#[test]
fn test_flags_override_config() {
    varianter()
        .args(["-c", "config.yaml", "--mux-filter-out", "/run/hw/cpu"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/run/hw/gpu"))
        .stdout(predicate::str::contains("/run/hw/cpu").not());
}

#[test]
fn test_default_config_in_working_directory() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    std::fs::copy(fixtures_dir().join("hw.yaml"), dir.path().join("hw.yaml"))?;
    std::fs::write(
        dir.path().join("varianter.yaml"),
        "files: [hw.yaml]\nfilter-only: [/run/hw/gpu]\n",
    )?;

    varianter()
        .current_dir(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Multiplex variants (1):"))
        .stdout(predicate::str::contains("/run/hw/gpu"));
    Ok(())
}

#[test]
fn test_missing_config_file() {
    varianter()
        .args(["-c", "absent.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn test_unknown_config_key() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let config = dir.path().join("bad.yaml");
    std::fs::write(&config, "mux-paths: [/run/*]\n")?;
    varianter()
        .arg("-c")
        .arg(&config)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to load config"));
    Ok(())
}

#[test]
fn test_invalid_inject() {
    varianter()
        .args(["--mux-inject", "novalue"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("novalue"));
}

#[test]
fn test_broken_document() {
    varianter()
        .args(["-m", "broken.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("broken.yaml"));
}

#[test]
fn test_missing_document() {
    varianter()
        .args(["-m", "missing.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("missing.yaml"));
}
