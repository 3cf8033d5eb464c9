//! Variant listing tests.

use super::varianter;
use predicates::prelude::*;

#[test]
fn test_no_documents_uses_defaults() {
    varianter()
        .args(["--summary", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "No variants available, using defaults only",
        ));
}

#[test]
fn test_text_listing() {
    varianter()
        .args(["-m", "hw.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Multiplex variants (2):"))
        .stdout(predicate::str::contains("/run/hw/cpu"))
        .stdout(predicate::str::contains("/run/hw/gpu"));
}

#[test]
fn test_text_summary_draws_tree() {
    varianter()
        .args(["-m", "hw.yaml", "--summary", "2", "--variants", "0", "--ascii"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Multiplex tree representation:"))
        .stdout(predicate::str::contains("+== cpu"))
        .stdout(predicate::str::contains("Multiplex variants").not());
}

#[test]
fn test_verbose_variants_show_environment() {
    varianter()
        .args(["-m", "domains.yaml", "--variants", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Multiplex variants (6):"))
        .stdout(predicate::str::contains("/run:timeout"))
        .stdout(predicate::str::contains("=> 60"));
}

#[test]
fn test_table_listing() {
    varianter()
        .args(["-m", "domains.yaml", "--format", "table", "--no-color"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Variant ID"))
        .stdout(predicate::str::contains("first-one-"))
        .stdout(predicate::str::contains("third-two-"));
}

#[test]
fn test_filter_only_flag() {
    varianter()
        .args([
            "-m",
            "domains.yaml",
            "--mux-filter-only",
            "/run/a/second",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Multiplex variants (2):"))
        .stdout(predicate::str::contains("/run/a/first").not());
}

#[test]
fn test_filter_out_flag() {
    varianter()
        .args(["-m", "domains.yaml", "--mux-filter-out", "/run/b"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Multiplex variants (3):"));
}

#[test]
fn test_json_listing() -> Result<(), Box<dyn std::error::Error>> {
    let output = varianter()
        .args(["-m", "hw.yaml", "--format", "json"])
        .output()?;
    assert!(output.status.success());

    let records: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let records = records.as_array().ok_or("expected an array")?;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["mux_path"], serde_json::json!(["/run/*"]));
    assert_eq!(records[0]["variant"][0]["path"], "/run/hw/cpu");
    assert!(
        records[1]["variant_id"]
            .as_str()
            .is_some_and(|id| id.starts_with("gpu-"))
    );
    Ok(())
}

#[test]
fn test_inject_flag() -> Result<(), Box<dyn std::error::Error>> {
    let output = varianter()
        .args(["--mux-inject", "/run/sut:cores:4", "--format", "json"])
        .output()?;
    assert!(output.status.success());

    let records: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(
        records[0]["variant"][0]["env"],
        serde_json::json!([["/run/sut", "cores", 4]])
    );
    Ok(())
}

#[test]
fn test_verbose_logs_to_stderr() {
    varianter()
        .args(["-m", "hw.yaml", "--verbose"])
        .assert()
        .success()
        .stderr(predicate::str::contains("DEBUG"));
}
