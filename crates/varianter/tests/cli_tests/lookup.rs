//! `--get` lookup tests.

use super::varianter;
use predicates::prelude::*;

#[test]
fn test_get_in_every_variant() {
    varianter()
        .args(["-m", "hw.yaml", "--get", "arch@/run/hw/*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Variant cpu-"))
        .stdout(predicate::str::contains(":    arch => x86"))
        .stdout(predicate::str::contains(":    arch => null"));
}

#[test]
fn test_get_json() -> Result<(), Box<dyn std::error::Error>> {
    let output = varianter()
        .args(["-m", "domains.yaml", "--get", "timeout", "--format", "json"])
        .output()?;
    assert!(output.status.success());

    let resolved: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let resolved = resolved.as_array().ok_or("expected an array")?;
    assert_eq!(resolved.len(), 6);
    assert!(resolved.iter().all(|r| r["value"] == 60));
    Ok(())
}

#[test]
fn test_get_clash_exit_code() {
    varianter()
        .args(["-m", "clash.yaml", "--get", "region"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("/run/cluster/us=>us"))
        .stderr(predicate::str::contains("/run/cluster/eu=>eu"));
}

#[test]
fn test_get_narrowed_path_avoids_clash() {
    varianter()
        .args(["-m", "clash.yaml", "--get", "region@/run/cluster/us/*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("region => us"));
}

#[test]
fn test_get_missing_key() {
    varianter()
        .args(["-m", "hw.yaml", "--get", "@/run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("missing key"));
}
