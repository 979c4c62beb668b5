//! Integration tests for the `stylegrow validate` command.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_validate_accepts_minimal_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("ok.toml");
    std::fs::write(&config, "run_desc = \"ffhq\"\ntotal_kimg = 12.5\n").unwrap();

    let mut cmd = Command::cargo_bin("stylegrow").unwrap();
    cmd.arg("validate")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("ffhq"));
}

#[test]
fn test_validate_rejects_inconsistent_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("bad.toml");
    std::fs::write(&config, "num_replicas = 0\n").unwrap();

    let mut cmd = Command::cargo_bin("stylegrow").unwrap();
    cmd.arg("validate")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("num_replicas"));
}

#[test]
fn test_validate_rejects_unparseable_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("broken.toml");
    std::fs::write(&config, "image_snapshot_ticks = \"sometimes\"\n").unwrap();

    let mut cmd = Command::cargo_bin("stylegrow").unwrap();
    cmd.arg("validate").arg(&config).assert().failure();
}
