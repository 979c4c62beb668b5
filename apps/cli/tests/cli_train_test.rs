//! Integration tests for the `stylegrow train` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const TINY_CONFIG: &str = r#"
run_desc = "tiny"
total_kimg = 0.2
image_snapshot_ticks = "none"
network_snapshot_ticks = "none"
grid_size = [2, 2]

[schedule]
minibatch_size_base = 4
minibatch_gpu_base = 4

[dataset]
kind = "synthetic"
resolution = 8
num_channels = 1
max_images = 16

[g_args]
latent_size = 8
"#;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("train.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_train_writes_run_directory() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), TINY_CONFIG);
    let results = temp_dir.path().join("results");

    let mut cmd = Command::cargo_bin("stylegrow").unwrap();
    cmd.arg("train")
        .arg(&config)
        .arg("--results-dir")
        .arg(&results)
        .assert()
        .success()
        .stdout(predicate::str::contains("Training complete"));

    let run_dir = results.join("00000-tiny");
    assert!(run_dir.join("network-final.pkl").exists());
    assert!(run_dir.join("training_manifest.json").exists());
    assert!(run_dir.join("config.toml").exists());
    assert!(run_dir.join("reals.png").exists());
    assert!(run_dir.join("fakes_init.png").exists());
}

#[test]
fn test_train_json_outcome() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), TINY_CONFIG);

    let mut cmd = Command::cargo_bin("stylegrow").unwrap();
    let assert = cmd
        .arg("train")
        .arg(&config)
        .arg("--results-dir")
        .arg(temp_dir.path().join("results"))
        .arg("--json")
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("JSON output should be valid JSON");
    assert_eq!(json["run_id"], 0);
    assert_eq!(json["cur_nimg"], 200);
    assert_eq!(json["cancelled"], false);
}

#[test]
fn test_train_resume_latest() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), TINY_CONFIG);
    let results = temp_dir.path().join("results");

    Command::cargo_bin("stylegrow")
        .unwrap()
        .arg("train")
        .arg(&config)
        .arg("--results-dir")
        .arg(&results)
        .assert()
        .success();

    let mut cmd = Command::cargo_bin("stylegrow").unwrap();
    let assert = cmd
        .arg("train")
        .arg(&config)
        .arg("--results-dir")
        .arg(&results)
        .arg("--resume")
        .arg("latest")
        .arg("--resume-kimg")
        .arg("0.1")
        .arg("--json")
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["run_id"], 1);
    assert_eq!(json["cur_nimg"], 200);
}

#[test]
fn test_train_missing_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("stylegrow").unwrap();
    cmd.arg("train")
        .arg(temp_dir.path().join("missing.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

#[test]
fn test_train_resume_without_runs_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(temp_dir.path(), TINY_CONFIG);

    let mut cmd = Command::cargo_bin("stylegrow").unwrap();
    cmd.arg("train")
        .arg(&config)
        .arg("--results-dir")
        .arg(temp_dir.path().join("results"))
        .arg("--resume")
        .arg("latest")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to resolve resume target"));
}
