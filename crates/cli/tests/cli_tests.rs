//! CLI integration tests

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn iris(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_iris"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("IRIS_API_URL")
        .env_remove("REGISTRY_DIR")
        .output()
        .expect("Failed to execute command")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("temp path is valid UTF-8")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = iris(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Iris classifier"), "Should show app description");
    for command in ["train", "registry", "predict", "predict-batch", "logs", "info", "health"] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = iris(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("iris"), "Should show binary name");
}

#[test]
fn test_train_help() {
    let output = iris(&["train", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--registry-dir"));
    assert!(stdout.contains("--export"));
    assert!(stdout.contains("--no-register"));
}

#[test]
fn test_registry_promote_help() {
    let output = iris(&["registry", "promote", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--stage"));
    assert!(stdout.contains("--archive-existing"));
}

#[test]
fn test_predict_batch_requires_rows() {
    let output = iris(&["predict-batch"]);
    assert!(!output.status.success(), "predict-batch without rows should fail");
}

#[test]
fn test_invalid_command() {
    let output = iris(&["nonexistent-command"]);
    assert!(!output.status.success(), "Invalid command should fail");
}

#[test]
fn test_invalid_format() {
    let output = iris(&["--format", "yaml", "info"]);
    assert!(!output.status.success(), "Unknown format should fail");
}

#[test]
fn test_registry_list_empty() {
    let dir = TempDir::new().unwrap();
    let registry = dir.path().join("registry");
    let output = iris(&["registry", "--registry-dir", path_arg(&registry), "list"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("No registered models"));
}

#[test]
fn test_registry_versions_of_unknown_model_fails() {
    let dir = TempDir::new().unwrap();
    let registry = dir.path().join("registry");
    let output = iris(&["registry", "--registry-dir", path_arg(&registry), "versions", "ghost"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("ghost"));
}

#[test]
fn test_predict_against_unreachable_api_fails() {
    let output = iris(&["--api-url", "http://127.0.0.1:1", "predict", "5.1", "3.5", "1.4", "0.2"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("Failed to send request"));
}

#[test]
fn test_train_registers_and_exports_best_model() {
    let dir = TempDir::new().unwrap();
    let registry = dir.path().join("registry");
    let artifacts = dir.path().join("artifacts");
    let export = dir.path().join("serving/model.json");

    let output = iris(&[
        "--format",
        "json",
        "train",
        "--registry-dir",
        path_arg(&registry),
        "--artifacts-dir",
        path_arg(&artifacts),
        "--no-data",
        "--export",
        path_arg(&export),
    ]);
    assert!(
        output.status.success(),
        "train failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outcomes"].as_array().unwrap().len(), 3);
    assert_eq!(report["registered"]["stage"], "Production");
    assert!(export.exists());
    assert!(artifacts.join("model_comparison.json").exists());

    let output = iris(&[
        "--format",
        "json",
        "registry",
        "--registry-dir",
        path_arg(&registry),
        "list",
    ]);
    assert!(output.status.success());
    let models: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let models = models.as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["name"], report["best"]["registry_name"]);
    assert_eq!(models[0]["production_version"], 1);
}
