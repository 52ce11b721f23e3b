//! Basic CLI E2E tests.
//!
//! Tests invoke CLI commands via cargo run and verify outputs. Every test
//! points `--config` at a temporary file so the user's config is untouched.

use std::path::Path;
use std::process::Command;

/// Run a CLI command against `config` and return (stdout, stderr, exit code).
fn run_cli(config: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new("cargo")
        .args(["run", "-q", "-p", "nightwatch-cli", "--"])
        .args(args)
        .arg("--config")
        .arg(config)
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn temp_config() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    (dir, path)
}

#[test]
fn test_config_path() {
    let (_dir, path) = temp_config();
    let (stdout, _, code) = run_cli(&path, &["config", "path"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), path.display().to_string());
}

#[test]
fn test_config_get_default() {
    let (_dir, path) = temp_config();
    let (stdout, _, code) = run_cli(&path, &["config", "get", "final_sequence.threshold"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "4:40");
}

#[test]
fn test_config_set_then_get() {
    let (_dir, path) = temp_config();
    let (_, stderr, code) = run_cli(&path, &["config", "set", "session.duration_secs", "12"]);
    assert_eq!(code, 0, "config set failed: {stderr}");
    assert!(path.exists());

    let (stdout, _, code) = run_cli(&path, &["config", "get", "session.duration_secs"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim().parse::<f64>().unwrap(), 12.0);
}

#[test]
fn test_config_set_invalid_value() {
    let (_dir, path) = temp_config();
    let (_, stderr, code) = run_cli(&path, &["config", "set", "audio.volume", "3.5"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_config_get_unknown_key() {
    let (_dir, path) = temp_config();
    let (_, stderr, code) = run_cli(&path, &["config", "get", "nope.nothing"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_config_list_is_json() {
    let (_dir, path) = temp_config();
    let (stdout, _, code) = run_cli(&path, &["config", "list"]);
    assert_eq!(code, 0);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["contexts"]["terminal"], "jumpscare");
}

#[test]
fn test_config_reset() {
    let (_dir, path) = temp_config();
    run_cli(&path, &["config", "set", "session.grace_secs", "9"]);
    let (_, _, code) = run_cli(&path, &["config", "reset"]);
    assert_eq!(code, 0);
    let (stdout, _, _) = run_cli(&path, &["config", "get", "session.grace_secs"]);
    assert_eq!(stdout.trim().parse::<f64>().unwrap(), 3.0);
}

#[test]
fn test_curve_table() {
    let (_dir, path) = temp_config();
    let (stdout, _, code) = run_cli(&path, &["curve", "--step-minutes", "60"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("4:00"));
    assert!(stdout.contains("9:00"));
}

#[test]
fn test_curve_json() {
    let (_dir, path) = temp_config();
    let (stdout, _, code) = run_cli(&path, &["curve", "--step-minutes", "150", "--json"]);
    assert_eq!(code, 0);
    let rows: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1]["time"], "6:30");
    assert_eq!(rows[1]["progress"], 0.5);
}

#[test]
fn test_run_exits_when_stdin_closes() {
    let (_dir, path) = temp_config();
    let (stdout, _, code) = run_cli(&path, &["run", "--context", "bedroom"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("started"));
    assert!(stdout.contains("RunStarted"));
}

#[test]
fn test_run_rejects_bad_start_time() {
    let (_dir, path) = temp_config();
    let (_, _, code) = run_cli(&path, &["run", "--start", "25:99"]);
    assert_ne!(code, 0);
}
