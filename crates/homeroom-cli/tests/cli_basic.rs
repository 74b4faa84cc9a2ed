//! Basic CLI E2E tests.
//!
//! Tests invoke the built binary with HOME pointed at a scratch directory and
//! verify outputs.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(home: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_homeroom-cli"))
        .args(args)
        .env("HOME", home)
        .env("HOMEROOM_ENV", "test")
        .env("HOMEROOM_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

/// Split the pretty-printed JSON documents a command prints back to back.
fn json_documents(stdout: &str) -> Vec<serde_json::Value> {
    serde_json::Deserializer::from_str(stdout)
        .into_iter::<serde_json::Value>()
        .collect::<Result<_, _>>()
        .expect("stdout is a JSON stream")
}

#[test]
fn test_config_list() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["config", "list"]);
    assert_eq!(code, 0, "config list failed");
    let config: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(config["learner_id"], "local");
    assert_eq!(config["sync"]["heartbeat_interval_ms"], 2000);
}

#[test]
fn test_config_set_and_get() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["config", "set", "sync.silence_window_ms", "8000"]);
    assert_eq!(code, 0);
    let (stdout, _, code) = run_cli(home.path(), &["config", "get", "sync.silence_window_ms"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "8000");
}

#[test]
fn test_config_rejects_silence_shorter_than_heartbeat() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(home.path(), &["config", "set", "sync.silence_window_ms", "1000"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_config_rejects_zero_work_minutes() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(home.path(), &["config", "set", "timer.work_minutes", "0"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("timer.work_minutes"));
    let (stdout, _, _) = run_cli(home.path(), &["config", "get", "timer.work_minutes"]);
    assert_eq!(stdout.trim(), "25");
}

#[test]
fn test_config_get_unknown_key() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(home.path(), &["config", "get", "nope"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_timer_status_defaults() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["timer", "status"]);
    assert_eq!(code, 0, "timer status failed");
    let snapshot: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(snapshot["type"], "state_snapshot");
    assert_eq!(snapshot["phase"], "work");
    assert_eq!(snapshot["remaining_secs"], 1500);
}

#[test]
fn test_timer_start_then_pause_persists() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["timer", "start"]);
    assert_eq!(code, 0, "timer start failed");
    let events = json_documents(&stdout);
    assert!(events.iter().any(|e| e["type"] == "timer_started"));

    let (stdout, _, code) = run_cli(home.path(), &["timer", "pause"]);
    assert_eq!(code, 0, "timer pause failed");
    let events = json_documents(&stdout);
    assert!(events.iter().any(|e| e["type"] == "timer_paused"));

    let (stdout, _, _) = run_cli(home.path(), &["timer", "status"]);
    let snapshot: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(snapshot["state"], "idle");
}

#[test]
fn test_timer_skip_to_break() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["timer", "skip", "--to", "break"]);
    assert_eq!(code, 0);
    let events = json_documents(&stdout);
    assert!(events
        .iter()
        .any(|e| e["type"] == "phase_completed" && e["skipped"] == true));

    let (stdout, _, _) = run_cli(home.path(), &["timer", "status"]);
    let snapshot: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(snapshot["phase"], "break");
}

#[test]
fn test_settings_set_and_show() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["settings", "set", "--work", "50", "--signal", "chime"]);
    assert_eq!(code, 0, "settings set failed");
    let (stdout, _, code) = run_cli(home.path(), &["settings", "show"]);
    assert_eq!(code, 0);
    let settings: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(settings["workMinutes"], 50);
    assert_eq!(settings["completionSignal"], "chime");
}

#[test]
fn test_settings_set_while_running_keeps_the_countdown() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["timer", "start"]);
    assert_eq!(code, 0);
    let (_, _, code) = run_cli(home.path(), &["settings", "set", "--work", "50"]);
    assert_eq!(code, 0);

    let (stdout, _, _) = run_cli(home.path(), &["timer", "status"]);
    let snapshot: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(snapshot["state"], "running");
    assert_eq!(snapshot["total_secs"], 1500);

    let (stdout, _, _) = run_cli(home.path(), &["settings", "show"]);
    let settings: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(settings["workMinutes"], 50);
}

#[test]
fn test_settings_rejects_zero_duration() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(home.path(), &["settings", "set", "--work", "0"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_simulate_failover() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(
        home.path(),
        &["simulate", "--contexts", "3", "--seconds", "40", "--kill-leader-at", "10"],
    );
    assert_eq!(code, 0, "simulate failed");
    let documents = json_documents(&stdout);
    let summary = documents.last().unwrap();
    assert_eq!(summary["max_concurrent_leaders"], 1);
    assert!(summary["elections"].as_u64().unwrap() >= 2);
    assert!(summary["leader"].is_string());
}
