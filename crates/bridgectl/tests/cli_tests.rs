//! CLI integration tests

use std::process::{Command, Output};

fn bridgectl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bridgectl"))
        .args(args)
        .env_remove("BRIDGE_API_URL")
        .output()
        .expect("Failed to execute command")
}

const STATUS_BODY: &str = r#"{
    "generation": 2,
    "snapshot": {
        "captured_at": "2026-10-18T08:00:00Z",
        "fields": {"battery": 79, "gear": "P"},
        "position": {"latitude": 52.37, "longitude": 4.89, "heading": 90.0}
    },
    "sinks": [
        {"name": "abrp", "dirty": false, "healthy": true, "open": true,
         "consecutive_failures": 0, "cooldown_remaining_secs": 0.0},
        {"name": "homeassistant", "dirty": true, "healthy": false, "open": false,
         "consecutive_failures": 3, "cooldown_remaining_secs": 12.0,
         "last_error": "sink returned status 404: unknown webhook"}
    ]
}"#;

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = bridgectl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("telemetry bridge"), "Should describe the tool");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("snapshot"), "Should show snapshot command");
    assert!(stdout.contains("health"), "Should show health command");
    assert!(stdout.contains("--api-url"), "Should show api-url option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = bridgectl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("bridgectl"), "Should show binary name");
}

/// Test that an unknown subcommand is rejected
#[test]
fn test_unknown_command_fails() {
    let output = bridgectl(&["frobnicate"]);
    assert!(!output.status.success());
}

#[test]
fn test_status_table_against_api() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/status")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(STATUS_BODY)
        .create();

    let output = bridgectl(&["--api-url", &server.url(), "status"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "status should succeed: {:?}", output);
    assert!(stdout.contains("abrp"));
    assert!(stdout.contains("homeassistant"));
    assert!(stdout.contains("unknown webhook"));
    assert!(stdout.contains("1 of 2 sinks"));
}

#[test]
fn test_snapshot_json_against_api() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", "/status")
        .with_status(200)
        .with_body(STATUS_BODY)
        .create();

    let output = bridgectl(&["--api-url", &server.url(), "--format", "json", "snapshot"]);
    assert!(output.status.success(), "snapshot should succeed: {:?}", output);

    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(snapshot["fields"]["battery"], 79);
    assert_eq!(snapshot["position"]["heading"], 90.0);
}

#[test]
fn test_health_reports_not_ready() {
    let mut server = mockito::Server::new();
    let _health = server
        .mock("GET", "/healthz")
        .with_status(200)
        .with_body(
            r#"{"status": "degraded", "components": {
                "poller": {"status": "healthy", "last_check_timestamp": 1760774400},
                "sink:abrp": {"status": "degraded", "message": "2 consecutive failures: timeout",
                              "last_check_timestamp": 1760774400}
            }}"#,
        )
        .create();
    let _ready = server
        .mock("GET", "/readyz")
        .with_status(503)
        .with_body(r#"{"ready": false, "reason": "Initial sync not yet complete"}"#)
        .create();

    let output = bridgectl(&["--api-url", &server.url(), "health"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "health should succeed: {:?}", output);
    assert!(stdout.contains("sink:abrp"));
    assert!(stdout.contains("Initial sync not yet complete"));
}

#[test]
fn test_status_fails_when_bridge_unreachable() {
    let output = bridgectl(&["--api-url", "http://127.0.0.1:9", "status"]);
    assert!(!output.status.success());
}
