//! CLI contract tests.

use std::process::Output;

use assert_cmd::Command;
use serde_json::{json, Value};

/// Binary isolated from the developer's home config and environment.
fn bridge(home: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("townpass-bridge").expect("binary builds");
    cmd.env("HOME", home.path())
        .env_remove("TOWNPASS_DEBUG")
        .env_remove("TOWNPASS_TIMEOUT_MS")
        .env_remove("TOWNPASS_AUTH_ENDPOINT")
        .env_remove("TOWNPASS_BASE_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_json(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stdout);
    match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(err) => panic!("stdout should be JSON ({err}): {text}"),
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn normalize_prints_the_record() {
    let home = tempfile::tempdir().expect("temp home");
    let payload = json!({"name": "userinfo", "data": "{\"id\":\"u1\",\"name\":\"Ada\"}"});

    let output = bridge(&home)
        .args(["normalize", &payload.to_string()])
        .output()
        .expect("runs");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout_json(&output), json!({"id": "u1", "name": "Ada"}));
}

#[test]
fn normalize_reads_stdin() {
    let home = tempfile::tempdir().expect("temp home");

    let output = bridge(&home)
        .arg("normalize")
        .write_stdin("{\"type\":\"USER_INFO\",\"data\":{\"uid\":7}}\n")
        .output()
        .expect("runs");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout_json(&output), json!({"uid": 7}));
}

#[test]
fn normalize_rejects_unrecognized_payloads() {
    let home = tempfile::tempdir().expect("temp home");

    let output = bridge(&home)
        .args(["normalize", "{\"hello\":\"world\"}"])
        .output()
        .expect("runs");

    assert!(!output.status.success());
    assert!(stderr(&output).contains("not recognized"), "{}", stderr(&output));
}

#[test]
fn simulate_resolves_from_the_scripted_channel() {
    let home = tempfile::tempdir().expect("temp home");

    let output = bridge(&home)
        .args([
            "simulate",
            "--channel",
            "secondary-bridge",
            "--reply",
            "{\"name\":\"userid\",\"data\":\"u2\"}",
        ])
        .output()
        .expect("runs");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout_json(&output), json!({"id": "u2"}));
}

#[test]
fn simulate_with_silent_host_times_out() {
    let home = tempfile::tempdir().expect("temp home");
    let config = home.path().join("bridge.toml");
    std::fs::write(&config, "timeout_ms = 50\n").expect("write config");

    let output = bridge(&home)
        .args(["--config"])
        .arg(&config)
        .arg("simulate")
        .output()
        .expect("runs");

    assert!(!output.status.success());
    assert!(stderr(&output).contains("within 50 ms"), "{}", stderr(&output));
}

#[test]
fn unknown_channel_is_rejected() {
    let home = tempfile::tempdir().expect("temp home");

    let output = bridge(&home)
        .args(["simulate", "--channel", "carrier-pigeon", "--reply", "{}"])
        .output()
        .expect("runs");

    assert!(!output.status.success());
}

#[test]
fn invalid_environment_override_fails_fast() {
    let home = tempfile::tempdir().expect("temp home");

    let output = bridge(&home)
        .env("TOWNPASS_TIMEOUT_MS", "soon")
        .args(["normalize", "{\"id\":\"u1\"}"])
        .output()
        .expect("runs");

    assert!(!output.status.success());
    assert!(stderr(&output).contains("TOWNPASS_TIMEOUT_MS"), "{}", stderr(&output));
}

#[test]
fn simulate_reports_only_probes_sent() {
    let home = tempfile::tempdir().expect("temp home");

    let output = bridge(&home)
        .env("NO_COLOR", "1")
        .args(["simulate", "--reply", "{\"id\":\"u1\"}"])
        .output()
        .expect("runs");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let ansi = regex::Regex::new(r"\x1b\[[0-9;]*m").expect("valid pattern");
    let plain = ansi.replace_all(&stderr(&output), "").into_owned();
    // Bridge, native handler and broadcast; attaches and detaches excluded.
    assert!(plain.contains("probes=3"), "{plain}");
    assert!(plain.contains("leftover_listeners=0"), "{plain}");
}

#[test]
fn log_dir_enables_file_logging() {
    let home = tempfile::tempdir().expect("temp home");
    let logs = home.path().join("logs");

    let output = bridge(&home)
        .arg("--log-dir")
        .arg(&logs)
        .args(["normalize", "{\"id\":\"u1\"}"])
        .output()
        .expect("runs");

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let files: Vec<String> = std::fs::read_dir(&logs)
        .expect("logs directory created")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(
        files.iter().any(|name| name.starts_with("townpass-bridge.log")),
        "{files:?}"
    );
}
