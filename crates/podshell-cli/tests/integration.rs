#![cfg(unix)]
#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

/// Stand-in for the workspace CLI: answers `list`, `status`, `up`, `stop`
/// and `delete` the way the real one does with JSON output enabled.
const FAKE_CLI: &str = r#"#!/bin/sh
case "$1" in
  list)
    echo '[{"id":"w1","provider":{"name":"docker"},"source":{"gitRepository":"https://github.com/org/repo"}},{"id":"w2"}]'
    ;;
  status)
    if [ "$3" = "--output=json" ]; then
      echo "{\"id\":\"$2\",\"state\":\"Running\"}"
    else
      echo '{"level":"info","message":"checking"}'
    fi
    ;;
  up)
    echo '{"level":"info","message":"step 1"}'
    echo '{"level":"info","message":"step 2"}'
    ;;
  stop)
    echo '{"level":"info","message":"stopping"}'
    ;;
  delete)
    echo '{"level":"error","message":"boom"}' >&2
    exit 2
    ;;
esac
"#;

struct Env {
    home: TempDir,
    binary: PathBuf,
}

impl Env {
    fn new() -> Self {
        let home = TempDir::new().unwrap();
        let binary = home.path().join("fake-devpod");
        std::fs::write(&binary, FAKE_CLI).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { home, binary }
    }

    fn podshell(&self) -> Command {
        let mut cmd = Command::cargo_bin("podshell").unwrap();
        cmd.env("PODSHELL_HOME", self.home.path())
            .env("PODSHELL_BINARY", &self.binary)
            .env_remove("RUST_LOG");
        cmd
    }

    fn history_json(&self) -> serde_json::Value {
        let out = self
            .podshell()
            .args(["--json", "history"])
            .output()
            .unwrap();
        assert!(out.status.success());
        serde_json::from_slice(&out.stdout).unwrap()
    }
}

// ---------------------------------------------------------------------------
// podshell list / status
// ---------------------------------------------------------------------------

#[test]
fn list_prints_table() {
    let env = Env::new();
    env.podshell()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("PROVIDER"))
        .stdout(predicate::str::contains("w1"))
        .stdout(predicate::str::contains("https://github.com/org/repo"));
}

#[test]
fn list_json() {
    let env = Env::new();
    let out = env.podshell().args(["list", "--json"]).output().unwrap();
    assert!(out.status.success());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let ids: Vec<_> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, ["w1", "w2"]);
}

#[test]
fn status_reports_state() {
    let env = Env::new();
    env.podshell()
        .args(["status", "w1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("w1: Running"));
}

// ---------------------------------------------------------------------------
// podshell up / delete / history / logs
// ---------------------------------------------------------------------------

#[test]
fn up_streams_logs_and_records_history() {
    let env = Env::new();
    env.podshell()
        .args(["up", "w1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("step 1"))
        .stdout(predicate::str::contains("step 2"))
        .stdout(predicate::str::contains("start w1: done"));

    let history = env.history_json();
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["name"], "start");
    assert_eq!(entries[0]["targetID"], "w1");
    assert_eq!(entries[0]["status"], "success");

    let action_id = entries[0]["id"].as_str().unwrap();
    env.podshell()
        .args(["logs", action_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("step 1"))
        .stdout(predicate::str::contains("step 2"));
}

#[test]
fn failed_action_exits_non_zero_with_cli_message() {
    let env = Env::new();
    env.podshell()
        .args(["delete", "w1", "--force"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("remove w1 failed: boom"));

    let history = env.history_json();
    assert_eq!(history[0]["status"], "error");
    assert_eq!(history[0]["error"]["message"], "boom");
    assert_eq!(history[0]["error"]["type"], "exit");
}

#[test]
fn history_filters_by_workspace_newest_first() {
    let env = Env::new();
    env.podshell().args(["up", "w1"]).assert().success();
    env.podshell().args(["stop", "w1"]).assert().success();
    env.podshell().args(["stop", "w2"]).assert().success();

    let out = env
        .podshell()
        .args(["--json", "history", "w1"])
        .output()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let names: Vec<_> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["stop", "start"]);
}

#[test]
fn history_empty() {
    let env = Env::new();
    env.podshell()
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No recorded actions."));
}

#[test]
fn logs_rejects_invalid_action_id() {
    let env = Env::new();
    env.podshell()
        .args(["logs", "../etc/passwd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid action id"));
}

#[test]
fn missing_binary_fails_cleanly() {
    let env = Env::new();
    env.podshell()
        .env("PODSHELL_BINARY", env.home.path().join("does-not-exist"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

// ---------------------------------------------------------------------------
// podshell config
// ---------------------------------------------------------------------------

#[test]
fn config_validate_reports_errors() {
    let env = Env::new();
    env.podshell()
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));

    std::fs::write(
        env.home.path().join("config.yaml"),
        "binary: /definitely/not/here/devpod\n",
    )
    .unwrap();
    env.podshell()
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"));
}

#[test]
fn config_show_json_has_defaults() {
    let env = Env::new();
    let out = env
        .podshell()
        .args(["config", "show", "--json"])
        .output()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(value["action_log_retention_days"], 30);
    assert_eq!(value["skip_pro"], true);
}
