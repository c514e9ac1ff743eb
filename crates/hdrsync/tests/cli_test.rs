//! Integration tests for the `hdrsync` CLI binary.
//!
//! Every test gets its own config file and storage directory, and the
//! companion port points at a closed socket, so nothing depends on a
//! running companion or on the user's real configuration.
#![allow(clippy::unwrap_used)]

use std::net::TcpListener;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        let config = format!(
            "[companion]\nport = {}\n\n[storage]\ndir = {:?}\n",
            closed_port(),
            sandbox.data_dir()
        );
        std::fs::write(sandbox.config_path(), config).unwrap();
        sandbox
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn write(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("hdrsync");
        cmd.env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path())
            .env("HDRSYNC_CONFIG", self.config_path())
            .env_remove("HDRSYNC_OUTPUT")
            .env_remove("RUST_LOG");
        cmd
    }

    fn import_rules(&self) {
        let rules = self.write(
            "rules.json",
            r#"[
                {"id": "r1", "headerName": "X-Env", "headerValue": "staging",
                 "domains": ["example.com"], "isEnabled": true},
                {"id": 2, "headerName": "X-Token", "isDynamic": true, "sourceId": "7",
                 "prefix": "Bearer ", "domains": ["api.example.com"], "isEnabled": true}
            ]"#,
        );
        self.cmd()
            .args(["rules", "import"])
            .arg(&rules)
            .assert()
            .success();
    }
}

/// A loopback port with nothing listening on it.
fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = Sandbox::new().cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn test_help_lists_commands() {
    Sandbox::new().cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("compile"))
            .and(predicate::str::contains("probe"))
            .and(predicate::str::contains("rules")),
    );
}

#[test]
fn test_version_flag() {
    Sandbox::new()
        .cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hdrsync"));
}

#[test]
fn test_completions_zsh() {
    Sandbox::new()
        .cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_flag() {
    let sandbox = Sandbox::new();
    let other = sandbox.dir.path().join("elsewhere.toml");
    sandbox
        .cmd()
        .args(["config", "path", "--config"])
        .arg(&other)
        .assert()
        .success()
        .stdout(predicate::str::contains("elsewhere.toml"));
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["config", "init"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("already exists"));

    sandbox.cmd().args(["config", "init", "--force"]).assert().success();
    let written = std::fs::read_to_string(sandbox.config_path()).unwrap();
    assert!(written.contains("[timing]"));
    assert!(written.contains("reconnect_delay_ms = 5000"));
}

#[test]
fn test_config_show_json() {
    let output = Sandbox::new()
        .cmd()
        .args(["config", "show", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let cfg: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(cfg["rules"]["reserved_rule_ids"], 1000);
    assert_eq!(cfg["companion"]["platform"], "standard");
}

#[test]
fn test_invalid_config_exits_with_config_code() {
    let sandbox = Sandbox::new();
    std::fs::write(sandbox.config_path(), "[companion]\nport = 0\n").unwrap();
    sandbox
        .cmd()
        .args(["rules", "list"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("companion.port"));
}

// ── Rules and sources ───────────────────────────────────────────────

#[test]
fn test_rules_import_then_list() {
    let sandbox = Sandbox::new();
    sandbox.import_rules();

    sandbox
        .cmd()
        .args(["rules", "list", "-o", "plain"])
        .assert()
        .success()
        .stdout("r1\n2\n");
}

#[test]
fn test_rules_import_rejects_duplicate_ids() {
    let sandbox = Sandbox::new();
    let rules = sandbox.write(
        "dup.json",
        r#"[{"id": "a", "headerName": "X-A", "headerValue": "1", "domains": ["a.com"]},
            {"id": "a", "headerName": "X-B", "headerValue": "2", "domains": ["b.com"]}]"#,
    );
    sandbox
        .cmd()
        .args(["rules", "import"])
        .arg(&rules)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("duplicate"));
}

#[test]
fn test_sources_list_empty_cache() {
    Sandbox::new()
        .cmd()
        .args(["sources", "list", "-o", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

// ── Compile ─────────────────────────────────────────────────────────

#[test]
fn test_compile_against_given_sources() {
    let sandbox = Sandbox::new();
    sandbox.import_rules();
    let sources = sandbox.write(
        "sources.json",
        r#"[{"sourceId": "7", "sourceType": "http", "sourceContent": "tok"}]"#,
    );

    let output = sandbox
        .cmd()
        .args(["compile", "-o", "json", "--sources"])
        .arg(&sources)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rules = report["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[1]["domainFilter"], "api.example.com");
    assert_eq!(rules[1]["requestHeaders"][0]["value"], "Bearer tok");
    assert!(report["invalid"].as_array().unwrap().is_empty());
}

#[test]
fn test_compile_flags_missing_source() {
    let sandbox = Sandbox::new();
    sandbox.import_rules();

    let output = sandbox
        .cmd()
        .args(["compile", "-o", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["rules"].as_array().unwrap().len(), 1);
    assert_eq!(report["invalid"][0]["id"], "2");
    assert_eq!(report["invalid"][0]["emitted"], false);
}

// ── Companion ───────────────────────────────────────────────────────

#[test]
fn test_probe_unreachable_companion() {
    Sandbox::new()
        .cmd()
        .arg("probe")
        .assert()
        .code(7)
        .stdout(predicate::str::contains("unreachable"));
}

#[test]
fn test_run_once_publishes_while_offline() {
    let sandbox = Sandbox::new();
    sandbox.import_rules();

    let output = sandbox
        .cmd()
        .args(["run", "--once", "-o", "json"])
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains(r#""type":"rulesApplied""#));

    let live = read_json(&sandbox.data_dir().join("active-rules.json"));
    let rules = live["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["domainFilter"], "example.com");

    // The dynamic entry had no source and was flagged in the store.
    let stored = read_json(&sandbox.data_dir().join("rules.json"));
    assert_eq!(stored[1]["sourceMissing"], true);
}
