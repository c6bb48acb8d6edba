use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use tempfile::{TempDir, tempdir};

fn write_files(dir: &TempDir) -> (PathBuf, PathBuf) {
    let config = r#"
[pins]
hx711_dt = 5
hx711_sck = 6
pumps = [17, 27]
start_button = 16

[weight]
sample_delay_ms = 5
tare_duration_ms = 100

[serving]
start_with_button = true
delay_before_serving_ms = 0
delay_between_servings_ms = 0
serving_timeout_ms = 300
mark_empty_on_timeout = false
"#;
    let catalog = r#"
[[ingredients]]
id = 1
name = "rum"

[[dispensers]]
number = 0
ingredient = 1

[[dispensers]]
number = 1
ingredient = 1

[[mixes]]
id = 1
name = "Rum"
doses = [{ ingredient = 1, quantity = 15.0, number = 1 }]
"#;
    let cfg = dir.path().join("cfg.toml");
    let cat = dir.path().join("cat.toml");
    fs::write(&cfg, config).unwrap();
    fs::write(&cat, catalog).unwrap();
    (cfg, cat)
}

fn run_json(args: &[&str], env: &[(&str, &str)]) -> Output {
    let dir = tempdir().unwrap();
    let (cfg, cat) = write_files(&dir);
    let mut cmd = Command::cargo_bin("mixbot").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("info")
        .arg("--config")
        .arg(cfg)
        .arg("--catalog")
        .arg(cat)
        .args(args)
        .env_remove("RUST_LOG");
    for (k, v) in env {
        cmd.env(k, v);
    }
    cmd.output().unwrap()
}

fn last_stdout_json(out: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&out.stdout);
    let line = stdout.lines().last().expect("stdout has a JSON line");
    serde_json::from_str(line).unwrap()
}

/// Validate the JSON result of a finished order.
#[rstest]
fn serve_success_schema() {
    let out = run_json(&["serve", "--mix", "rum"], &[]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let v = last_stdout_json(&out);
    assert_eq!(v["status"], "finished");
    assert_eq!(v["mix"], "Rum");
    assert_eq!(v["doses_served"], 1);
    assert!(v["abandon_reason"].is_null());
    assert!(v["order"].as_u64().is_some());
}

/// Abandoned orders print the result line, then a structured error.
#[rstest]
fn serve_timeout_error_schema() {
    let out = run_json(&["serve", "--mix", "rum"], &[("MIXBOT_SIM_FLOW", "0")]);
    assert_eq!(out.status.code(), Some(5));
    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2, "{stdout}");
    assert_eq!(lines[0]["status"], "abandoned");
    assert_eq!(lines[0]["abandon_reason"], "serving_timeout");
    assert_eq!(lines[1]["reason"], "serving_timeout");
    assert!(
        lines[1]["message"]
            .as_str()
            .unwrap()
            .starts_with("What happened")
    );
}

/// Console logs go to stderr as JSON lines with structured fields.
#[rstest]
fn stderr_logs_are_json_lines() {
    let out = run_json(&["weigh", "--samples", "3"], &[]);
    assert!(out.status.success());
    let v = last_stdout_json(&out);
    assert_eq!(v["queue"].as_array().map(Vec::len), Some(3));
    assert!(v["weight"].is_number());

    let stderr = String::from_utf8_lossy(&out.stderr);
    let mut saw_ready = false;
    for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
        let v: serde_json::Value = serde_json::from_str(line)
            .unwrap_or_else(|e| panic!("not JSON ({e}): {line}"));
        assert!(v.get("level").is_some());
        if v["fields"]["message"] == "controller ready" {
            saw_ready = true;
            assert_eq!(v["fields"]["pumps"], 2);
        }
    }
    assert!(saw_ready, "{stderr}");
}
