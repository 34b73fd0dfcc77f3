//! Several `chronicle` processes appending to one file at once must still
//! produce a single unbroken chain.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::{json, Value};
use tempfile::TempDir;

use chronicle_core::validate_causal_chain;
use chronicle_store::{analyze_chronicle, read_chronicle_file};

const BIN: &str = env!("CARGO_BIN_EXE_chronicle");

fn append_payload(n: usize) -> String {
    json!({
        "type": "Build",
        "command": format!("cargo build -p worker-{}", n),
        "success": true,
        "durationMs": 1000 + n,
    })
    .to_string()
}

fn run(args: &[&str]) -> Output {
    Command::new(BIN).args(args).output().expect("failed to launch chronicle")
}

#[test]
fn concurrent_processes_share_one_chain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.ndjson");
    let path_arg = path.to_str().unwrap().to_string();

    let children: Vec<_> = (0..12)
        .map(|n| {
            Command::new(BIN)
                .args([
                    "append",
                    &path_arg,
                    "--actor-type",
                    "executor",
                    "--actor-id",
                    &format!("proc-{}", n),
                    "--payload",
                    &append_payload(n),
                ])
                .spawn()
                .expect("failed to spawn chronicle")
        })
        .collect();

    for mut child in children {
        let status = child.wait().unwrap();
        assert!(status.success(), "append process failed: {}", status);
    }

    let events = read_chronicle_file(&path).unwrap();
    assert_eq!(events.len(), 12);
    let validation = validate_causal_chain(&events);
    assert!(validation.valid, "chain broken: {:?}", validation.reason);
    assert!(analyze_chronicle(&path).unwrap().is_healthy());
    assert!(!Path::new(&format!("{}.lock", path_arg)).exists());
}

#[test]
fn append_then_tail_prints_stored_event() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plan-1.ndjson");
    let path_arg = path.to_str().unwrap();

    let payload = json!({
        "type": "PlanDrafted",
        "planId": "plan-1",
        "title": "Split parser module",
        "steps": ["extract lexer", "move tests"],
    })
    .to_string();
    let out = run(&["append", path_arg, "--actor-type", "planner", "--payload", &payload]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stored: Value = serde_json::from_slice(&out.stdout).unwrap();

    let out = run(&["tail", path_arg, "-n", "1"]);
    assert!(out.status.success());
    let tailed: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(tailed, stored);
    assert_eq!(tailed["type"], "PlanDrafted");
    assert!(tailed.get("previousEventId").is_none(), "genesis has no link");
}

#[test]
fn invalid_path_exits_with_validation_code() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("notes.txt");

    let out = run(&["read", bad.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("[VALIDATION]"));
}

#[test]
fn analyze_json_reports_health() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.ndjson");
    let path_arg = path.to_str().unwrap();
    for n in 0..3 {
        let out = run(&["append", path_arg, "--actor-type", "executor", "--payload", &append_payload(n)]);
        assert!(out.status.success());
    }

    let out = run(&["analyze", path_arg, "--json"]);
    assert!(out.status.success());
    let analysis: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(analysis["totalEvents"], 3);
    assert_eq!(analysis["chainBreaks"], json!([]));
}
