//! CLI tests for the `codeloop` binary.
//!
//! Spawns the binary and checks exit codes and printed output for commands
//! that need no model.

use std::process::Command;

use codeloop::exit_codes;
use codeloop::io::config::{AgentConfig, config_path, load_config};
use codeloop::planner::REFUSAL;
use serde_json::Value;

fn codeloop() -> Command {
    Command::new(env!("CARGO_BIN_EXE_codeloop"))
}

#[test]
fn tools_lists_planning_contracts_as_json() {
    let output = codeloop().arg("tools").output().expect("codeloop tools");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let tools: Vec<Value> = serde_json::from_slice(&output.stdout).expect("json");
    let names: Vec<&str> = tools
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert!(names.contains(&"fs.read"));
    assert!(names.contains(&"exec.run"));
    assert!(!names.contains(&"fs.write_diff"));
}

#[test]
fn check_path_denies_escape() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = codeloop()
        .args(["check-path", "../outside.txt", "--root"])
        .arg(temp.path())
        .output()
        .expect("codeloop check-path");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("denied"));
}

#[test]
fn check_path_allows_sandbox_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = codeloop()
        .args(["check-path", "src/lib.rs", "--root"])
        .arg(temp.path())
        .output()
        .expect("codeloop check-path");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("allowed"));
}

#[test]
fn run_refuses_destructive_task_without_a_model() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = codeloop()
        .args(["run", "rm -rf / please", "--root"])
        .arg(temp.path())
        .output()
        .expect("codeloop run");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), REFUSAL);
}

#[test]
fn run_with_missing_root_is_invalid() {
    let output = codeloop()
        .args(["run", "add a README", "--root", "/definitely/not/here"])
        .output()
        .expect("codeloop run");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_writes_a_loadable_default_config_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = config_path(temp.path());

    let output = codeloop()
        .args(["init", "--root"])
        .arg(temp.path())
        .output()
        .expect("codeloop init");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("wrote"));
    assert_eq!(load_config(&path).expect("load"), AgentConfig::default());

    std::fs::write(&path, "max_cycles = 2\n").expect("edit config");
    let output = codeloop()
        .args(["init", "--root"])
        .arg(temp.path())
        .output()
        .expect("codeloop init");
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("kept"));
    assert_eq!(load_config(&path).expect("load").max_cycles, 2);

    let output = codeloop()
        .args(["init", "--force", "--root"])
        .arg(temp.path())
        .output()
        .expect("codeloop init --force");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(load_config(&path).expect("load").max_cycles, 6);
}
