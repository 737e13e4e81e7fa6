#![allow(deprecated)]
//! Integration tests for the mm-conformance CLI

mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

fn mm_cmd() -> Command {
    let mut cmd = Command::cargo_bin("mm-conformance").expect("binary not found");
    cmd.env_remove("RUST_LOG")
        .env_remove("MM_CONFORMANCE_ROUNDS")
        .env_remove("MM_CONFORMANCE_ITERATIONS")
        .env_remove("MM_CONFORMANCE_TIMEOUT_MS");
    cmd
}

const SMALL_RUN: [&str; 8] = [
    "--dim",
    "4",
    "--workgroups",
    "2",
    "--rounds",
    "1",
    "--iterations",
    "3",
];

#[test]
fn test_help_lists_commands() {
    mm_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("sweep"));
}

// =============================================================================
// list
// =============================================================================

#[test]
fn test_list_legacy_group() {
    mm_cmd()
        .args(["list", "--legacy-only", "--group", "write_after_read"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "write_after_read/mustpass11_coherent_fence_fence_payload_local_buffer",
        ))
        .stdout(predicate::str::contains("message_passing/").not());
}

#[test]
fn test_list_count_json_matches_listing() {
    let output = mm_cmd()
        .args(["list", "--group", "transitive", "--filter", "_vis_leader"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let listed = String::from_utf8(output.stdout).unwrap();
    let lines = listed.lines().count();
    assert!(lines > 0);
    assert!(listed.lines().all(|line| line.ends_with("_vis_leader")));

    let output = mm_cmd()
        .args([
            "list",
            "--group",
            "transitive",
            "--filter",
            "_vis_leader",
            "--count",
            "--json",
        ])
        .output()
        .unwrap();
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["count"].as_u64(), Some(lines as u64));
}

#[test]
fn test_list_rejects_unknown_group() {
    mm_cmd()
        .args(["list", "--group", "atomics"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown group"));
}

// =============================================================================
// show
// =============================================================================

#[test]
fn test_show_prints_glsl() {
    mm_cmd()
        .args(["show", common::MP_DEVICE_BUFFER])
        .assert()
        .success()
        .stdout(predicate::str::contains("#version 450 core"))
        .stdout(predicate::str::contains("#pragma use_vulkan_memory_model"))
        .stdout(predicate::str::contains("fail.x[bufferCoord] = 1;"));
}

#[test]
fn test_show_json_program_text() {
    let output = mm_cmd()
        .args([
            "show",
            "message_passing/coherent_fence_fence_payload_local_buffer_guard_local_buffer_scope_device_frag",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["stage"], "Fragment");
    assert!(json["source"].as_str().unwrap().contains("gl_HelperInvocation"));
    assert!(json["auxiliary"].is_string());
    assert_eq!(json["specialization"]["dim"], 31);
}

#[test]
fn test_show_rejects_bad_path() {
    mm_cmd()
        .args(["show", "message_passing/coherent_fence_fence"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid case path"));
}

#[test]
fn test_show_rejects_illegal_configuration() {
    // A control barrier at device scope names a real configuration shape
    // that the legality rules forbid.
    mm_cmd()
        .args([
            "show",
            "message_passing/coherent_control_barrier_payload_local_buffer_scope_device_comp",
        ])
        .assert()
        .failure();
}

// =============================================================================
// run
// =============================================================================

#[test]
fn test_run_passes() {
    mm_cmd()
        .arg("run")
        .arg(common::MP_DEVICE_BUFFER)
        .args(SMALL_RUN)
        .assert()
        .success()
        .stdout(predicate::str::contains("pass"))
        .stdout(predicate::str::contains("reference-emulator"));
}

#[test]
fn test_run_json_report() {
    let output = mm_cmd()
        .arg("run")
        .arg(common::WAR_WORKGROUP_BARRIER)
        .args(SMALL_RUN)
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["verdict"]["type"], "pass");
    assert_eq!(json["path"], common::WAR_WORKGROUP_BARRIER);
    assert_eq!(json["rounds"], 1);
    assert_eq!(json["invocation_count"], 64);
    assert_eq!(json["digest"].as_str().unwrap().len(), 64);
}

#[test]
fn test_run_on_legacy_device_skips() {
    mm_cmd()
        .arg("run")
        .arg(common::MP_DEVICE_BUFFER)
        .args(SMALL_RUN)
        .arg("--legacy-device")
        .assert()
        .success()
        .stdout(predicate::str::contains("skip"))
        .stdout(predicate::str::contains("vulkanMemoryModel"));
}

#[test]
fn test_run_rejects_overflowing_domain() {
    mm_cmd()
        .args(["run", common::MP_DEVICE_BUFFER, "--workgroups", "70000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("more than u32::MAX invocations"));
}

#[test]
fn test_run_rejects_zero_rounds() {
    mm_cmd()
        .args(["run", common::MP_DEVICE_BUFFER, "--rounds", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "at least one round of one dispatch is required",
        ));
}

// =============================================================================
// sweep
// =============================================================================

#[test]
fn test_sweep_writes_summary() {
    let temp_dir = TempDir::new().unwrap();
    let output_path = temp_dir.path().join("summary.json");

    mm_cmd()
        .args([
            "sweep",
            "--legacy-only",
            "--group",
            "message_passing",
            "--stride",
            "5",
            "--limit",
            "12",
            "--threads",
            "2",
        ])
        .args(SMALL_RUN)
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("passed: 12"));

    let content = fs::read_to_string(&output_path).unwrap();
    let json: Value = serde_json::from_str(&content).unwrap();
    assert_eq!(json["passed"], 12);
    assert_eq!(json["failed"], 0);
    assert_eq!(json["entries"].as_array().unwrap().len(), 12);
    assert!(json["run_id"].is_string());
}

#[test]
fn test_sweep_empty_selection_fails() {
    mm_cmd()
        .args(["sweep", "--filter", "no_such_configuration"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No configurations match"));
}

#[test]
fn test_sweep_json_error_output() {
    mm_cmd()
        .args(["sweep", "--filter", "no_such_configuration", "--json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"error\""));
}
