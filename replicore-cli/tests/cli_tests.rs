//! End-to-end tests for the replicore binary
//!
//! Each test writes its inputs into a temp dir, runs the binary and checks
//! the JSON it prints.

use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const NODE_A: &str = "01010101-0101-0101-0101-010101010101";
const NODE_B: &str = "02020202-0202-0202-0202-020202020202";

fn replicore(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_replicore"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("REPLICORE_RESOLUTION_POLICY")
        .output()
        .expect("failed to run replicore")
}

fn record(source: &str, id: &str, node: &str, etag: u64, payload_b64: &str, ts: u64) -> String {
    format!(
        r#"{{"source":"{source}","item":{{"id":"{id}","collection":"Users","payload":"{payload_b64}","change_vector":[{{"node":"{node}","etag":{etag}}}],"last_modified":{ts}}}}}"#
    )
}

fn write(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

fn conflicting_batch() -> String {
    format!(
        "[{},{}]",
        // "old" and "new"
        record(NODE_A, "users/1", NODE_A, 1, "b2xk", 5),
        record(NODE_B, "users/1", NODE_B, 1, "bmV3", 10),
    )
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "replicore failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

#[test]
fn test_replay_without_policy_reports_conflict() {
    let dir = TempDir::new().unwrap();
    let batch = write(dir.path(), "batch.json", &conflicting_batch());

    let report = stdout_json(&replicore(&["replay", &batch]));

    assert_eq!(report["batches"].as_array().unwrap().len(), 2);
    assert_eq!(report["conflicts"][0]["id"], "users/1");
    assert_eq!(report["conflicts"][0]["versions"].as_array().unwrap().len(), 2);
    assert_eq!(report["status"]["unresolved_total"], 1);
    assert_eq!(report["metrics"]["conflicts_detected"], 1);
}

#[test]
fn test_replay_with_latest_policy_resolves() {
    let dir = TempDir::new().unwrap();
    let batch = write(dir.path(), "batch.json", &conflicting_batch());
    let config = write(
        dir.path(),
        "replicore.toml",
        "[resolution.policy]\nkind = \"resolve_to_latest\"\n",
    );

    let report = stdout_json(&replicore(&["--config", &config, "replay", &batch]));

    assert!(report["conflicts"].as_array().unwrap().is_empty());
    assert_eq!(report["status"]["unresolved_total"], 0);
    assert_eq!(report["status"]["collections"][0]["last_outcome"]["outcome"], "resolved");
}

#[test]
fn test_replay_reports_malformed_items() {
    let dir = TempDir::new().unwrap();
    let contents = format!(
        "[{},{}]",
        record(NODE_A, "users/1", NODE_A, 1, "b2xk", 5),
        r#"{"source":"01010101-0101-0101-0101-010101010101","item":{"id":"users/2","collection":"Users","change_vector":[{"node":"01010101-0101-0101-0101-010101010101","etag":-1}],"last_modified":1}}"#,
    );
    let batch = write(dir.path(), "batch.json", &contents);

    let report = stdout_json(&replicore(&["replay", &batch]));
    let outcomes = report["batches"][0]["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0][1]["outcome"], "accepted");
    assert_eq!(outcomes[1][1]["outcome"], "malformed");
}

#[test]
fn test_replay_undecodable_items_do_not_abort_batch() {
    // Goal: an overflowing counter and a bad payload are rejected per item, the good record still applies
    let dir = TempDir::new().unwrap();
    let contents = format!(
        "[{},{},{}]",
        record(NODE_A, "users/1", NODE_A, 1, "b2xk", 5),
        record(NODE_A, "users/2", NODE_A, u64::MAX, "b2xk", 5),
        record(NODE_A, "users/3", NODE_A, 1, "***", 5),
    );
    let batch = write(dir.path(), "batch.json", &contents);

    let report = stdout_json(&replicore(&["replay", &batch]));
    let outcomes = report["batches"][0]["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0][1]["outcome"], "accepted");
    assert_eq!(outcomes[1][0], "users/2");
    assert_eq!(outcomes[1][1]["outcome"], "malformed");
    assert_eq!(outcomes[2][0], "users/3");
    assert_eq!(outcomes[2][1]["outcome"], "malformed");
    assert_eq!(report["metrics"]["items_malformed"], 2);
    assert!(report["unreadable"].as_array().unwrap().is_empty());
}

#[test]
fn test_replay_missing_file_fails() {
    let output = replicore(&["replay", "/nonexistent/batch.json"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("/nonexistent/batch.json"));
}

#[cfg(unix)]
#[test]
fn test_replay_runs_resolution_script() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let script = write(
        dir.path(),
        "delete-users",
        "#!/bin/sh\ncat > /dev/null\necho '{\"resolve\":\"tombstone\"}'\n",
    );
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    let config = write(
        dir.path(),
        "replicore.toml",
        "[resolution.policy]\nkind = \"script_by_collection\"\nscripts = { Users = \"delete-users\" }\n",
    );
    let batch = write(dir.path(), "batch.json", &conflicting_batch());

    let report = stdout_json(&replicore(&[
        "--config",
        &config,
        "replay",
        &batch,
        "--scripts-dir",
        &dir.path().to_string_lossy(),
    ]));

    assert_eq!(report["tombstones"][0], "users/1");
    assert!(report["conflicts"].as_array().unwrap().is_empty());
}

#[test]
fn test_config_init_then_show() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("replicore.toml");
    let path = path.to_string_lossy();

    let init = replicore(&["config", "init", &path]);
    assert!(init.status.success(), "{}", String::from_utf8_lossy(&init.stderr));
    let written = std::fs::read_to_string(path.as_ref()).unwrap();
    assert!(written.contains("lock_stripes = 64"));

    let show = replicore(&["--config", &path, "config", "show"]);
    assert!(show.status.success());
    let shown = String::from_utf8_lossy(&show.stdout);
    assert!(shown.contains("[replication]"));
    assert!(shown.contains("script_timeout = \"5s\""));
}
