use assert_cmd::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
}

/// Runs the binary against a config file that does not exist, so the user's
/// own configuration never leaks into a test.
fn formpilot(config_dir: &Path) -> Command {
    let bin = assert_cmd::cargo::cargo_bin!("formpilot");
    let mut cmd = Command::new(bin);
    cmd.env_remove("RUST_LOG")
        .arg("--config")
        .arg(config_dir.join("absent.yaml"));
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let assert = cmd.assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 output");
    serde_json::from_str(&stdout).expect("valid json")
}

#[test]
fn run_falls_back_to_the_second_model() {
    let dir = tempfile::tempdir().unwrap();
    let report = json_stdout(formpilot(dir.path()).args([
        "run",
        "--fixture",
        fixture("rate_limit_fallback.yaml").to_str().unwrap(),
        "--output",
        "json",
    ]));

    assert_eq!(report["record"]["status"], "applied");
    assert_eq!(report["record"]["job_id"], "fallback-demo");
    let events = report["events"].as_array().unwrap();
    let plan = events
        .iter()
        .find(|e| e["kind"] == "plan_proposed")
        .expect("plan event");
    assert_eq!(plan["payload"]["model_index"], 1);
    assert_eq!(events.last().unwrap()["kind"], "finalized");
    let seqs: Vec<u64> = events.iter().map(|e| e["seq"].as_u64().unwrap()).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn run_hands_persistent_blocks_to_a_human() {
    let dir = tempfile::tempdir().unwrap();
    let report = json_stdout(formpilot(dir.path()).args([
        "run",
        "--fixture",
        fixture("external_blocked.yaml").to_str().unwrap(),
        "--output",
        "json",
    ]));

    let record = &report["record"];
    assert_eq!(record["status"], "manual_required");
    assert_eq!(record["failure_class"], "external_blocked");
    assert_eq!(record["retry_count"], 3);
    assert!(!record["manual_reason"].as_str().unwrap().is_empty());
}

#[test]
fn run_stops_an_answer_loop() {
    let dir = tempfile::tempdir().unwrap();
    let report = json_stdout(formpilot(dir.path()).args([
        "run",
        "--fixture",
        fixture("yes_no_loop.yaml").to_str().unwrap(),
        "--output",
        "json",
    ]));

    assert_eq!(report["record"]["status"], "manual_required");
    assert_eq!(report["record"]["failure_class"], "loop_guard");
}

#[test]
fn run_prints_a_readable_report() {
    let dir = tempfile::tempdir().unwrap();
    let assert = formpilot(dir.path())
        .args([
            "run",
            "--fixture",
            fixture("rate_limit_fallback.yaml").to_str().unwrap(),
        ])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("status:   applied"));
    assert!(stdout.contains("click:submit"));
}

#[test]
fn run_rejects_a_missing_fixture() {
    let dir = tempfile::tempdir().unwrap();
    formpilot(dir.path())
        .args(["run", "--fixture", "does/not/exist.yaml"])
        .assert()
        .failure();
}

#[test]
fn batch_runs_every_fixture_through_the_pool() {
    let dir = tempfile::tempdir().unwrap();
    let summary = json_stdout(formpilot(dir.path()).args([
        "batch",
        fixture("rate_limit_fallback.yaml").to_str().unwrap(),
        fixture("external_blocked.yaml").to_str().unwrap(),
        "--slots",
        "1",
        "--output",
        "json",
    ]));

    let jobs = summary["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["record"]["job_id"], "fallback-demo");
    assert_eq!(jobs[0]["record"]["status"], "applied");
    assert_eq!(jobs[1]["record"]["job_id"], "blocked-demo");
    assert_eq!(jobs[1]["record"]["status"], "manual_required");

    let metrics = &summary["metrics"];
    assert_eq!(metrics["submitted"], 2);
    assert_eq!(metrics["started"], 2);
    assert_eq!(metrics["applied"], 1);
    assert_eq!(metrics["manual_required"], 1);
    assert_eq!(metrics["failed"], 0);
}

#[test]
fn batch_streams_events_from_the_bus() {
    let dir = tempfile::tempdir().unwrap();
    let assert = formpilot(dir.path())
        .args([
            "batch",
            fixture("rate_limit_fallback.yaml").to_str().unwrap(),
            fixture("yes_no_loop.yaml").to_str().unwrap(),
        ])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("[fallback-demo]"));
    assert!(stdout.contains("[loop-demo]"));
    assert!(stdout.contains("finalized"));
    assert!(stdout.contains("submitted: 2"));
}

#[test]
fn batch_rejects_duplicate_job_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture("rate_limit_fallback.yaml");
    formpilot(dir.path())
        .args(["batch", path.to_str().unwrap(), path.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn snapshot_lists_fields_and_submit() {
    let dir = tempfile::tempdir().unwrap();
    let value = json_stdout(formpilot(dir.path()).args([
        "snapshot",
        "--page",
        fixture("application_page.json").to_str().unwrap(),
        "--output",
        "json",
    ]));

    let form = value["form"].as_str().unwrap();
    assert!(form.contains("\"Full name\""));
    assert!(form.contains("SUBMIT:"));
    assert!(form.contains("Are you legally authorized to work in the United States?"));
    let snapshot = &value["snapshot"];
    assert_eq!(snapshot["normalized_path"], "/apply");
    assert_eq!(snapshot["errors"].as_array().unwrap().len(), 1);
    // The filled email does not count; name and the radio group do.
    assert_eq!(snapshot["required_unfilled"].as_array().unwrap().len(), 2);
    assert_eq!(value["metrics"]["snapshot"]["total"], 1);
}

#[test]
fn classify_reports_an_external_block() {
    let dir = tempfile::tempdir().unwrap();
    let value = json_stdout(formpilot(dir.path()).args([
        "classify",
        "--text",
        fixture("blocked.txt").to_str().unwrap(),
        "--submit-visible",
        "--output",
        "json",
    ]));

    assert_eq!(value["outcome"]["outcome_class"], "external_blocked");
    assert_eq!(value["outcome"]["retryable"], true);
    assert_eq!(value["completion"]["confirmed"], false);
    assert_eq!(value["completion"]["signals"]["external_blocked"], true);
}

#[test]
fn classify_confirms_a_thank_you_page() {
    let dir = tempfile::tempdir().unwrap();
    let text = dir.path().join("done.txt");
    std::fs::write(&text, "Application submitted. Thank you for applying!").unwrap();
    let value = json_stdout(formpilot(dir.path()).args([
        "classify",
        "--text",
        text.to_str().unwrap(),
        "--url",
        "https://careers.example.com/apply/thank-you",
        "--output",
        "json",
    ]));

    assert_eq!(value["outcome"]["outcome_class"], "success_confirmed");
    assert_eq!(value["completion"]["confirmed"], true);
}

#[test]
fn config_prints_effective_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "workflow:\n  max_steps: 7\nscheduler:\n  worker_slots: 3\n").unwrap();
    let bin = assert_cmd::cargo::cargo_bin!("formpilot");
    let assert = Command::new(bin)
        .env_remove("RUST_LOG")
        .args(["--config", path.to_str().unwrap(), "config"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("max_steps: 7"));
    assert!(stdout.contains("worker_slots: 3"));
    assert!(stdout.contains("max_submit_attempts: 3"));
}

#[test]
fn config_rejects_invalid_limits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "workflow:\n  max_submit_attempts: 0\n").unwrap();
    let bin = assert_cmd::cargo::cargo_bin!("formpilot");
    Command::new(bin)
        .args(["--config", path.to_str().unwrap(), "config", "--check"])
        .assert()
        .failure();
}
