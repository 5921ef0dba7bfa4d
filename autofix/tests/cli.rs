use std::process::{Command, Output};

use autofix::test_support::TestRepo;

fn autofix(repo: &TestRepo, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autofix"))
        .arg("-C")
        .arg(repo.path())
        .args(args)
        .env_remove("GITHUB_OUTPUT")
        .env_remove("AZURE_OPENAI_ENDPOINT")
        .env("RUST_LOG", "warn")
        .output()
        .expect("spawn autofix")
}

#[test]
fn passing_suite_exits_zero_without_artifacts() {
    let repo = TestRepo::new().expect("repo");
    repo.write("autofix.toml", "[tests]\njest_command = [\"true\"]\n")
        .expect("write");

    let output = autofix(&repo, &["--runner", "jest"]);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Tests already pass"), "stdout: {stdout}");
    assert!(!repo.path().join(".autofix").exists());
}

#[test]
fn internal_fault_still_exits_zero() {
    let repo = TestRepo::new().expect("repo");
    repo.write(
        "autofix.toml",
        "[tests]\njest_command = [\"definitely-not-a-test-runner\"]\n",
    )
    .expect("write");

    let output = autofix(&repo, &["--runner", "jest"]);

    assert_eq!(output.status.code(), Some(0));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("autofix:"), "stderr: {stderr}");
}

#[test]
fn failing_suite_writes_report_and_step_outputs() {
    let repo = TestRepo::new().expect("repo");
    repo.write("autofix.toml", "[tests]\njest_command = [\"false\"]\n")
        .expect("write");
    repo.commit_all("config").expect("commit");
    let ci = tempfile::tempdir().expect("tempdir");
    let outputs = ci.path().join("github_output");

    let output = Command::new(env!("CARGO_BIN_EXE_autofix"))
        .arg("-C")
        .arg(repo.path())
        .args(["--runner", "jest", "--oracle", "disabled"])
        .env("GITHUB_OUTPUT", &outputs)
        .env("RUST_LOG", "warn")
        .output()
        .expect("spawn autofix");

    assert_eq!(output.status.code(), Some(0));
    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(repo.path().join(".autofix/report.json")).expect("report"),
    )
    .expect("json");
    assert_eq!(report["stop"]["kind"], "oracle_declined");
    let lines = std::fs::read_to_string(&outputs).expect("outputs");
    assert!(lines.contains("autofix_stop=oracle_declined\n"));
    assert!(lines.contains("changes_proposed=false\n"));
    assert!(lines.contains("checkpoint_committed=false\n"));
}

#[test]
fn invalid_flag_is_a_usage_error() {
    let repo = TestRepo::new().expect("repo");
    let output = autofix(&repo, &["--runner", "vitest"]);
    assert_eq!(output.status.code(), Some(2));
}
