//! CLI tests: exit codes and structured output of the `rewind` binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// `rewind` running inside `dir`, isolated from user config and environment
#[allow(deprecated)]
fn rewind(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("rewind").unwrap();
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("REWIND_WORKSPACE")
        .env_remove("REWIND_POLL_INTERVAL")
        .env_remove("REWIND_SESSION")
        .env_remove("REWIND_CHECKPOINT_STORE");
    cmd
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    rewind(dir.path()).arg("--version").assert().success();
}

#[test]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    rewind(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("rollback"));
}

#[test]
fn test_rollback_without_backup_id_is_usage_error() {
    let dir = TempDir::new().unwrap();
    rewind(dir.path())
        .arg("rollback")
        .assert()
        .code(64)
        .stderr(predicate::str::contains("--backup-id"));
}

#[test]
fn test_restore_with_malformed_snapshots_is_usage_error() {
    let dir = TempDir::new().unwrap();
    rewind(dir.path())
        .args(["restore", "--snapshots", "not json"])
        .assert()
        .code(64);
}

#[test]
fn test_restore_prints_result_and_writes_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "old\n").unwrap();

    let output = rewind(dir.path())
        .args([
            "restore",
            "--snapshots",
            r#"{"a.txt": "new\n"}"#,
            "--backup-id",
            "b1",
            "--yes",
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "{:?}", output);

    let json = stdout_json(&output);
    assert_eq!(json["backup_id"], "b1");
    assert_eq!(json["files_restored"][0], "a.txt");
    assert_eq!(json["files_backed_up"][0], "a.txt");
    assert_eq!(json["conflicts"].as_array().unwrap().len(), 1);

    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "new\n");
    assert_eq!(
        fs::read_to_string(dir.path().join(".rewind/backups/b1/files/a.txt")).unwrap(),
        "old\n"
    );
}

#[test]
fn test_restore_snapshots_from_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("snaps.json"), r#"{"out/x.txt": "x"}"#).unwrap();

    rewind(dir.path())
        .args(["restore", "--snapshots", "@snaps.json", "--yes"])
        .assert()
        .success();
    assert_eq!(fs::read_to_string(dir.path().join("out/x.txt")).unwrap(), "x");
}

#[test]
fn test_restore_requires_confirmation_on_warnings() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("rewind.toml"),
        "[validation]\nsize_warning_bytes = 1\n",
    )
    .unwrap();

    rewind(dir.path())
        .args(["restore", "--snapshots", r#"{"a.txt": "too big"}"#])
        .assert()
        .code(6)
        .stdout(predicate::str::contains("Large restoration"));
    assert!(!dir.path().join("a.txt").exists());

    rewind(dir.path())
        .args(["restore", "--snapshots", r#"{"a.txt": "too big"}"#, "--yes"])
        .assert()
        .success();
    assert!(dir.path().join("a.txt").exists());
}

#[test]
fn test_restore_blocked_by_unwritable_parent() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("ro"), "plain file").unwrap();

    rewind(dir.path())
        .args(["restore", "--snapshots", r#"{"ro/locked.txt": "x"}"#, "--yes"])
        .assert()
        .code(5)
        .stdout(predicate::str::contains("No write permission: ro/locked.txt"));
    assert_eq!(fs::read_to_string(dir.path().join("ro")).unwrap(), "plain file");
}

#[test]
fn test_rollback_roundtrip() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "mine").unwrap();

    rewind(dir.path())
        .args(["restore", "--snapshots", r#"{"a.txt": "theirs"}"#, "--backup-id", "b1", "--yes"])
        .assert()
        .success();

    let output = rewind(dir.path())
        .args(["rollback", "--backup-id", "b1"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["success"], true);
    assert_eq!(json["files_restored"][0], "a.txt");
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "mine");
}

#[test]
fn test_partial_rollback_exits_with_failure() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "mine a").unwrap();
    fs::write(dir.path().join("b.txt"), "mine b").unwrap();

    rewind(dir.path())
        .args([
            "restore",
            "--snapshots",
            r#"{"a.txt": "theirs a", "b.txt": "theirs b"}"#,
            "--backup-id",
            "b1",
            "--yes",
        ])
        .assert()
        .success();
    fs::remove_file(dir.path().join("a.txt")).unwrap();
    fs::create_dir_all(dir.path().join("a.txt/inner")).unwrap();

    let output = rewind(dir.path())
        .args(["rollback", "--backup-id", "b1"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let json = stdout_json(&output);
    assert_eq!(json["success"], false);
    assert_eq!(json["files_restored"][0], "b.txt");
    assert_eq!(json["failures"][0]["path"], "a.txt");
    assert_eq!(fs::read_to_string(dir.path().join("b.txt")).unwrap(), "mine b");
}

#[test]
fn test_rollback_unknown_backup_fails() {
    let dir = TempDir::new().unwrap();
    rewind(dir.path())
        .args(["rollback", "--backup-id", "ghost"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"success\": false"));
}

#[test]
fn test_diff_command() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();

    let output = rewind(dir.path())
        .args(["diff", "--file", "a.txt", "--snapshot", "one\n"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["status"], "modified");
    assert_eq!(json["lines_added"], 1);
    assert_eq!(json["lines_removed"], 0);

    rewind(dir.path())
        .args(["diff", "--file", "gone.txt", "--snapshot", "x"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"deleted\""));
}

#[test]
fn test_validate_reports_without_writing() {
    let dir = TempDir::new().unwrap();
    let output = rewind(dir.path())
        .args(["validate", "--snapshots", r#"{"a.txt": "a"}"#, "--checkpoint-id", "42"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["checkpoint_id"], "42");
    assert_eq!(json["valid"], true);
    assert_eq!(json["safe_to_proceed"], true);
    assert!(!dir.path().join("a.txt").exists());
}

#[test]
fn test_status_before_any_restore_is_null() {
    let dir = TempDir::new().unwrap();
    rewind(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::diff("null\n"));
}

#[test]
fn test_sync_once_and_status() {
    let dir = TempDir::new().unwrap();
    let session_dir = dir.path().join(".rewind/checkpoints/main-thread");
    fs::create_dir_all(&session_dir).unwrap();
    fs::write(
        session_dir.join("1.json"),
        r#"{"checkpoint_id": 1, "step_index": 1, "file_snapshots": {"hello.txt": "hi\n"}}"#,
    )
    .unwrap();

    let output = rewind(dir.path()).arg("sync-once").output().unwrap();
    assert!(output.status.success(), "{:?}", output);
    let json = stdout_json(&output);
    assert_eq!(json["transition"], "INIT");
    assert_eq!(json["checkpoint_id"], "1");
    assert_eq!(fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "hi\n");

    let output = rewind(dir.path()).arg("status").output().unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["session_id"], "main-thread");
    assert_eq!(json["checkpoint_id"], "1");

    let output = rewind(dir.path()).arg("sync-once").output().unwrap();
    assert_eq!(stdout_json(&output)["transition"], "NONE");
}

#[test]
fn test_sync_once_resumes_session_of_pointer() {
    let dir = TempDir::new().unwrap();
    for (session, content) in [("review", "from review\n"), ("main-thread", "from main\n")] {
        let session_dir = dir.path().join(".rewind/checkpoints").join(session);
        fs::create_dir_all(&session_dir).unwrap();
        fs::write(
            session_dir.join("1.json"),
            format!(
                r#"{{"checkpoint_id": 1, "step_index": 1, "file_snapshots": {{"a.txt": {:?}}}}}"#,
                content
            ),
        )
        .unwrap();
    }

    let output = rewind(dir.path())
        .args(["sync-once", "--session", "review"])
        .output()
        .unwrap();
    assert_eq!(stdout_json(&output)["transition"], "INIT");

    // Later runs without --session keep following the pointer's session
    let output = rewind(dir.path()).arg("sync-once").output().unwrap();
    let json = stdout_json(&output);
    assert_eq!(json["session_id"], "review");
    assert_eq!(json["transition"], "NONE");
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "from review\n");

    let output = rewind(dir.path())
        .env("REWIND_SESSION", "main-thread")
        .arg("sync-once")
        .output()
        .unwrap();
    assert_eq!(stdout_json(&output)["transition"], "INIT");
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "from main\n");
}

#[test]
fn test_backups_text_output() {
    let dir = TempDir::new().unwrap();
    rewind(dir.path())
        .args(["restore", "--snapshots", r#"{"a.txt": "a"}"#, "--backup-id", "listed", "--yes"])
        .assert()
        .success();

    rewind(dir.path())
        .args(["backups", "--output-format", "text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("listed"));
}

#[test]
fn test_invalid_config_exits_with_config_code() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("rewind.toml"), "[sync]\npoll_interval_secs = 0\n").unwrap();
    rewind(dir.path()).arg("status").assert().code(2);
}
